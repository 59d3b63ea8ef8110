/// Derive a cosmetic topic label from a payload type.
///
/// Module path and generic arguments are dropped, a trailing `Data` suffix is
/// removed and the remaining CamelCase name is folded to snake_case:
/// `app::events::UserCreatedData` becomes `user_created`.
pub fn topic_of<D: ?Sized>() -> String {
    topic_from_type_name(std::any::type_name::<D>())
}

pub(crate) fn topic_from_type_name(type_name: &str) -> String {
    let base = type_name.split('<').next().unwrap_or(type_name);
    let base = base.rsplit("::").next().unwrap_or(base);
    let base = match base.strip_suffix("Data") {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => base,
    };
    to_snake_case(base)
}

fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
