use std::sync::Arc;

/// Take ownership of a buffered handler's accumulated payloads.
///
/// The buffer is left empty and the returned batch holds owned values, in
/// append order. A payload still shared with another handler is cloned;
/// otherwise it is moved out of its `Arc`. Either way the batch never
/// aliases anything reachable from the live buffer.
pub fn detach<D: Clone>(buffer: &mut Vec<Arc<D>>) -> Vec<D> {
    std::mem::take(buffer)
        .into_iter()
        .map(Arc::unwrap_or_clone)
        .collect()
}
