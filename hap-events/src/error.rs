/// Failures detected by an event channel.
///
/// None of these ever reach a producer: `trigger` absorbs and logs them.
/// They surface only from the fallible registration methods and config loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// A handler with this id is already registered on the channel.
    DuplicateHandler(String),
    /// The registration was rejected for another reason.
    InvalidHandler(String),
    /// The handler's context completed before a limiter slot freed up.
    ConcurrencyExhausted { handler: String },
    /// The handler was removed while waiting for a limiter slot.
    HandlerRemoved(String),
    /// The limiter was closed.
    LimiterClosed,
    /// The handler's callback panicked.
    HandlerPanicked { handler: String, message: String },
    /// The configuration could not be loaded or is invalid.
    Config(String),
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventError::DuplicateHandler(id) => {
                write!(f, "Cannot add handler: id '{id}' is already registered")
            }
            EventError::InvalidHandler(reason) => write!(f, "Cannot add handler: {reason}"),
            EventError::ConcurrencyExhausted { handler } => {
                write!(f, "Failed to acquire a limiter slot for handler '{handler}'")
            }
            EventError::HandlerRemoved(id) => write!(f, "Handler '{id}' was removed"),
            EventError::LimiterClosed => write!(f, "Limiter closed"),
            EventError::HandlerPanicked { handler, message } => {
                write!(f, "Handler '{handler}' panicked: {message}")
            }
            EventError::Config(msg) => write!(f, "Event config error: {msg}"),
        }
    }
}

impl std::error::Error for EventError {}

impl From<serde_yaml::Error> for EventError {
    fn from(err: serde_yaml::Error) -> Self {
        EventError::Config(err.to_string())
    }
}

/// Render a panic payload caught from a handler.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            EventError::DuplicateHandler("audit".into()).to_string(),
            "Cannot add handler: id 'audit' is already registered"
        );
        assert_eq!(
            EventError::ConcurrencyExhausted { handler: "h".into() }.to_string(),
            "Failed to acquire a limiter slot for handler 'h'"
        );
        assert_eq!(
            EventError::Config("boom".into()).to_string(),
            "Event config error: boom"
        );
    }

    #[test]
    fn panic_payloads() {
        let p: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(p.as_ref()), "static");
        let p: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(p.as_ref()), "owned");
        let p: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(p.as_ref()), "non-string panic payload");
    }
}
