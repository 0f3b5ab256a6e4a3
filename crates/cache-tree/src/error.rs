//! Error types for backing-store hooks

use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Failure reported by a user-supplied backing-store hook.
///
/// Hook failures never escape as panics or bubbled errors; they are captured
/// as values and surfaced through operation outcomes and
/// [`CacheEvent::HookFailure`](crate::CacheEvent::HookFailure) notifications.
/// The wrapper is cheap to clone, so one captured failure can appear in both
/// a sweep outcome and an event payload.
#[derive(Debug, Clone)]
pub struct HookError(Arc<dyn Error + Send + Sync>);

impl HookError {
    /// Wrap an arbitrary error value.
    pub fn new<E>(err: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        HookError(Arc::from(err.into()))
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for HookError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.0.source()
    }
}

impl From<String> for HookError {
    fn from(msg: String) -> Self {
        HookError::new(msg)
    }
}

impl From<&str> for HookError {
    fn from(msg: &str) -> Self {
        HookError::new(msg)
    }
}

/// Result alias used by all hook signatures.
pub type HookResult<T> = std::result::Result<T, HookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_display() {
        let err = HookError::from("disk-full");
        assert_eq!(format!("{}", err), "disk-full");
    }

    #[test]
    fn test_wrapped_error_display() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such blob");
        let err = HookError::new(io);
        assert_eq!(format!("{}", err), "no such blob");
    }

    #[test]
    fn test_clone_shares_message() {
        let err = HookError::from("backend unreachable".to_string());
        let clone = err.clone();
        assert_eq!(format!("{}", clone), format!("{}", err));
    }

    #[test]
    fn test_error_is_debug() {
        let err = HookError::from("boom");
        assert!(format!("{:?}", err).contains("boom"));
    }
}
