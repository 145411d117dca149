use thiserror::Error;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("cache backend unavailable during `{op}`: {message}")]
    Unavailable { op: &'static str, message: String },
    #[error("cache operation `{op}` timed out")]
    Timeout { op: &'static str },
    #[error("cache key `{key}` holds the wrong kind of value")]
    WrongType { key: String },
    #[error("cache key `{key}` holds a corrupt value: {reason}")]
    Corrupt { key: String, reason: String },
}

impl MirrorError {
    pub fn unavailable(op: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            op,
            message: message.into(),
        }
    }

    pub fn corrupt(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
