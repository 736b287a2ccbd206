/// Errors that can occur while encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The payload is not a well-formed message.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// The envelope carries a version this build does not speak.
    #[error("unsupported message version {found} (supported: {supported})")]
    UnsupportedVersion { found: u16, supported: u16 },

    /// JSON has no representation for NaN or infinity.
    #[error("cannot encode non-finite number {0}")]
    NonFiniteNumber(f64),

    /// The payload is not valid UTF-8 text.
    #[error("message is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

pub type Result<T> = std::result::Result<T, MessageError>;
