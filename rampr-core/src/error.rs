pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("a load shape needs at least one stage")]
    EmptyShape,

    #[error("unknown preset `{0}` (expected `standard`, `conservative`, or `aggressive`)")]
    UnknownPreset(String),

    #[error("invalid thresholds: {0}")]
    InvalidThresholds(String),

    #[error("payload decode error: {0}")]
    PayloadDecode(#[from] base64::DecodeError),

    #[error("payload is empty")]
    EmptyPayload,
}
