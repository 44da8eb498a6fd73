#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed debugger packet: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown packet type `{0}`")]
    UnknownType(String),
    #[error("packet field `{0}` is missing")]
    MissingField(&'static str),
}
