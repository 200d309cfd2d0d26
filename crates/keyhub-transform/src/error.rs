#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("unsupported content shape for {relay}: {detail}")]
    UnsupportedContent { relay: &'static str, detail: String },
    #[error("missing required field {0}")]
    MissingField(&'static str),
}
