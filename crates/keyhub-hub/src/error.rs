use keyhub_common::ErrorKind;

/// Errors raised by group lookup, model-pool aggregation, and Hub selection
/// (spec §4.5, §4.6). Every variant maps onto the shared [`ErrorKind`]
/// taxonomy at the Pipeline boundary — `keyhub-hub` itself never needs the
/// full `keyhub-proxy::PipelineError` shape.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("unknown group {0}")]
    UnknownGroup(String),
    #[error("model {0} has no compatible group")]
    NoCompatibleGroup(String),
    #[error("request exceeds a precondition for every remaining candidate")]
    PreconditionUnmet,
    #[error("hub access key rejected")]
    Unauthorized,
    #[error("hub access key disabled")]
    DisabledKey,
    #[error("model {0} is not in this access key's allowed_models")]
    ModelNotAllowed(String),
}

impl HubError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HubError::UnknownGroup(_) => ErrorKind::NotFound,
            HubError::NoCompatibleGroup(_) => ErrorKind::PreconditionUnmet,
            HubError::PreconditionUnmet => ErrorKind::PreconditionUnmet,
            HubError::Unauthorized => ErrorKind::Unauthorized,
            HubError::DisabledKey => ErrorKind::AuthDisabledKey,
            HubError::ModelNotAllowed(_) => ErrorKind::Unauthorized,
        }
    }
}
