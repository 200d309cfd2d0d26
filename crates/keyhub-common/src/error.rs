/// The error taxonomy shared by every crate in the workspace (spec §7).
///
/// `keyhub-proxy` wraps this in a concrete `PipelineError` with a message and,
/// at the HTTP boundary, an `axum::response::IntoResponse` impl; crates below
/// the router never depend on HTTP types directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input; surfaces as 4xx.
    Validation,
    /// Missing resource (unknown group, unknown model, ...).
    NotFound,
    /// Hub access key rejected outright (missing/unknown/malformed).
    Unauthorized,
    /// Hub access key known but disabled.
    AuthDisabledKey,
    /// Network error, 5xx, or read timeout from upstream. Retried on next key.
    UpstreamTransient,
    /// Upstream rejected the credential itself. Key blacklisted, retried on next key.
    UpstreamFatalForKey,
    /// Upstream rejected the request in a way no key in this group can fix
    /// (e.g. model not found on this group). Abort group, try next group.
    UpstreamFatalForGroup,
    /// Every key in the selected group is unavailable.
    NoActiveKeys,
    /// Request exceeds a precondition (size limit) or has no compatible channel.
    PreconditionUnmet,
    /// Serialization/storage/unexpected failure.
    Internal,
}

impl ErrorKind {
    /// Whether the pipeline should advance to the next key within the same group.
    pub fn retry_same_group(self) -> bool {
        matches!(self, ErrorKind::UpstreamTransient | ErrorKind::UpstreamFatalForKey)
    }

    /// Whether the pipeline should give up on the current group and try the next one
    /// (Hub path only — direct group path has nowhere else to go).
    pub fn abandon_group(self) -> bool {
        matches!(
            self,
            ErrorKind::UpstreamFatalForGroup | ErrorKind::NoActiveKeys
        )
    }

    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Validation | ErrorKind::PreconditionUnmet => 400,
            ErrorKind::Unauthorized | ErrorKind::AuthDisabledKey => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::UpstreamTransient => 502,
            ErrorKind::UpstreamFatalForKey | ErrorKind::UpstreamFatalForGroup => 502,
            ErrorKind::NoActiveKeys => 503,
            ErrorKind::Internal => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::AuthDisabledKey => "auth_disabled_key",
            ErrorKind::UpstreamTransient => "upstream_transient",
            ErrorKind::UpstreamFatalForKey => "upstream_fatal_for_key",
            ErrorKind::UpstreamFatalForGroup => "upstream_fatal_for_group",
            ErrorKind::NoActiveKeys => "no_active_keys",
            ErrorKind::PreconditionUnmet => "precondition_unmet",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_fatal_retries_same_group() {
        assert!(ErrorKind::UpstreamFatalForKey.retry_same_group());
        assert!(!ErrorKind::UpstreamFatalForKey.abandon_group());
    }

    #[test]
    fn group_fatal_abandons_group() {
        assert!(ErrorKind::UpstreamFatalForGroup.abandon_group());
        assert!(!ErrorKind::UpstreamFatalForGroup.retry_same_group());
    }
}
