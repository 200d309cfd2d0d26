//! Error classification (spec §7), generalizing
//! `gproxy_provider_core::provider::default_decide_unavailable` from a
//! credential-unavailable decision into the full [`ErrorKind`] taxonomy this
//! spec needs for the retry loop.

use keyhub_channels::ChannelHandler;
use keyhub_common::ErrorKind;

/// A completed upstream attempt's outcome, already classified into the
/// shared taxonomy the Pipeline, Key Provider, and Dynamic Weight all
/// consume (spec §7: "Every upstream attempt records an outcome to Dynamic
/// Weight regardless of outcome kind").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified {
    pub kind: ErrorKind,
}

impl Classified {
    pub fn success() -> Self {
        Self { kind: ErrorKind::Internal } // never read; callers check `is_success()` first
    }

    pub fn is_success(status: u16) -> bool {
        (200..300).contains(&status)
    }
}

/// Classifies a completed HTTP response using the selected channel's own
/// `classify_response` (spec §4.4: "handler-owned ... classify_response"),
/// falling back to the shared status-code table for anything a handler
/// doesn't special-case.
pub fn classify_response(handler: &dyn ChannelHandler, status: u16, body: &[u8]) -> ErrorKind {
    if Classified::is_success(status) {
        return ErrorKind::Internal; // unreachable in practice: callers branch on 2xx before classifying
    }
    handler.classify_response(status, body)
}

/// Classifies a transport-level failure (no HTTP response at all) — timeout,
/// connection refused, DNS, TLS. These never involve a specific credential,
/// so they are always `upstream_transient` (spec §7), retried on the next key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailureKind {
    Timeout,
    ReadTimeout,
    Connect,
    Dns,
    Tls,
    Other,
}

pub fn classify_transport_failure(_kind: TransportFailureKind) -> ErrorKind {
    ErrorKind::UpstreamTransient
}

/// Classifies a `wreq::Error` (no response reached) into a
/// [`TransportFailureKind`], mirroring the teacher's
/// `classify_wreq_error` (`gproxy-core/src/upstream_client/mod.rs`).
pub fn classify_wreq_error(err: &wreq::Error) -> TransportFailureKind {
    let message = err.to_string().to_ascii_lowercase();
    if err.is_timeout() {
        return if message.contains("read") || message.contains("idle") {
            TransportFailureKind::ReadTimeout
        } else {
            TransportFailureKind::Timeout
        };
    }
    if err.is_connect() {
        if message.contains("dns") || message.contains("resolve") {
            return TransportFailureKind::Dns;
        }
        if message.contains("tls") || message.contains("ssl") {
            return TransportFailureKind::Tls;
        }
        return TransportFailureKind::Connect;
    }
    if message.contains("tls") || message.contains("ssl") {
        return TransportFailureKind::Tls;
    }
    TransportFailureKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_status_is_recognized() {
        assert!(Classified::is_success(200));
        assert!(!Classified::is_success(500));
    }

    #[test]
    fn transport_failures_are_always_transient() {
        for kind in [
            TransportFailureKind::Timeout,
            TransportFailureKind::ReadTimeout,
            TransportFailureKind::Connect,
            TransportFailureKind::Dns,
            TransportFailureKind::Tls,
            TransportFailureKind::Other,
        ] {
            assert_eq!(classify_transport_failure(kind), ErrorKind::UpstreamTransient);
        }
    }
}
