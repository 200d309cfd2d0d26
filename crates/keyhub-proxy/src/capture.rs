//! Request body capture (spec §4.8): reads the inbound body into a
//! size-capped buffer so it can be replayed across retry attempts and so its
//! size in KB is available for the Hub's `max_request_size_kb` precondition
//! gate. Oversized bodies still forward once but lose retry eligibility;
//! bodies past the hard ceiling are rejected outright.

use bytes::Bytes;

use crate::error::PipelineError;

/// Default cap on a body kept for retry (spec: "configurable buffer").
pub const DEFAULT_RETRY_BUFFER_BYTES: usize = 2 * 1024 * 1024;
/// Hard ceiling past which a request is rejected outright.
pub const DEFAULT_HARD_CEILING_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CapturedBody {
    pub bytes: Bytes,
    /// `false` when the body exceeded the retry buffer cap: it was still
    /// forwarded once, but the Pipeline must not attempt a retry with it
    /// (spec §4.8: "oversized bodies proceed without retry eligibility").
    pub retryable: bool,
}

impl CapturedBody {
    pub fn size_kb(&self) -> u64 {
        (self.bytes.len() as u64).div_ceil(1024)
    }
}

/// Validates and wraps an already-fully-read body. Splitting the read itself
/// out of this function keeps it synchronous and independently testable;
/// callers own the actual `Body`-to-`Bytes` read (streamed, with the hard
/// ceiling enforced incrementally in production, not after the fact).
pub fn capture(
    bytes: Bytes,
    retry_buffer_bytes: usize,
    hard_ceiling_bytes: usize,
) -> Result<CapturedBody, PipelineError> {
    if bytes.len() > hard_ceiling_bytes {
        return Err(PipelineError::validation(format!(
            "request body of {} bytes exceeds the hard ceiling of {hard_ceiling_bytes} bytes",
            bytes.len()
        )));
    }
    let retryable = bytes.len() <= retry_buffer_bytes;
    Ok(CapturedBody { bytes, retryable })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_under_retry_cap_is_retryable() {
        let body = capture(Bytes::from(vec![0u8; 100]), 1024, 4096).unwrap();
        assert!(body.retryable);
        assert_eq!(body.size_kb(), 1);
    }

    #[test]
    fn body_over_retry_cap_but_under_ceiling_forwards_without_retry() {
        let body = capture(Bytes::from(vec![0u8; 2000]), 1024, 4096).unwrap();
        assert!(!body.retryable);
    }

    #[test]
    fn body_over_hard_ceiling_is_rejected() {
        let err = capture(Bytes::from(vec![0u8; 5000]), 1024, 4096).unwrap_err();
        assert_eq!(err.kind, keyhub_common::ErrorKind::Validation);
    }

    #[test]
    fn size_kb_rounds_up() {
        let body = capture(Bytes::from(vec![0u8; 1]), 1024, 4096).unwrap();
        assert_eq!(body.size_kb(), 1);
    }
}
