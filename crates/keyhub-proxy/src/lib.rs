//! Proxy Request Pipeline (spec §4.8): the HTTP client pool, error
//! classification, body capture, key restoration validator, and the
//! pipeline itself that ties the Group Model & Hub and Key Pool crates
//! together into one served request.

pub mod capture;
pub mod classify;
pub mod client;
pub mod error;
pub mod pipeline;
pub mod validator;

pub use capture::{capture, CapturedBody, DEFAULT_HARD_CEILING_BYTES, DEFAULT_RETRY_BUFFER_BYTES};
pub use client::HttpClientPool;
pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineRequest, PipelineResponse, ResponseBody};
pub use validator::UpstreamKeyValidator;
