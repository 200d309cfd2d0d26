//! The proxy request pipeline (spec §4.8): resolves a model/group through
//! the Hub (or a direct group name), acquires a key, rewrites and forwards
//! the request, classifies the outcome, and retries across keys and groups
//! per the shared [`ErrorKind`] taxonomy.
//!
//! Generalizes the attempt loop shape of the teacher's `ProxyEngine`
//! (`gproxy-core/src/proxy_engine/mod.rs`) — pick credential, rewrite,
//! forward, classify, retry-or-abandon — onto this spec's narrower
//! Group/Hub model, dropping the teacher's OAuth refresh and
//! local-response branches, which have no counterpart here.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use keyhub_channels::registry::{convert_response, native_handler, needs_conversion, rewrite_for_relay};
use keyhub_common::{ErrorKind, RelayFormat};
use keyhub_hub::{GroupRuntime, Hub, HubSettings, PriorityTable, SelectionInput};
use keyhub_keypool::{KeyProvider, Outcome, OutcomeReport};
use rand::Rng;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::classify;
use crate::client::HttpClientPool;
use crate::error::PipelineError;

/// Upper bound on how many groups the Hub path will abandon-and-retry
/// through for one inbound request (spec §4.8: the model pool already caps
/// candidate count per model; this is a backstop against a pathological
/// config, not a tuning knob).
const MAX_GROUP_ATTEMPTS: usize = 8;

/// How long the stream relay task waits for the next upstream chunk before
/// giving up (mirrors the teacher's `stream_idle_timeout`,
/// `gproxy-core/src/upstream_client/mod.rs`). Distinct from the group's
/// configured `request_timeout`, which the streaming HTTP client variant
/// disables entirely (spec §4.2).
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on the relay channel between the upstream-reading task and the
/// response body the client consumes; backpressure stalls the upstream
/// read rather than growing memory unbounded.
const STREAM_CHANNEL_CAPACITY: usize = 16;

pub struct PipelineRequest {
    pub relay_format: RelayFormat,
    /// The inbound path, used only by handlers whose model lives there
    /// (Gemini) rather than in the JSON body.
    pub inbound_path: String,
    pub body: Bytes,
    pub request_size_kb: u64,
    /// `false` when [`crate::capture`] saw a body past the retry buffer cap
    /// (spec §4.8 "oversized bodies proceed without retry eligibility"):
    /// the attempt loop forwards it once and does not retry on failure.
    pub retryable: bool,
}

/// A completed attempt's response body (spec §4.8 "Streaming"): either a
/// live channel of upstream chunks relayed without full buffering, or a
/// fully materialized buffer for the cases that need the complete body in
/// hand — a non-2xx response (to classify it) or a `cc_support` response
/// conversion (to re-shape it into the caller's relay format).
pub enum ResponseBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<Bytes>),
}

pub struct PipelineResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
    pub group_id: i64,
    pub key_id: i64,
}

#[derive(Clone, Copy)]
enum WeightTarget {
    Group(i64),
    SubGroup { aggregate_id: i64, sub_group_id: i64 },
}

pub struct Pipeline {
    hub: Arc<Hub>,
    keys: Arc<KeyProvider>,
    clients: Arc<HttpClientPool>,
}

impl Pipeline {
    pub fn new(hub: Arc<Hub>, keys: Arc<KeyProvider>, clients: Arc<HttpClientPool>) -> Self {
        Self { hub, keys, clients }
    }

    /// Hub-path entry point (spec §4.6, §4.8): authorizes the access key,
    /// resolves a model to a group through Selection, and serves it,
    /// advancing to the next-best group whenever one abandons outright.
    pub async fn handle_hub_request(
        &self,
        access_key_hash: &str,
        req: PipelineRequest,
        priorities: &PriorityTable,
        settings: &HubSettings,
    ) -> Result<PipelineResponse, PipelineError> {
        let native = native_handler(req.relay_format.native_channel());
        let body_value: serde_json::Value = serde_json::from_slice(&req.body)
            .map_err(|e| PipelineError::validation(format!("malformed request body: {e}")))?;
        let model_name = native
            .extract_model(&body_value, &req.inbound_path)
            .map_err(PipelineError::from)?;

        self.hub.access_keys.authorize(access_key_hash, &model_name).await.map_err(PipelineError::from)?;

        let mut excluded_groups: HashSet<i64> = HashSet::new();
        let mut last_err = PipelineError::not_found("no candidate group available for this model");
        for _ in 0..MAX_GROUP_ATTEMPTS {
            let input = SelectionInput {
                model_name: &model_name,
                relay_format: req.relay_format,
                request_size_kb: req.request_size_kb,
            };
            let group = match self.hub.select_excluding(input, priorities, settings, &excluded_groups).await {
                Ok(group) => group,
                Err(err) => return Err(PipelineError::from(err)),
            };
            match self
                .attempt_group(group.clone(), &model_name, req.relay_format, &req.body, &req.inbound_path, req.retryable)
                .await
            {
                Ok(resp) => return Ok(resp),
                Err(kind) if kind.abandon_group() => {
                    excluded_groups.insert(group.id);
                    last_err = PipelineError::new(kind, format!("group {} abandoned", group.name));
                    continue;
                }
                Err(kind) => return Err(PipelineError::new(kind, "upstream attempt failed")),
            }
        }
        Err(last_err)
    }

    /// Direct-group path (spec §6 `/proxy/{group_name}/v1/*`): bypasses Hub
    /// selection entirely and serves the named group (or, if it is an
    /// aggregate, one of its sub-groups) directly.
    pub async fn handle_direct_request(&self, group_name: &str, req: PipelineRequest) -> Result<PipelineResponse, PipelineError> {
        let group = self
            .hub
            .groups
            .get_by_name(group_name)
            .ok_or_else(|| PipelineError::not_found(format!("unknown group {group_name}")))?;
        if !group.enabled {
            return Err(PipelineError::not_found(format!("group {group_name} is disabled")));
        }
        let native = native_handler(group.channel_type);
        let body_value: serde_json::Value = serde_json::from_slice(&req.body)
            .map_err(|e| PipelineError::validation(format!("malformed request body: {e}")))?;
        let model_name = native
            .extract_model(&body_value, &req.inbound_path)
            .map_err(PipelineError::from)?;
        self.attempt_group(group, &model_name, req.relay_format, &req.body, &req.inbound_path, req.retryable)
            .await
            .map_err(|kind| PipelineError::new(kind, "upstream attempt failed"))
    }

    /// Dispatches to a standard group directly, or fans out across an
    /// aggregate group's enabled sub-groups (spec §4.5 "Aggregate groups").
    #[allow(clippy::too_many_arguments)]
    async fn attempt_group(
        &self,
        group: Arc<GroupRuntime>,
        model_name: &str,
        relay_format: RelayFormat,
        body: &Bytes,
        inbound_path: &str,
        retryable: bool,
    ) -> Result<PipelineResponse, ErrorKind> {
        if !group.is_aggregate() {
            return self
                .attempt_standard_group(&group, WeightTarget::Group(group.id), model_name, relay_format, body, inbound_path, retryable)
                .await;
        }

        let mut excluded_subs: HashSet<i64> = HashSet::new();
        let mut last_err = ErrorKind::NoActiveKeys;
        loop {
            let Some(sub) = self.pick_sub_group(&group, &excluded_subs).await else {
                return Err(last_err);
            };
            let target = WeightTarget::SubGroup { aggregate_id: group.id, sub_group_id: sub.id };
            match self.attempt_standard_group(&sub, target, model_name, relay_format, body, inbound_path, retryable).await {
                Ok(resp) => return Ok(resp),
                Err(kind) => {
                    excluded_subs.insert(sub.id);
                    last_err = kind;
                }
            }
        }
    }

    /// The core attempt loop against one group with its own upstream/key
    /// pool: pick key, rewrite, forward, classify, retry on transient/
    /// key-fatal outcomes up to `group.config.max_retries` — capped to a
    /// single attempt when the captured body lost retry eligibility (spec
    /// §4.8 "oversized bodies proceed without retry eligibility").
    #[allow(clippy::too_many_arguments)]
    async fn attempt_standard_group(
        &self,
        serving: &GroupRuntime,
        weight_target: WeightTarget,
        model_name: &str,
        relay_format: RelayFormat,
        body: &Bytes,
        inbound_path: &str,
        retryable: bool,
    ) -> Result<PipelineResponse, ErrorKind> {
        let Some(upstream) = pick_upstream(&serving.upstreams) else {
            return Err(ErrorKind::UpstreamFatalForGroup);
        };
        let rewritten_model = resolve_redirect(serving, model_name);
        let max_retries = if retryable { serving.config.max_retries.max(1) } else { 1 };
        let channel = native_handler(serving.channel_type);
        let mut excluded_keys: Vec<i64> = Vec::new();
        let mut last_err = ErrorKind::NoActiveKeys;

        for _ in 0..max_retries {
            let acquired = match self.keys.pick(serving.id, &excluded_keys).await {
                Ok(key) => key,
                Err(_) => return Err(ErrorKind::NoActiveKeys),
            };

            let body_value: serde_json::Value = serde_json::from_slice(body).unwrap_or(serde_json::Value::Null);
            let wants_stream = body_value.get("stream").and_then(serde_json::Value::as_bool).unwrap_or(false);
            let rewritten = match rewrite_for_relay(relay_format, serving.channel_type, body_value, &rewritten_model, &upstream.url, &acquired.plaintext) {
                Ok(r) => r,
                Err(_) => return Err(ErrorKind::Validation),
            };
            let _ = inbound_path;

            // A streaming request gets the read-timeout-disabled client
            // variant (spec §4.2): a slow SSE trickle must not be killed by
            // an overall response-header deadline meant for one-shot calls.
            let client = if wants_stream {
                self.clients.streaming(serving.id, &serving.config).await
            } else {
                self.clients.standard(serving.id, &serving.config).await
            };
            let client = match client {
                Ok(c) => c,
                Err(_) => return Err(ErrorKind::Internal),
            };
            let mut request = client.request(wreq::Method::POST, &rewritten.path).body(rewritten.body.to_vec());
            for (name, value) in &rewritten.headers {
                request = request.header(name, value);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let headers: Vec<(String, String)> = resp
                        .headers()
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
                        .collect();

                    if classify::Classified::is_success(status) {
                        // Outcome reporting happens now, right after headers
                        // arrive — it never waits on the body (spec §4.8:
                        // "the first byte latency is not delayed by Dynamic
                        // Weight or Key reporting").
                        self.keys.report(OutcomeReport { group_id: serving.id, key_id: acquired.key_id, outcome: Outcome::Success });
                        self.report_weight(weight_target, true).await;

                        let body = if needs_conversion(relay_format, serving.channel_type) {
                            // cc_support format conversion needs the whole
                            // body to re-shape it; not on the streaming path.
                            let resp_body = resp.bytes().await.unwrap_or_default();
                            let converted = convert_response(relay_format, serving.channel_type, status, resp_body, &rewritten_model)
                                .unwrap_or_else(|_| Bytes::new());
                            ResponseBody::Bytes(converted)
                        } else {
                            ResponseBody::Stream(spawn_stream_relay(resp))
                        };
                        return Ok(PipelineResponse { status, headers, body, group_id: serving.id, key_id: acquired.key_id });
                    }

                    let resp_body = resp.bytes().await.unwrap_or_default();
                    let kind = classify::classify_response(channel, status, &resp_body);
                    self.report_weight(weight_target, false).await;
                    last_err = kind;
                    if kind.retry_same_group() {
                        let outcome = if kind == ErrorKind::UpstreamFatalForKey { Outcome::KeyFatal } else { Outcome::Transient };
                        self.keys.report(OutcomeReport { group_id: serving.id, key_id: acquired.key_id, outcome });
                        excluded_keys.push(acquired.key_id);
                        continue;
                    }
                    return Err(kind);
                }
                Err(err) => {
                    let transport_kind = classify::classify_wreq_error(&err);
                    let kind = classify::classify_transport_failure(transport_kind);
                    self.keys.report(OutcomeReport { group_id: serving.id, key_id: acquired.key_id, outcome: Outcome::Transient });
                    self.report_weight(weight_target, false).await;
                    last_err = kind;
                    excluded_keys.push(acquired.key_id);
                    continue;
                }
            }
        }
        Err(last_err)
    }

    async fn report_weight(&self, target: WeightTarget, success: bool) {
        match target {
            WeightTarget::Group(id) => self.hub.weight.report_group(id, success).await,
            WeightTarget::SubGroup { aggregate_id, sub_group_id } => {
                self.hub.weight.report_sub_group(aggregate_id, sub_group_id, success).await
            }
        }
    }

    /// Weighted-random choice among an aggregate's enabled, healthy
    /// sub-groups (spec §4.5/§4.7), skipping anything already tried this
    /// request.
    async fn pick_sub_group(&self, aggregate: &GroupRuntime, excluded: &HashSet<i64>) -> Option<Arc<GroupRuntime>> {
        let edges = self.hub.groups.enabled_sub_groups(aggregate.id);
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let mut candidates: Vec<(Arc<GroupRuntime>, f64)> = Vec::new();
        for edge in edges {
            if excluded.contains(&edge.sub_group_id) {
                continue;
            }
            let Some(sub) = self.hub.groups.get_by_id(edge.sub_group_id) else { continue };
            if !sub.enabled {
                continue;
            }
            let health = self.hub.weight.group_score(sub.id, now).await;
            let weight = (edge.weight.max(0) as f64) * health;
            candidates.push((sub, weight.max(0.0)));
        }
        if candidates.is_empty() {
            return None;
        }
        let total: f64 = candidates.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return Some(candidates[0].0.clone());
        }
        let mut pick = rand::rng().random_range(0.0..total);
        for (sub, weight) in &candidates {
            if pick < *weight {
                return Some(sub.clone());
            }
            pick -= weight;
        }
        candidates.last().map(|(s, _)| s.clone())
    }
}

/// Relays a successful upstream response chunk-by-chunk through a bounded
/// channel instead of buffering the full body (spec §4.8 "Streaming"),
/// mirroring the teacher's `convert_response` stream spawn
/// (`gproxy-core/src/upstream_client/mod.rs`). Each chunk read is bounded by
/// [`STREAM_IDLE_TIMEOUT`]; the upstream body — and with it the underlying
/// connection — is dropped the moment the receiving end goes away, which is
/// exactly what happens when the client disconnects and the router drops
/// the response body stream (spec §5 "Client disconnect cancels the
/// upstream call").
fn spawn_stream_relay(resp: wreq::Response) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut stream = resp.bytes_stream();
        loop {
            let next = match tokio::time::timeout(STREAM_IDLE_TIMEOUT, stream.next()).await {
                Ok(next) => next,
                Err(_) => break, // idle timeout: upstream went quiet too long
            };
            let Some(item) = next else { break }; // upstream body finished
            let Ok(chunk) = item else { break }; // transport error mid-stream
            if tx.send(chunk).await.is_err() {
                break; // receiver dropped: client disconnected
            }
        }
    });
    rx
}

/// Weighted-random choice among a group's configured upstream endpoints
/// (spec §3 "Upstreams ... each carrying a weight").
fn pick_upstream(upstreams: &[keyhub_hub::group::UpstreamEndpoint]) -> Option<&keyhub_hub::group::UpstreamEndpoint> {
    if upstreams.is_empty() {
        return None;
    }
    let total: u32 = upstreams.iter().map(|u| u.weight.max(1)).sum();
    let mut pick = rand::rng().random_range(0..total.max(1));
    for upstream in upstreams {
        let weight = upstream.weight.max(1);
        if pick < weight {
            return Some(upstream);
        }
        pick -= weight;
    }
    upstreams.last()
}

/// Resolves `model_name` against a group's redirect rules, weighted-random
/// among tied targets (spec §4.6 "Model redirect rules"). A model with no
/// matching rule (an aggregate's custom model name with no rule on the
/// serving sub-group) passes through unchanged.
fn resolve_redirect(group: &GroupRuntime, model_name: &str) -> String {
    match group.model_redirect_rules.get(model_name) {
        Some(targets) if !targets.is_empty() => pick_redirect_target(targets),
        _ => model_name.to_string(),
    }
}

fn pick_redirect_target(targets: &[keyhub_hub::group::ModelRedirectTarget]) -> String {
    let total: u32 = targets.iter().map(|t| t.weight.max(1)).sum();
    let mut pick = rand::rng().random_range(0..total.max(1));
    for target in targets {
        let weight = target.weight.max(1);
        if pick < weight {
            return target.model.clone();
        }
        pick -= weight;
    }
    targets.last().map(|t| t.model.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(model: &str, weight: u32) -> keyhub_hub::group::ModelRedirectTarget {
        keyhub_hub::group::ModelRedirectTarget { model: model.to_string(), weight }
    }

    #[test]
    fn single_redirect_target_always_picked() {
        let targets = vec![target("gpt-4o", 1)];
        assert_eq!(pick_redirect_target(&targets), "gpt-4o");
    }

    #[test]
    fn pick_upstream_returns_none_when_empty() {
        assert!(pick_upstream(&[]).is_none());
    }

    #[test]
    fn pick_upstream_single_entry_is_deterministic() {
        let upstreams = vec![keyhub_hub::group::UpstreamEndpoint { url: "https://a".to_string(), weight: 1 }];
        assert_eq!(pick_upstream(&upstreams).unwrap().url, "https://a");
    }
}
