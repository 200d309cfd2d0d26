//! Implements `keyhub_keypool::restore::KeyValidator` (spec §4.3
//! "Restoration"), issuing the minimal upstream request that proves a
//! blacklisted credential is valid again: a `test_model` completion through
//! the group's own channel handler and client, same shape as any other
//! pipeline attempt but with a single retry-free call.

use std::sync::Arc;

use async_trait::async_trait;
use keyhub_channels::registry::native_handler;
use keyhub_hub::GroupCache;

use crate::client::HttpClientPool;

pub struct UpstreamKeyValidator {
    groups: Arc<GroupCache>,
    clients: Arc<HttpClientPool>,
}

impl UpstreamKeyValidator {
    pub fn new(groups: Arc<GroupCache>, clients: Arc<HttpClientPool>) -> Self {
        Self { groups, clients }
    }
}

#[async_trait]
impl keyhub_keypool::restore::KeyValidator for UpstreamKeyValidator {
    async fn validate(&self, group_id: i64, plaintext_key: &str) -> bool {
        let Some(group) = self.groups.get_by_id(group_id) else {
            return false;
        };
        let Some(test_model) = group.test_model.clone() else {
            // No test_model configured: nothing to probe, so we can't confirm
            // the key works. Leave it blacklisted rather than guess.
            return false;
        };
        let Some(upstream) = group.upstreams.first() else {
            return false;
        };
        let handler = native_handler(group.channel_type);
        let body = serde_json::json!({ "model": test_model });
        let Ok(rewritten) = handler.rewrite_request(body, &test_model, &upstream.url, plaintext_key) else {
            return false;
        };
        let Ok(client) = self.clients.standard(group_id, &group.config).await else {
            return false;
        };
        let mut request = client.request(wreq::Method::POST, &rewritten.path).body(rewritten.body.to_vec());
        for (name, value) in &rewritten.headers {
            request = request.header(name, value);
        }
        match request.send().await {
            Ok(resp) => resp.status().as_u16() < 500 && resp.status().as_u16() != 401 && resp.status().as_u16() != 403,
            Err(_) => false,
        }
    }
}
