//! The HTTP surface (spec §6 "External interfaces"): the served Hub/direct
//! proxy routes and the admin CRUD surface, merged into the one `Router`
//! `apps/keyhub` serves. The only crate in the workspace allowed to depend
//! on `axum` directly, mirroring the split the teacher keeps between its
//! engine crates and `gproxy-router`.

pub mod admin;
pub mod error;
pub mod proxy;
mod relay;

use std::sync::Arc;

use axum::Router;
use keyhub_cluster::Node;

pub fn router(node: Arc<Node>) -> Router {
    Router::new().merge(proxy::router(node.clone())).merge(admin::router(node))
}
