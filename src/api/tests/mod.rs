//! API tests
//!
//! - chat_completion: `/chat/completions` success, failure and validation paths
//! - models: `/v1/models` listing and the load/unload endpoints
//! - health: `/health` and `/metrics`

mod health;
mod models;
