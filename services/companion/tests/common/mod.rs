//! Shared setup for the integration tests: an in-memory SQLite backend with
//! cheap password hashing.

#![allow(dead_code)]

use argon2::Params;
use companion_lib::adapters::{AuthAdapter, Backend, DbAdapter};
use companion_lib::config::Config;
use minduni_core::{JournalFeed, JournalView, ProvisioningPolicy, SessionContext, SessionState};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

pub const PROJECT: &str = "minduni-test";
pub const API_KEY: &str = "test-key";
pub const WAIT: Duration = Duration::from_secs(5);

pub fn test_config() -> Config {
    Config::from_lookup(|key| match key {
        "BACKEND_PROJECT_ID" => Some(PROJECT.to_string()),
        "BACKEND_API_KEY" => Some(API_KEY.to_string()),
        "DATABASE_URL" => Some("sqlite::memory:".to_string()),
        "PROFILE_PROVISION_BACKOFF_MS" => Some("1".to_string()),
        "CHAT_REPLY_DELAY_MS" => Some("0".to_string()),
        _ => None,
    })
    .expect("test configuration is valid")
}

pub async fn open_backend() -> (Arc<AuthAdapter>, Arc<DbAdapter>) {
    let config = test_config();
    let backend = Backend::open(&config).await.expect("backend opens");
    let auth = AuthAdapter::new(backend.store.pool().clone(), PROJECT, config.min_password_len)
        .with_hash_params(Params::new(1024, 1, 1, None).expect("valid argon2 params"));
    (Arc::new(auth), backend.store)
}

pub fn start_session(auth: &Arc<AuthAdapter>, store: &Arc<DbAdapter>) -> SessionContext {
    SessionContext::start(
        auth.clone(),
        store.clone(),
        ProvisioningPolicy {
            attempts: 2,
            backoff: Duration::from_millis(1),
        },
    )
}

pub async fn settle_session<F>(session: &SessionContext, pred: F) -> SessionState
where
    F: FnMut(&SessionState) -> bool,
{
    let mut rx = session.subscribe();
    let state = timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("session did not settle in time")
        .expect("session channel closed");
    state.clone()
}

pub async fn settle_feed<F>(feed: &JournalFeed, pred: F) -> JournalView
where
    F: FnMut(&JournalView) -> bool,
{
    let mut rx = feed.subscribe();
    let view = timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("journal did not settle in time")
        .expect("journal channel closed");
    view.clone()
}
