//! Browser context lifecycle seam
//!
//! Browser rendering and automation internals live outside this crate. The
//! scheduler only needs four things from whatever drives the browser: acquire
//! a page for a profile (optionally through a proxy), close it, answer a
//! health probe, and restart the whole browser when it is judged wedged.

use async_trait::async_trait;
use uuid::Uuid;

use super::AccountProfile;
use crate::proxy::record::ProxyEndpoint;

/// Opaque handle to an acquired browser page/context
///
/// The implementation maps `id` back to its real page object; the scheduler
/// only threads the handle through to the executor and back to `close_page`.
#[derive(Debug, Clone)]
pub struct PageHandle {
    pub id: Uuid,
    pub profile_id: String,
    /// Normalized key of the proxy the context was bound to, if any
    pub proxy_key: Option<String>,
}

impl PageHandle {
    pub fn new(profile_id: impl Into<String>, proxy_key: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            profile_id: profile_id.into(),
            proxy_key,
        }
    }
}

/// Browser context lifecycle operations consumed by the job wrapper
#[async_trait]
pub trait BrowserManager: Send + Sync {
    /// Acquire a fresh page for a profile, routed through `proxy` when given
    async fn acquire_page(
        &self,
        profile: &AccountProfile,
        proxy: Option<&ProxyEndpoint>,
    ) -> anyhow::Result<PageHandle>;

    /// Close an acquired page; errors are logged by the caller, never fatal
    async fn close_page(&self, page: PageHandle) -> anyhow::Result<()>;

    /// Cheap liveness probe
    async fn is_healthy(&self) -> bool;

    /// Tear down and relaunch the browser
    async fn restart(&self) -> anyhow::Result<()>;
}
