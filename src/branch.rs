//! Hierarchical branch namespaces
//!
//! A branch is a proxy over an instance that prepends its path to every
//! channel id. Branches nest by path-joining ids; destruction marks the
//! branch inactive and tears its channels down asynchronously.

use crate::context::{Cyre, Subscription};
use crate::registry::BranchRecord;
use crate::types::{CallResult, ChannelConfig, HandlerFn, Payload, RegisterResult};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

/// A namespaced view of a `Cyre` instance
#[derive(Clone)]
pub struct Branch {
    cyre: Cyre,
    record: Arc<BranchRecord>,
}

impl Branch {
    pub(crate) fn new(cyre: Cyre, id: &str) -> Self {
        let record = cyre.inner().registry.insert_branch(id);
        Self { cyre, record }
    }

    /// Full path of this branch
    pub fn path(&self) -> &str {
        &self.record.path
    }

    /// Whether the branch has been destroyed. Channel teardown is
    /// asynchronous, so channels may outlive a `false` here briefly.
    pub fn is_active(&self) -> bool {
        self.record.active.load(Ordering::SeqCst)
    }

    fn global_id(&self, id: &str) -> String {
        format!("{}/{}", self.record.path, id)
    }

    /// Nested branch; paths '/'-join
    pub fn branch(&self, id: &str) -> Branch {
        Branch::new(self.cyre.clone(), &self.global_id(id))
    }

    /// Register a channel under this branch's path
    pub fn action(&self, mut config: ChannelConfig) -> RegisterResult {
        if !self.is_active() {
            return RegisterResult::rejected(format!(
                "branch {} is destroyed",
                self.record.path
            ));
        }
        if config.id.is_empty() {
            return RegisterResult::rejected("channel id must not be empty");
        }
        config.id = self.global_id(&config.id);
        config.path = Some(self.record.path.clone());
        self.cyre.action(config)
    }

    /// Subscribe under this branch's path
    pub fn on(&self, id: &str, handler: HandlerFn) -> Subscription {
        self.cyre.on(&self.global_id(id), handler)
    }

    /// Call under this branch's path
    pub async fn call(&self, id: &str, payload: Payload) -> CallResult {
        self.cyre.call(&self.global_id(id), payload).await
    }

    pub fn get(&self, id: &str) -> Option<Payload> {
        self.cyre.get(&self.global_id(id))
    }

    pub fn forget(&self, id: &str) -> bool {
        self.cyre.forget(&self.global_id(id))
    }

    /// Mark the branch inactive and schedule teardown of every channel
    /// under its path. Returns immediately; teardown is asynchronous.
    pub fn destroy(&self) -> bool {
        self.record.active.store(false, Ordering::SeqCst);
        let cyre = self.cyre.clone();
        let path = self.record.path.clone();
        tokio::spawn(async move {
            let ids = cyre.inner().registry.channels_under(&path);
            debug!(%path, channels = ids.len(), "branch teardown");
            for id in ids {
                cyre.forget(&id);
            }
        });
        true
    }
}

impl std::fmt::Debug for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch")
            .field("path", &self.record.path)
            .field("active", &self.is_active())
            .finish()
    }
}
