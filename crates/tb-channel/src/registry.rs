//! Per-capability sign-in registry.
//!
//! Backed by a `tokio::sync::watch` channel holding the set of signed-in
//! endpoints. Waiting checks the current set before parking, so a sign-in
//! that happened before the wait started is never missed.

use std::collections::HashSet;

use tb_core::EndpointId;
use tokio::sync::watch;
use tracing::debug;

use crate::protocol::Capability;

pub struct SignInRegistry {
    capability: Capability,
    signed_in: watch::Sender<HashSet<EndpointId>>,
}

impl SignInRegistry {
    pub fn new(capability: Capability) -> Self {
        let (signed_in, _) = watch::channel(HashSet::new());
        Self {
            capability,
            signed_in,
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn sign_in(&self, endpoint: EndpointId) {
        debug!(capability = %self.capability, endpoint = %endpoint, "signed in");
        self.signed_in.send_if_modified(|set| set.insert(endpoint));
    }

    pub fn sign_out(&self, endpoint: &EndpointId) {
        if self.signed_in.send_if_modified(|set| set.remove(endpoint)) {
            debug!(capability = %self.capability, endpoint = %endpoint, "signed out");
        }
    }

    pub fn is_signed_in(&self, endpoint: &EndpointId) -> bool {
        self.signed_in.borrow().contains(endpoint)
    }

    pub fn signed_in(&self) -> Vec<EndpointId> {
        self.signed_in.borrow().iter().cloned().collect()
    }

    /// Resolves once `endpoint` is signed in, immediately if it already is.
    pub async fn wait_for(&self, endpoint: &EndpointId) {
        let mut rx = self.signed_in.subscribe();
        // The sender lives as long as `self`, so this cannot observe a
        // closed channel while borrowed.
        let _ = rx.wait_for(|set| set.contains(endpoint)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_resolves_immediately_when_already_signed_in() {
        let registry = SignInRegistry::new(Capability::Commands);
        let worker = EndpointId::for_worker(42);
        registry.sign_in(worker.clone());

        tokio::time::timeout(Duration::from_millis(50), registry.wait_for(&worker))
            .await
            .expect("should not wait for an existing sign-in");
    }

    #[tokio::test]
    async fn wait_ignores_other_endpoints() {
        let registry = std::sync::Arc::new(SignInRegistry::new(Capability::Notifications));
        let target = EndpointId::for_worker(1);
        let other = EndpointId::for_worker(2);

        let waiter = {
            let registry = registry.clone();
            let target = target.clone();
            tokio::spawn(async move { registry.wait_for(&target).await })
        };

        registry.sign_in(other);
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        registry.sign_in(target);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should resolve")
            .unwrap();
    }

    #[test]
    fn sign_out_removes_endpoint() {
        let registry = SignInRegistry::new(Capability::Commands);
        let worker = EndpointId::for_worker(7);
        registry.sign_in(worker.clone());
        assert!(registry.is_signed_in(&worker));
        registry.sign_out(&worker);
        assert!(!registry.is_signed_in(&worker));
        assert!(registry.signed_in().is_empty());
    }
}
