use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use super::{TenantEngine, TenantId};

#[derive(Default)]
struct Engines {
    by_tenant: HashMap<TenantId, Arc<TenantEngine>>,
    closed: bool,
}

/// Published tenant engines plus per-tenant operation locks.
///
/// Readers only ever see engines that finished starting: an engine is inserted
/// by [`TenantRegistry::publish`] after its start succeeded. Once
/// [`TenantRegistry::drain`] ran, publishing is refused.
#[derive(Default)]
pub struct TenantRegistry {
    engines: RwLock<Engines>,
    locks: DashMap<TenantId, Arc<tokio::sync::Mutex<()>>>,
}

impl TenantRegistry {
    /// Lock serializing assign/remove for one tenant.
    pub fn lock_for(&self, tenant: &TenantId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(tenant.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Forget the lock of `tenant` once nobody holds or awaits it.
    pub fn prune_lock(&self, tenant: &TenantId) {
        self.locks.remove_if(tenant, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.len()
    }

    pub fn get(&self, tenant: &TenantId) -> Option<Arc<TenantEngine>> {
        self.engines.read().by_tenant.get(tenant).cloned()
    }

    pub fn tenant_ids(&self) -> Vec<TenantId> {
        let mut ids: Vec<_> = self.engines.read().by_tenant.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn count(&self) -> usize {
        self.engines.read().by_tenant.len()
    }

    /// Make a started engine visible. Returns it back if the registry was drained.
    pub fn publish(&self, engine: Arc<TenantEngine>) -> Result<(), Arc<TenantEngine>> {
        let mut engines = self.engines.write();
        if engines.closed {
            return Err(engine);
        }
        engines.by_tenant.insert(engine.tenant_id().clone(), engine);
        Ok(())
    }

    pub fn remove(&self, tenant: &TenantId) -> Option<Arc<TenantEngine>> {
        self.engines.write().by_tenant.remove(tenant)
    }

    /// Take every engine and refuse further publishing.
    pub fn drain(&self) -> Vec<Arc<TenantEngine>> {
        let mut engines = self.engines.write();
        engines.closed = true;
        engines.by_tenant.drain().map(|(_, engine)| engine).collect()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::tenant::Tenant;

    fn engine(id: &str) -> Arc<TenantEngine> {
        Arc::new(TenantEngine::new("svc", Tenant::new(id), Vec::new()))
    }

    #[test]
    fn publish_then_drain_closes_registry() {
        let registry = TenantRegistry::default();
        registry.publish(engine("b")).unwrap();
        registry.publish(engine("a")).unwrap();

        assert_eq!(registry.tenant_ids(), vec![TenantId::from("a"), TenantId::from("b")]);
        assert_eq!(registry.count(), 2);

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(registry.count(), 0);
        assert!(registry.publish(engine("c")).is_err());
    }

    #[test]
    fn lock_for_returns_shared_lock_per_tenant() {
        let registry = TenantRegistry::default();
        let a1 = registry.lock_for(&TenantId::from("a"));
        let a2 = registry.lock_for(&TenantId::from("a"));
        let b = registry.lock_for(&TenantId::from("b"));

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }

    #[test]
    fn prune_lock_keeps_locks_still_referenced() {
        let registry = TenantRegistry::default();
        let tenant = TenantId::from("a");
        let held = registry.lock_for(&tenant);
        let _other = registry.lock_for(&TenantId::from("b"));
        assert_eq!(registry.lock_count(), 2);

        registry.prune_lock(&tenant);
        assert_eq!(registry.lock_count(), 2);
        assert!(Arc::ptr_eq(&held, &registry.lock_for(&tenant)));

        drop(held);
        registry.prune_lock(&tenant);
        assert_eq!(registry.lock_count(), 1);
    }
}
