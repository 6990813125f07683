use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::association::{Association, AssociationKey, OutboundSetup};
use crate::node_addr::{Address, UniqueAddress};

/// Maps remote addresses (and, once the handshake completed, UIDs) to [Association]s.
///  Associations are created lazily and never removed during the transport's lifetime; on
///  reincarnation a UID entry may become stale, logically shadowed by the address-indexed
///  association's current state.
pub struct AssociationRegistry {
    setup: Arc<OutboundSetup>,
    by_address: RwLock<FxHashMap<Address, Arc<Association>>>,
    by_uid: RwLock<FxHashMap<u64, Arc<Association>>>,
    by_key: RwLock<Vec<Arc<Association>>>,
}

impl AssociationRegistry {
    pub fn new(setup: Arc<OutboundSetup>) -> AssociationRegistry {
        AssociationRegistry {
            setup,
            by_address: Default::default(),
            by_uid: Default::default(),
            by_key: Default::default(),
        }
    }

    /// Get or create the association for a remote address. Concurrent calls for the same
    ///  address return the same instance. Asking for the local address is a caller bug.
    pub fn association(&self, remote: &Address) -> Arc<Association> {
        assert_ne!(remote, &self.setup.local_address.address,
                   "an association for the local address must never be requested");

        if let Some(existing) = self.by_address.read().unwrap().get(remote) {
            return existing.clone();
        }

        let mut by_address = self.by_address.write().unwrap();
        // double-checked: another thread may have created it while we waited for the lock
        if let Some(existing) = by_address.get(remote) {
            return existing.clone();
        }

        let mut by_key = self.by_key.write().unwrap();
        let key = AssociationKey(by_key.len() as u32);
        debug!("creating association for {:?} with key {:?}", remote, key);
        let association = Association::new(self.setup.clone(), remote.clone(), key);
        by_key.push(association.clone());
        by_address.insert(remote.clone(), association.clone());
        association
    }

    /// None until the handshake for that UID has completed (via [AssociationRegistry::set_uid]).
    pub fn association_by_uid(&self, uid: u64) -> Option<Arc<Association>> {
        self.by_uid.read().unwrap().get(&uid).cloned()
    }

    /// O(1) lookup through a cached [AssociationKey].
    pub fn association_by_key(&self, key: AssociationKey) -> Arc<Association> {
        self.by_key.read().unwrap()[key.0 as usize].clone()
    }

    /// Register the peer's UID with its address-indexed association; idempotent.
    pub fn set_uid(&self, peer: &UniqueAddress) -> Arc<Association> {
        let association = self.association(&peer.address);
        self.by_uid.write().unwrap()
            .entry(peer.uid)
            .or_insert_with(|| association.clone());
        association
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::test_util::{test_address, test_outbound_setup, test_unique_address};

    #[tokio::test]
    async fn test_same_instance_for_same_address() {
        let registry = AssociationRegistry::new(test_outbound_setup().await);

        let a1 = registry.association(&test_address(9));
        let a2 = registry.association(&test_address(9));
        let b = registry.association(&test_address(10));

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_instance_under_concurrency() {
        let registry = Arc::new(AssociationRegistry::new(test_outbound_setup().await));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.association(&test_address(9))
            }));
        }

        let first = registry.association(&test_address(9));
        for handle in handles {
            let assoc = handle.await.unwrap();
            assert!(Arc::ptr_eq(&first, &assoc));
        }
    }

    #[tokio::test]
    async fn test_by_uid_requires_set_uid() {
        let registry = AssociationRegistry::new(test_outbound_setup().await);
        let _ = registry.association(&test_address(9));

        assert!(registry.association_by_uid(111).is_none());

        let from_set_uid = registry.set_uid(&test_unique_address(9, 111));
        let by_uid = registry.association_by_uid(111).unwrap();
        assert!(Arc::ptr_eq(&from_set_uid, &by_uid));

        // idempotent
        let again = registry.set_uid(&test_unique_address(9, 111));
        assert!(Arc::ptr_eq(&again, &by_uid));
    }

    #[tokio::test]
    async fn test_by_key_round_trip() {
        let registry = AssociationRegistry::new(test_outbound_setup().await);

        let a = registry.association(&test_address(9));
        let b = registry.association(&test_address(10));

        assert!(Arc::ptr_eq(&registry.association_by_key(a.key()), &a));
        assert!(Arc::ptr_eq(&registry.association_by_key(b.key()), &b));
    }

    #[tokio::test]
    #[should_panic(expected = "local address")]
    async fn test_association_for_local_address_panics() {
        let setup = test_outbound_setup().await;
        let local = setup.local_address.address.clone();
        let registry = AssociationRegistry::new(setup);

        registry.association(&local);
    }

    #[tokio::test]
    async fn test_reincarnation_keeps_old_uid_mapping() {
        let registry = AssociationRegistry::new(test_outbound_setup().await);

        let assoc = registry.set_uid(&test_unique_address(9, 111));
        assoc.complete_handshake(test_unique_address(9, 111)).await;

        let assoc2 = registry.set_uid(&test_unique_address(9, 222));
        assoc2.complete_handshake(test_unique_address(9, 222)).await;

        // the old entry remains, shadowed by the association's current state
        let stale = registry.association_by_uid(111).unwrap();
        assert!(Arc::ptr_eq(&stale, &assoc));
        assert_eq!(stale.state().unique_remote_address(), Some(test_unique_address(9, 222)));
    }
}
