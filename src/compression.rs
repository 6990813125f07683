use std::sync::RwLock;

use rustc_hash::FxHashMap;

/// Outbound view of a peer's compression table: maps actor-ref paths and class manifests to
///  the small integer ids the peer advertised. The table internals (id allocation, heavy
///  hitter detection, table versioning) live outside this core - the encoder only performs
///  lookups, and the control stream only records advertisements.
pub trait OutboundCompression: Send + Sync {
    fn compress_actor_ref(&self, path: &str) -> Option<u32>;
    fn compress_manifest(&self, manifest: &str) -> Option<u32>;

    fn advertise_actor_ref(&self, path: String, id: u32);
    fn advertise_manifest(&self, manifest: String, id: u32);
}

pub struct OutboundCompressionTable {
    actor_refs: RwLock<FxHashMap<String, u32>>,
    manifests: RwLock<FxHashMap<String, u32>>,
}
impl OutboundCompressionTable {
    pub fn new() -> OutboundCompressionTable {
        OutboundCompressionTable {
            actor_refs: Default::default(),
            manifests: Default::default(),
        }
    }
}
impl OutboundCompression for OutboundCompressionTable {
    fn compress_actor_ref(&self, path: &str) -> Option<u32> {
        self.actor_refs.read().unwrap().get(path).copied()
    }

    fn compress_manifest(&self, manifest: &str) -> Option<u32> {
        self.manifests.read().unwrap().get(manifest).copied()
    }

    fn advertise_actor_ref(&self, path: String, id: u32) {
        self.actor_refs.write().unwrap().insert(path, id);
    }

    fn advertise_manifest(&self, manifest: String, id: u32) {
        self.manifests.write().unwrap().insert(manifest, id);
    }
}

/// Sentinel installed when a peer is quarantined (or when compression is disabled): nothing is
///  ever compressed, and advertisements are silently discarded.
pub struct NoOutboundCompression;
impl OutboundCompression for NoOutboundCompression {
    fn compress_actor_ref(&self, _path: &str) -> Option<u32> {
        None
    }

    fn compress_manifest(&self, _manifest: &str) -> Option<u32> {
        None
    }

    fn advertise_actor_ref(&self, _path: String, _id: u32) {}

    fn advertise_manifest(&self, _manifest: String, _id: u32) {}
}

/// Inbound counterpart: resolves compressed ids from frames back to the strings this node
///  advertised. An id that cannot be resolved is a hard decode error for that envelope.
pub trait InboundCompression: Send + Sync {
    fn decompress_actor_ref(&self, id: u32) -> Option<String>;
    fn decompress_manifest(&self, id: u32) -> Option<String>;

    fn record_actor_ref(&self, id: u32, path: String);
    fn record_manifest(&self, id: u32, manifest: String);
}

pub struct InboundCompressionTable {
    actor_refs: RwLock<FxHashMap<u32, String>>,
    manifests: RwLock<FxHashMap<u32, String>>,
}
impl InboundCompressionTable {
    pub fn new() -> InboundCompressionTable {
        InboundCompressionTable {
            actor_refs: Default::default(),
            manifests: Default::default(),
        }
    }
}
impl InboundCompression for InboundCompressionTable {
    fn decompress_actor_ref(&self, id: u32) -> Option<String> {
        self.actor_refs.read().unwrap().get(&id).cloned()
    }

    fn decompress_manifest(&self, id: u32) -> Option<String> {
        self.manifests.read().unwrap().get(&id).cloned()
    }

    fn record_actor_ref(&self, id: u32, path: String) {
        self.actor_refs.write().unwrap().insert(id, path);
    }

    fn record_manifest(&self, id: u32, manifest: String) {
        self.manifests.write().unwrap().insert(id, manifest);
    }
}
