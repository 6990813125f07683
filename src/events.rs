use std::sync::Arc;

use anyhow::anyhow;
use rustc_hash::FxHashMap;
use tokio::spawn;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::node_addr::{Address, UniqueAddress};

/// Lifecycle events published by the transport. Consumers subscribe through
///  [TransportEventNotifier]; the transport itself never acts on these events except for
///  [TransportEvent::TransportFailed], which it publishes on its way down.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// the handshake with a peer incarnation completed, fulfilling the UID promise
    HandshakeCompleted { peer: UniqueAddress },
    /// this node decided to quarantine a peer incarnation
    PeerQuarantined { remote: Address, uid: Option<u64>, reason: String },
    /// a peer notified us that it quarantined this node
    ThisSystemQuarantined { local: Address, remote: Address },
    /// an inbound envelope was dropped before dispatch
    InboundDropped { uid: u64, reason: String },
    /// a compression advertisement was recorded in a peer's outbound table
    CompressionAdvertised { peer: UniqueAddress, kind: CompressionKind, id: u32 },
    /// the restart budget of an inbound pipeline is exhausted; the transport shuts down and
    ///  the host system is expected to terminate on observing this
    TransportFailed { reason: String },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompressionKind {
    ActorRef,
    ClassManifest,
}

#[async_trait::async_trait]
pub trait TransportEventListener: Sync + Send {
    async fn on_transport_event(&self, event: TransportEvent);
}

pub struct TransportEventNotifier {
    listeners: RwLock<FxHashMap<Uuid, Arc<dyn TransportEventListener>>>,
}
impl TransportEventNotifier {
    pub fn new() -> TransportEventNotifier {
        TransportEventNotifier {
            listeners: Default::default(),
        }
    }

    /// The returned key is the handle for removing the listener later.
    pub async fn add_listener(&self, listener: Arc<dyn TransportEventListener>) -> Uuid {
        let id = Uuid::new_v4();
        self.listeners.write().await
            .insert(id, listener);
        id
    }

    pub async fn try_remove_listener(&self, listener_id: &Uuid) -> anyhow::Result<()> {
        match self.listeners.write().await
            .remove(listener_id)
        {
            None => Err(anyhow!("tried to remove a listener that was not (no longer?) registered: {}", listener_id)),
            Some(_) => Ok(()),
        }
    }

    /// Notify all listeners. Each listener is called in its own task so a slow listener cannot
    ///  stall the pipeline that published the event.
    pub async fn publish(&self, event: TransportEvent) {
        let listeners = self.listeners.read().await
            .values()
            .cloned()
            .collect::<Vec<_>>();
        for l in listeners {
            let evt = event.clone();
            spawn(async move { l.on_transport_event(evt).await });
        }
    }
}
