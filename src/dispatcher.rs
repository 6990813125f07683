use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

use crate::envelope::InboundEnvelope;

/// The seam between the transport and the actor system's message dispatch: decoded envelopes
///  end up here. Implementations must tolerate concurrent calls from the three inbound
///  pipelines.
///
/// It is passed around as an `Arc<dyn ...>` so the inbound pipelines stay independent of the
///  hosting actor system.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageDispatcher: Send + Sync + 'static {
    async fn dispatch(&self, envelope: &InboundEnvelope);
}
