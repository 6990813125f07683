//! A remote messaging transport for a distributed actor system, carrying typed messages
//!  between two processes over UDP.
//!
//! ## Design goals
//!
//! * The transport is peer-to-peer without a dedicated server vs. client
//!   * each node binds a single UDP socket; all per-peer channels are multiplexed over it
//!   * peers are identified by their [node_addr::Address]; one specific *incarnation* of a
//!     peer process is identified by a 64-bit UID minted once per process start
//! * Three logically independent streams per peer, multiplexed by a stream id:
//!   * *control* (stream 1): transport protocol messages plus reliably delivered system
//!     messages
//!   * *ordinary* (stream 3): best-effort user messages, FIFO per stream relative to the
//!     producer but without delivery guarantees
//!   * *large* (stream 4): same semantics as ordinary, but with bigger frame buffers; the
//!     destination paths that use it are configured via wildcard patterns
//!   * across streams there is NO ordering guarantee
//! * A handshake assigns each peer incarnation its UID before user messages flow
//!   * the outbound side buffers messages until the peer's UID promise is fulfilled
//!   * a restarted peer shows up with a new UID and starts a new incarnation of its
//!     association; the old incarnation's state is retired atomically
//! * Failed or reincarnated peers can be *quarantined*: a quarantined UID stays banned for
//!   the life of the transport, and traffic in either direction is refused
//! * System messages (the actor system's internal coordination traffic) are delivered
//!   reliably and in order on top of the unreliable substrate, with a windowed
//!   resend/cumulative-ack protocol
//! * Pipelines restart on transient failure under a sliding-window restart budget; an
//!   exhausted budget surfaces as an event that obliges the host system to terminate
//!
//! Not goals: ordered delivery of ordinary user messages (best-effort, per-stream),
//!  encryption, cross-version protocol migration.
//!
//! ## Structure
//!
//! The [transport::Transport] owns the embedded [driver::MediaDriver] (socket + stream
//!  demultiplexing) and the three supervised inbound pipelines. Per peer, an
//!  [association::Association] holds the current [association::AssociationState] snapshot and
//!  owns three lazily materialized outbound sinks. The
//!  [association_registry::AssociationRegistry] maps addresses and UIDs to associations.
//!  Serialization of user payloads is not this crate's business - envelopes carry opaque
//!  payload bytes plus a serializer id and manifest string, compressed on the wire via
//!  advertisement-driven lookup tables (whose internals are a collaborator concern as well).

pub mod association;
pub mod association_registry;
pub mod buffers;
pub mod codec;
pub mod compression;
pub mod config;
pub mod control_messages;
pub mod dispatcher;
pub mod driver;
pub mod envelope;
pub mod events;
pub mod handshake;
pub mod inbound;
pub mod node_addr;
mod outbound;
pub mod restart_counter;
pub mod system_messages;
pub mod transport;
pub mod wildcard;

#[cfg(test)]
pub(crate) mod test_util {
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::broadcast;

    use crate::association::OutboundSetup;
    use crate::buffers::buffer_pool::EnvelopeBufferPool;
    use crate::config::RemotingConfig;
    use crate::driver::MediaDriver;
    use crate::envelope::OutboundEnvelopePool;
    use crate::events::TransportEventNotifier;
    use crate::node_addr::{Address, UniqueAddress};
    use crate::wildcard::WildcardMatcher;

    /// convenience for unit test code: the same number always gives the same address, and
    ///  different numbers give different addresses
    pub fn test_address(number: u16) -> Address {
        Address::new("test", SocketAddrV4::new(Ipv4Addr::LOCALHOST, number).into())
    }

    pub fn test_unique_address(number: u16, uid: u64) -> UniqueAddress {
        UniqueAddress::new(test_address(number), uid)
    }

    pub async fn test_outbound_setup() -> Arc<OutboundSetup> {
        test_outbound_setup_with(|_| {}).await
    }

    /// An [OutboundSetup] backed by a real loopback driver, with small buffer sizes to keep
    ///  tests light.
    pub async fn test_outbound_setup_with(adjust: impl FnOnce(&mut RemotingConfig)) -> Arc<OutboundSetup> {
        let driver = MediaDriver::start("127.0.0.1", 0, Duration::from_secs(20)).await.unwrap();
        let local_socket = driver.local_addr().unwrap();

        let mut config = RemotingConfig::new("test-local", "127.0.0.1", 0);
        adjust(&mut config);
        let config = Arc::new(config);

        Arc::new(OutboundSetup {
            local_address: UniqueAddress::new(Address::new("test-local", local_socket), 1),
            matcher: Arc::new(WildcardMatcher::new(config.large_message_destinations.iter())),
            config,
            driver,
            events: Arc::new(TransportEventNotifier::new()),
            ordinary_buffers: Arc::new(EnvelopeBufferPool::new(64 * 1024, 32)),
            large_buffers: Arc::new(EnvelopeBufferPool::new(256 * 1024, 32)),
            outbound_envelopes: Arc::new(OutboundEnvelopePool::new(64)),
            kill_switch: broadcast::channel(1).0,
        })
    }
}

#[cfg(test)]
mod test {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::DEBUG)
            .try_init()
            .ok();
    }
}
