//! Transport lifecycle: `start` brings up the media driver, mints the local UID, starts the
//!  three supervised inbound pipelines and the error-log poller; `shutdown` is idempotent and
//!  pulls the shared kill switch that all pipelines and sinks are gated through.

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::select;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::association::{Association, AssociationKey, AssociationState, OutboundSetup};
use crate::association_registry::AssociationRegistry;
use crate::buffers::buffer_pool::{EnvelopeBufferPool, MAX_FRAME_SIZE, MAX_LARGE_FRAME_SIZE, MAX_POOLED_BUFFERS};
use crate::config::RemotingConfig;
use crate::control_messages::ControlMessage;
use crate::dispatcher::MessageDispatcher;
use crate::driver::{DriverErrorKind, MediaDriver, LARGE_STREAM_ID, ORDINARY_STREAM_ID};
use crate::envelope::{InboundEnvelopePool, OutboundEnvelopePool};
use crate::events::{TransportEvent, TransportEventNotifier};
use crate::inbound::{self, CompressionObserver, ControlJunction, ControlMessageObserver, QuarantineObserver};
use crate::node_addr::{Address, UniqueAddress};
use crate::restart_counter::RestartCounter;
use crate::system_messages::SystemSend;
use crate::wildcard::WildcardMatcher;

/// The view inbound stages get of the transport.
#[async_trait]
pub trait InboundContext: Send + Sync {
    fn local_address(&self) -> &UniqueAddress;

    fn association(&self, remote: &Address) -> Arc<Association>;

    fn association_by_uid(&self, uid: u64) -> Option<Arc<Association>>;

    async fn complete_handshake(&self, peer: UniqueAddress) -> Arc<Association>;

    async fn send_control(&self, to: &Address, message: ControlMessage);
}

/// The view outbound stages get of their association; the handshake gate runs entirely
///  against this seam.
#[async_trait]
pub trait OutboundContext: Send + Sync {
    fn local_address(&self) -> &UniqueAddress;

    fn remote_address(&self) -> &Address;

    fn association_state(&self) -> Arc<AssociationState>;

    async fn quarantine(&self, reason: &str, uid: Option<u64>);

    async fn send_control(&self, message: ControlMessage);

    fn control_subject(&self) -> broadcast::Receiver<ControlMessage>;
}

#[async_trait]
impl OutboundContext for Association {
    fn local_address(&self) -> &UniqueAddress {
        &self.setup().local_address
    }

    fn remote_address(&self) -> &Address {
        Association::remote_address(self)
    }

    fn association_state(&self) -> Arc<AssociationState> {
        Association::state(self)
    }

    async fn quarantine(&self, reason: &str, uid: Option<u64>) {
        Association::quarantine(self, reason, uid).await
    }

    async fn send_control(&self, message: ControlMessage) {
        Association::send_control(self, message).await
    }

    fn control_subject(&self) -> broadcast::Receiver<ControlMessage> {
        Association::control_subject(self)
    }
}

pub(crate) struct TransportInner {
    setup: Arc<OutboundSetup>,
    pub(crate) registry: AssociationRegistry,
    pub(crate) dispatcher: Arc<dyn MessageDispatcher>,
    pub(crate) junction: ControlJunction,
    pub(crate) inbound_envelopes: InboundEnvelopePool,
    shutdown: Arc<AtomicBool>,
    restarts: Arc<RestartCounter>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TransportInner {
    pub(crate) fn local_address(&self) -> &UniqueAddress {
        &self.setup.local_address
    }

    pub(crate) fn driver(&self) -> &Arc<MediaDriver> {
        &self.setup.driver
    }

    pub(crate) fn events(&self) -> &Arc<TransportEventNotifier> {
        &self.setup.events
    }

    pub(crate) fn config(&self) -> &Arc<RemotingConfig> {
        &self.setup.config
    }

    pub(crate) fn inbound_queue_depth(&self) -> usize {
        128 * self.setup.config.idle_cpu_level as usize
    }

    pub(crate) fn is_quarantined_uid(&self, uid: u64) -> bool {
        self.registry.association_by_uid(uid)
            .map(|association| association.state().is_quarantined(uid))
            .unwrap_or(false)
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// returns true for the caller that actually flipped the flag
    fn initiate_shutdown(&self) -> bool {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return false;
        }
        info!("shutting down transport at {:?}", self.local_address());
        let _ = self.setup.kill_switch.send(());
        self.setup.driver.shutdown();
        true
    }
}

#[async_trait]
impl InboundContext for TransportInner {
    fn local_address(&self) -> &UniqueAddress {
        TransportInner::local_address(self)
    }

    fn association(&self, remote: &Address) -> Arc<Association> {
        self.registry.association(remote)
    }

    fn association_by_uid(&self, uid: u64) -> Option<Arc<Association>> {
        self.registry.association_by_uid(uid)
    }

    async fn complete_handshake(&self, peer: UniqueAddress) -> Arc<Association> {
        let association = self.registry.set_uid(&peer);
        association.complete_handshake(peer).await;
        association
    }

    async fn send_control(&self, to: &Address, message: ControlMessage) {
        self.registry.association(to).send_control(message).await;
    }
}

pub(crate) struct Supervision {
    pub shutdown: Arc<AtomicBool>,
    pub restarts: Arc<RestartCounter>,
}

/// Run a pipeline under restart supervision: relaunch on failure while the restart budget
///  grants it, swallow failures during shutdown, and report `Err` once the budget is
///  exhausted (the caller decides what "terminate" means).
///
/// NB: The kill switch receiver must be subscribed *before* the transport can shut down, or
///  the pull can be missed - callers subscribe synchronously during startup.
pub(crate) async fn supervise<Fut>(
    name: &'static str,
    supervision: &Supervision,
    mut kill: broadcast::Receiver<()>,
    mut pipeline: impl FnMut() -> Fut,
) -> anyhow::Result<()>
where
    Fut: Future<Output = anyhow::Result<()>>,
{
    loop {
        let finished = select! {
            _ = kill.recv() => return Ok(()),
            r = pipeline() => r,
        };
        match finished {
            Ok(()) => return Ok(()),
            Err(e) => {
                if supervision.shutdown.load(Ordering::Acquire) {
                    debug!("ignoring failure of the {} pipeline during shutdown: {}", name, e);
                    return Ok(());
                }
                if supervision.restarts.attempt_restart() {
                    warn!("restarting the {} pipeline: {}", name, e);
                    continue;
                }
                return Err(e);
            }
        }
    }
}

#[derive(Clone, Copy)]
enum PipelineKind {
    Control,
    Ordinary,
    Large,
}

/// The remote messaging transport. One instance per actor system; created with
///  [Transport::start], torn down with [Transport::shutdown].
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Debug for Transport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Transport{{local:{:?}}}", self.inner.local_address())
    }
}

impl Transport {
    pub async fn start(config: RemotingConfig, dispatcher: Arc<dyn MessageDispatcher>) -> anyhow::Result<Transport> {
        config.validate()?;
        if !config.embedded_media_driver {
            bail!("only the embedded media driver is supported - attaching to an external driver (directory {:?}) is a host concern",
                config.media_driver_dir);
        }
        let config = Arc::new(config);

        let driver = MediaDriver::start(&config.hostname, config.port, config.driver_timeout).await?;
        let local_address = UniqueAddress::new(
            Address::new(config.system_name.clone(), driver.local_addr()?),
            rand::random(),
        );
        info!("starting transport at {:?}", local_address);

        let matcher = Arc::new(WildcardMatcher::new(config.large_message_destinations.iter()));
        let events = Arc::new(TransportEventNotifier::new());
        let kill_switch = broadcast::channel(1).0;

        let setup = Arc::new(OutboundSetup {
            local_address,
            config: config.clone(),
            driver,
            matcher: matcher.clone(),
            events: events.clone(),
            ordinary_buffers: Arc::new(EnvelopeBufferPool::new(MAX_FRAME_SIZE, MAX_POOLED_BUFFERS)),
            large_buffers: Arc::new(EnvelopeBufferPool::new(MAX_LARGE_FRAME_SIZE, MAX_POOLED_BUFFERS)),
            outbound_envelopes: Arc::new(OutboundEnvelopePool::new(config.outbound_envelope_pool_size)),
            kill_switch: kill_switch.clone(),
        });

        let inner = Arc::new(TransportInner {
            setup: setup.clone(),
            registry: AssociationRegistry::new(setup),
            dispatcher,
            junction: ControlJunction::new(),
            inbound_envelopes: InboundEnvelopePool::new(config.inbound_envelope_pool_size),
            shutdown: Arc::new(AtomicBool::new(false)),
            restarts: Arc::new(RestartCounter::new(config.max_restarts, config.restart_timeout)),
            tasks: Mutex::new(Vec::new()),
        });

        let ctx: Arc<dyn InboundContext> = inner.clone();
        inner.junction.attach(Arc::new(QuarantineObserver::new(ctx.clone(), events.clone())));
        inner.junction.attach(Arc::new(CompressionObserver::new(ctx, events)));

        {
            let poller_inner = inner.clone();
            let mut kill = kill_switch.subscribe();
            let handle = tokio::spawn(async move {
                select! {
                    _ = kill.recv() => {}
                    _ = run_error_log_poller(poller_inner) => {}
                }
            });
            inner.tasks.lock().unwrap().push(handle);
        }

        Self::spawn_supervised(&inner, "control-inbound", PipelineKind::Control);
        Self::spawn_supervised(&inner, "ordinary-inbound", PipelineKind::Ordinary);
        if !matcher.is_empty() {
            Self::spawn_supervised(&inner, "large-inbound", PipelineKind::Large);
        }

        Ok(Transport { inner })
    }

    fn spawn_supervised(inner: &Arc<TransportInner>, name: &'static str, kind: PipelineKind) {
        let supervision = Supervision {
            shutdown: inner.shutdown.clone(),
            restarts: inner.restarts.clone(),
        };
        let kill = inner.setup.kill_switch.subscribe();
        let task_inner = inner.clone();

        let handle = tokio::spawn(async move {
            let pipeline_inner = task_inner.clone();
            let result = supervise(name, &supervision, kill, move || {
                let inner = pipeline_inner.clone();
                async move {
                    match kind {
                        PipelineKind::Control => inbound::run_control_inbound(inner).await,
                        PipelineKind::Ordinary => inbound::run_user_inbound(inner, ORDINARY_STREAM_ID).await,
                        PipelineKind::Large => inbound::run_user_inbound(inner, LARGE_STREAM_ID).await,
                    }
                }
            }).await;

            if let Err(e) = result {
                error!("the {} pipeline failed and its restart budget is exhausted - the host system must terminate: {}", name, e);
                task_inner.events().publish(TransportEvent::TransportFailed { reason: e.to_string() }).await;
                task_inner.initiate_shutdown();
            }
        });
        inner.tasks.lock().unwrap().push(handle);
    }

    pub fn local_address(&self) -> &UniqueAddress {
        self.inner.local_address()
    }

    pub fn events(&self) -> Arc<TransportEventNotifier> {
        self.inner.events().clone()
    }

    /// Register an additional observer for inbound control messages.
    pub fn attach_control_observer(&self, observer: Arc<dyn ControlMessageObserver>) {
        self.inner.junction.attach(observer);
    }

    pub fn association(&self, remote: &Address) -> Arc<Association> {
        self.inner.registry.association(remote)
    }

    pub fn association_by_key(&self, key: AssociationKey) -> Arc<Association> {
        self.inner.registry.association_by_key(key)
    }

    /// Send a user message. The recipient path decides between the ordinary and the large
    ///  pipeline; delivery is best-effort per stream.
    pub async fn send(
        &self,
        to: &Address,
        sender: Option<String>,
        recipient: Option<String>,
        serializer: i32,
        manifest: String,
        message: Bytes,
    ) {
        let association = self.inner.registry.association(to);

        let mut envelope = self.inner.setup.outbound_envelopes.acquire();
        envelope.sender = sender;
        envelope.recipient = recipient;
        envelope.recipient_address = Some(to.clone());
        envelope.serializer = serializer;
        envelope.manifest = manifest;
        envelope.message = message;

        association.send(envelope).await;
    }

    /// Send a system message with reliable, ordered delivery on the control stream.
    pub async fn send_system(&self, to: &Address, send: SystemSend) {
        self.inner.registry.association(to).send_system(send).await;
    }

    /// Idempotent: the first call initiates the teardown, every call waits for it.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.inner.initiate_shutdown();

        let handles = {
            let mut tasks = self.inner.tasks.lock().unwrap();
            tasks.drain(..).collect::<Vec<_>>()
        };
        for mut handle in handles {
            if timeout(Duration::from_secs(5), &mut handle).await.is_err() {
                warn!("a transport task did not complete in time - aborting it");
                handle.abort();
            }
        }
        Ok(())
    }
}

async fn run_error_log_poller(inner: Arc<TransportInner>) {
    sleep(inner.config().error_log_initial_delay).await;
    let mut poll = interval(inner.config().error_log_poll_interval);
    loop {
        poll.tick().await;
        for driver_error in inner.driver().take_errors() {
            match driver_error.kind {
                DriverErrorKind::Timeout => error!("media driver timeout (continuing): {}", driver_error.message),
                DriverErrorKind::Socket => error!("media driver: {}", driver_error.message),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicU32;

    use anyhow::anyhow;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    use super::*;
    use crate::dispatcher::MockMessageDispatcher;
    use crate::envelope::InboundEnvelope;
    use crate::events::TransportEventListener;

    struct ChannelDispatcher {
        tx: mpsc::UnboundedSender<InboundEnvelope>,
    }
    #[async_trait]
    impl MessageDispatcher for ChannelDispatcher {
        async fn dispatch(&self, envelope: &InboundEnvelope) {
            let _ = self.tx.send(envelope.clone());
        }
    }

    struct ChannelEventListener {
        tx: mpsc::UnboundedSender<TransportEvent>,
    }
    #[async_trait]
    impl TransportEventListener for ChannelEventListener {
        async fn on_transport_event(&self, event: TransportEvent) {
            let _ = self.tx.send(event);
        }
    }

    fn test_config(system_name: &str) -> RemotingConfig {
        let mut config = RemotingConfig::new(system_name, "127.0.0.1", 0);
        config.handshake_retry_interval = Duration::from_millis(50);
        config.handshake_timeout = Duration::from_secs(5);
        config.system_message_resend_interval = Duration::from_millis(100);
        config
    }

    async fn start_transport(config: RemotingConfig) -> (Transport, mpsc::UnboundedReceiver<InboundEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Transport::start(config, Arc::new(ChannelDispatcher { tx })).await.unwrap();
        (transport, rx)
    }

    #[tokio::test]
    async fn test_auto_port_assignment() {
        let (transport, _rx) = start_transport(test_config("auto-port")).await;

        let port = transport.local_address().address.socket_addr.port();
        assert!(port > 1024);

        transport.shutdown().await.unwrap();
        // idempotent
        transport.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let mut config = test_config("invalid");
        config.handshake_timeout = Duration::ZERO;
        assert!(Transport::start(config, Arc::new(ChannelDispatcher { tx: mpsc::unbounded_channel().0 })).await.is_err());
    }

    #[tokio::test]
    async fn test_start_rejects_external_media_driver() {
        let mut config = test_config("external");
        config.embedded_media_driver = false;
        assert!(Transport::start(config, Arc::new(ChannelDispatcher { tx: mpsc::unbounded_channel().0 })).await.is_err());
    }

    #[tokio::test]
    async fn test_handshake_and_user_message() {
        let (a, _a_rx) = start_transport(test_config("sys-a")).await;
        let (b, mut b_rx) = start_transport(test_config("sys-b")).await;
        let b_address = b.local_address().address.clone();

        a.send(&b_address, Some("/user/sender".to_string()), Some("/user/x".to_string()), 7, "m".to_string(), Bytes::from_static(b"hello")).await;

        let received = timeout(Duration::from_secs(10), b_rx.recv()).await.unwrap().unwrap();
        assert_eq!(received.recipient.as_deref(), Some("/user/x"));
        assert_eq!(received.sender.as_deref(), Some("/user/sender"));
        assert_eq!(&received.payload[..], b"hello");
        assert_eq!(received.originating_uid, a.local_address().uid);

        // the handshake response fulfills A's UID promise for B
        let association = a.association(&b_address);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if association.state().unique_remote_address() == Some(b.local_address().clone()) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "uid promise was not fulfilled");
            sleep(Duration::from_millis(20)).await;
        }

        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_user_message_reaches_the_mocked_dispatcher() {
        let (dispatched_tx, mut dispatched) = mpsc::unbounded_channel();
        let mut dispatcher = MockMessageDispatcher::new();
        dispatcher.expect_dispatch()
            .withf(|envelope| envelope.recipient.as_deref() == Some("/user/x") && &envelope.payload[..] == b"hello")
            .returning(move |_| {
                let _ = dispatched_tx.send(());
            });

        let b = Transport::start(test_config("sys-b"), Arc::new(dispatcher)).await.unwrap();
        let (a, _a_rx) = start_transport(test_config("sys-a")).await;
        let b_address = b.local_address().address.clone();

        a.send(&b_address, None, Some("/user/x".to_string()), 7, "m".to_string(), Bytes::from_static(b"hello")).await;

        timeout(Duration::from_secs(10), dispatched.recv()).await.unwrap().unwrap();

        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_quarantine_stops_traffic_and_notifies_the_peer() {
        let (a, _a_rx) = start_transport(test_config("sys-a")).await;
        let (b, mut b_rx) = start_transport(test_config("sys-b")).await;
        let b_address = b.local_address().address.clone();

        let (event_tx, mut b_events) = mpsc::unbounded_channel();
        b.events().add_listener(Arc::new(ChannelEventListener { tx: event_tx })).await;

        // establish the association
        a.send(&b_address, None, Some("/user/x".to_string()), 7, "m".to_string(), Bytes::from_static(b"M1")).await;
        let received = timeout(Duration::from_secs(10), b_rx.recv()).await.unwrap().unwrap();
        assert_eq!(&received.payload[..], b"M1");

        a.association(&b_address).quarantine("operator decision", Some(b.local_address().uid)).await;

        // further sends are dropped on the quarantining side
        a.send(&b_address, None, Some("/user/x".to_string()), 7, "m".to_string(), Bytes::from_static(b"M2")).await;
        assert!(timeout(Duration::from_millis(500), b_rx.recv()).await.is_err());

        // the peer learns about it and publishes the event
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match timeout(remaining, b_events.recv()).await {
                Ok(Some(TransportEvent::ThisSystemQuarantined { local, remote })) => {
                    assert_eq!(local, b_address);
                    assert_eq!(remote, a.local_address().address);
                    break;
                }
                Ok(Some(_)) => continue,
                _ => panic!("expected a ThisSystemQuarantined event"),
            }
        }

        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_system_messages_are_delivered_in_order() {
        let (a, _a_rx) = start_transport(test_config("sys-a")).await;
        let (b, mut b_rx) = start_transport(test_config("sys-b")).await;
        let b_address = b.local_address().address.clone();

        for i in 0..20u8 {
            a.send_system(&b_address, SystemSend {
                serializer: 7,
                manifest: "sys".to_string(),
                payload: Bytes::copy_from_slice(&[i]),
            }).await;
        }

        for expected in 0..20u8 {
            let received = timeout(Duration::from_secs(10), b_rx.recv()).await.unwrap().unwrap();
            assert_eq!(received.manifest, "sys");
            assert_eq!(&received.payload[..], &[expected], "system messages must arrive in order without gaps");
        }

        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_large_message_destinations_use_the_large_pipeline() {
        let mut config_a = test_config("sys-a");
        config_a.large_message_destinations = vec!["/user/big/*".to_string()];
        let mut config_b = test_config("sys-b");
        config_b.large_message_destinations = vec!["/user/big/*".to_string()];

        let (a, _a_rx) = start_transport(config_a).await;
        let (b, mut b_rx) = start_transport(config_b).await;
        let b_address = b.local_address().address.clone();

        // sized to fit a single UDP datagram: the embedded driver does not fragment
        let payload_len = 32 * 1024;
        a.send(&b_address, None, Some("/user/big/data".to_string()), 7, "m".to_string(), Bytes::from(vec![42u8; payload_len])).await;

        let received = timeout(Duration::from_secs(10), b_rx.recv()).await.unwrap().unwrap();
        assert_eq!(received.recipient.as_deref(), Some("/user/big/data"));
        assert_eq!(received.payload.len(), payload_len);

        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervision_restart_budget() {
        let supervision = Supervision {
            shutdown: Arc::new(AtomicBool::new(false)),
            restarts: Arc::new(RestartCounter::new(5, Duration::from_secs(5))),
        };
        let kill_switch = broadcast::channel(1).0;
        let num_runs = Arc::new(AtomicU32::new(0));

        let counting = num_runs.clone();
        let result = supervise("test", &supervision, kill_switch.subscribe(), move || {
            let num_runs = counting.clone();
            async move {
                num_runs.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("induced failure"))
            }
        }).await;

        assert!(result.is_err());
        // the initial launch plus five granted restarts
        assert_eq!(num_runs.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervision_swallows_failures_during_shutdown() {
        let supervision = Supervision {
            shutdown: Arc::new(AtomicBool::new(true)),
            restarts: Arc::new(RestartCounter::new(5, Duration::from_secs(5))),
        };
        let kill_switch = broadcast::channel(1).0;
        let num_runs = Arc::new(AtomicU32::new(0));

        let counting = num_runs.clone();
        let result = supervise("test", &supervision, kill_switch.subscribe(), move || {
            let num_runs = counting.clone();
            async move {
                num_runs.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("induced failure"))
            }
        }).await;

        assert!(result.is_ok());
        assert_eq!(num_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervision_reacts_to_the_kill_switch() {
        let kill_switch = broadcast::channel::<()>(1).0;
        let supervision = Supervision {
            shutdown: Arc::new(AtomicBool::new(false)),
            restarts: Arc::new(RestartCounter::new(5, Duration::from_secs(5))),
        };
        let kill = kill_switch.subscribe();

        let supervised = tokio::spawn(async move {
            supervise("test", &supervision, kill, || std::future::pending::<anyhow::Result<()>>()).await
        });

        sleep(Duration::from_millis(10)).await;
        kill_switch.send(()).unwrap();

        assert!(timeout(Duration::from_secs(1), supervised).await.unwrap().unwrap().is_ok());
    }
}
