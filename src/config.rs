use std::time::Duration;

use anyhow::bail;

/// Configuration for a [crate::transport::Transport] instance. All intervals are wall-clock
///  durations; the defaults are chosen for data-center networks and can be tuned per
///  deployment.
#[derive(Debug, Clone)]
pub struct RemotingConfig {
    /// name of the local actor system, part of the local [crate::node_addr::Address]
    pub system_name: String,
    /// interface to bind the transport socket to
    pub hostname: String,
    /// port to bind to; 0 means auto-assign an ephemeral port
    pub port: u16,

    /// how long the outbound side waits for the handshake to complete before it fails the
    ///  outbound pipeline. Must be > 0.
    pub handshake_timeout: Duration,
    /// interval at which a HandshakeReq is re-sent while no response was observed
    pub handshake_retry_interval: Duration,

    /// how long an outbound sink waits for queue capacity before it drops a message with a
    ///  warning
    pub give_up_send_after: Duration,
    /// capacity of each per-peer outbound queue
    pub outbound_queue_capacity: usize,

    /// upper bound for unacknowledged system messages per peer; overflowing it fails the
    ///  control sink and quarantines the peer. Must be > 0.
    pub sys_msg_buffer_size: usize,
    /// interval at which unacknowledged system messages are retransmitted
    pub system_message_resend_interval: Duration,

    /// path patterns (`/`-separated, `*` wildcard) whose destinations use the large-message
    ///  pipeline
    pub large_message_destinations: Vec<String>,

    /// number of pooled outbound envelope wrappers.
    //TODO derive this from outbound_queue_capacity instead of configuring it independently?
    pub outbound_envelope_pool_size: usize,
    /// number of pooled inbound envelope wrappers
    pub inbound_envelope_pool_size: usize,

    /// sliding window for the restart budget of supervised pipelines
    pub restart_timeout: Duration,
    /// number of restarts granted within `restart_timeout` before giving up
    pub max_restarts: u32,

    /// media driver threading profile, 1..=10. The embedded driver has no busy-spin loop to
    ///  tune under an async runtime, so this only scales its receive queue depth.
    pub idle_cpu_level: u8,
    /// whether the media driver runs inside this process. `false` is recognized but rejected
    ///  at startup - driving an external media driver is a collaborator concern.
    pub embedded_media_driver: bool,
    /// directory an external media driver would be reached through; unused by the embedded
    ///  driver
    pub media_driver_dir: Option<String>,
    /// driver liveness timeout reported through the error log
    pub driver_timeout: Duration,

    /// whether advertisement-driven compression of actor refs and manifests is applied on
    ///  outbound frames
    pub compression_enabled: bool,

    /// period of the media driver error-log poller
    pub error_log_poll_interval: Duration,
    /// delay before the first error-log poll
    pub error_log_initial_delay: Duration,
}

impl RemotingConfig {
    pub fn new(system_name: impl Into<String>, hostname: impl Into<String>, port: u16) -> RemotingConfig {
        RemotingConfig {
            system_name: system_name.into(),
            hostname: hostname.into(),
            port,
            handshake_timeout: Duration::from_secs(20),
            handshake_retry_interval: Duration::from_secs(1),
            give_up_send_after: Duration::from_secs(60),
            outbound_queue_capacity: 3072,
            sys_msg_buffer_size: 20_000,
            system_message_resend_interval: Duration::from_secs(1),
            large_message_destinations: Vec::new(),
            outbound_envelope_pool_size: 6144,
            inbound_envelope_pool_size: 16,
            restart_timeout: Duration::from_secs(5),
            max_restarts: 5,
            idle_cpu_level: 5,
            embedded_media_driver: true,
            media_driver_dir: None,
            driver_timeout: Duration::from_secs(20),
            compression_enabled: true,
            error_log_poll_interval: Duration::from_secs(5),
            error_log_initial_delay: Duration::from_secs(3),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.handshake_timeout.is_zero() {
            bail!("handshake-timeout must be greater than zero");
        }
        if self.sys_msg_buffer_size == 0 {
            bail!("sys-msg-buffer-size must be a positive number");
        }
        if !(1..=10).contains(&self.idle_cpu_level) {
            bail!("idle-cpu-level must be in the range 1..=10, was {}", self.idle_cpu_level);
        }
        if self.outbound_queue_capacity == 0 {
            bail!("outbound queue capacity must be a positive number");
        }
        Ok(())
    }
}
