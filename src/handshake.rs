//! The outbound half of the handshake: gate user messages until the peer's UID promise is
//!  fulfilled, injecting a `HandshakeReq` periodically until a response is observed. The
//!  inbound half (answering requests, completing the promise) lives in the control pipeline
//!  in [crate::inbound].

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::time::Duration;

use tokio::select;
use tokio::sync::watch;
use tokio::time::{interval, timeout};
use tracing::debug;

use crate::config::RemotingConfig;
use crate::control_messages::ControlMessage;
use crate::node_addr::{Address, UniqueAddress};
use crate::transport::OutboundContext;

/// The outbound handshake did not complete within `handshake_timeout`. Fails the outbound
///  pipeline; supervision decides between restart and giving up on the peer.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HandshakeTimeout {
    pub remote: Address,
    pub timeout: Duration,
}
impl Display for HandshakeTimeout {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "handshake with {:?} did not complete within {:?}", self.remote, self.timeout)
    }
}
impl std::error::Error for HandshakeTimeout {}

/// Wait until the association's UID promise is fulfilled, sending a `HandshakeReq` on the
///  control stream immediately and then every `handshake_retry_interval`. Returns the peer's
///  unique address, or fails after `handshake_timeout`.
///
/// All access to the association goes through [OutboundContext] - the gate is agnostic to
///  what is behind the seam.
pub(crate) async fn await_handshake(ctx: &dyn OutboundContext, config: &RemotingConfig) -> anyhow::Result<UniqueAddress> {
    let state = ctx.association_state();
    if let Some(peer) = state.unique_remote_address() {
        return Ok(peer);
    }

    debug!("handshaking with {:?}", ctx.remote_address());
    let local = ctx.local_address().clone();
    let remote = ctx.remote_address().clone();

    let completed = await_uid(
        state.subscribe_uid(),
        config.handshake_retry_interval,
        config.handshake_timeout,
        move || {
            let request = ControlMessage::HandshakeReq {
                from: local.clone(),
                to: remote.clone(),
            };
            async move {
                ctx.send_control(request).await;
            }
        },
    ).await;

    match completed {
        Some(peer) => Ok(peer),
        None => Err(HandshakeTimeout {
            remote: ctx.remote_address().clone(),
            timeout: config.handshake_timeout,
        }.into()),
    }
}

/// Testable core of the gate: watch the promise, fire `inject` periodically (first shot
///  immediately), give up after `limit`.
async fn await_uid<F, Fut>(
    mut uid: watch::Receiver<Option<UniqueAddress>>,
    retry_interval: Duration,
    limit: Duration,
    mut inject: F,
) -> Option<UniqueAddress>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    timeout(limit, async move {
        let mut retry = interval(retry_interval);
        loop {
            if let Some(peer) = uid.borrow_and_update().clone() {
                return peer;
            }
            select! {
                _ = retry.tick() => {
                    inject().await;
                }
                changed = uid.changed() => {
                    if changed.is_err() {
                        // the promise's sender is gone - nothing will ever complete this gate,
                        //  let the timeout fire
                        std::future::pending::<()>().await;
                    }
                }
            }
        }
    }).await.ok()
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use tokio::time::sleep;

    use super::*;
    use crate::test_util::test_unique_address;

    #[tokio::test(start_paused = true)]
    async fn test_completes_when_promise_is_fulfilled() {
        let (tx, rx) = watch::channel(None);
        let num_injected = Arc::new(AtomicU32::new(0));

        let counting = num_injected.clone();
        let gate = tokio::spawn(await_uid(
            rx,
            Duration::from_secs(1),
            Duration::from_secs(20),
            move || {
                counting.fetch_add(1, Ordering::SeqCst);
                async {}
            },
        ));

        sleep(Duration::from_millis(3500)).await;
        tx.send(Some(test_unique_address(9, 42))).unwrap();

        assert_eq!(gate.await.unwrap(), Some(test_unique_address(9, 42)));
        // first shot immediately, then after 1s, 2s and 3s
        assert_eq!(num_injected.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_fulfilled_promise_passes_through() {
        let (_tx, rx) = watch::channel(Some(test_unique_address(9, 42)));
        let num_injected = Arc::new(AtomicU32::new(0));

        let counting = num_injected.clone();
        let result = await_uid(
            rx,
            Duration::from_secs(1),
            Duration::from_secs(20),
            move || {
                counting.fetch_add(1, Ordering::SeqCst);
                async {}
            },
        ).await;

        assert_eq!(result, Some(test_unique_address(9, 42)));
        assert_eq!(num_injected.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let (_tx, rx) = watch::channel(None);

        let result = await_uid(
            rx,
            Duration::from_secs(1),
            Duration::from_secs(20),
            || async {},
        ).await;

        assert_eq!(result, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_promise_times_out_instead_of_spinning() {
        let (tx, rx) = watch::channel(None);
        drop(tx);

        let result = await_uid(
            rx,
            Duration::from_secs(1),
            Duration::from_secs(5),
            || async {},
        ).await;

        assert_eq!(result, None);
    }
}
