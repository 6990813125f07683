//! The embedded media driver: the transport's datagram substrate. It owns the UDP socket,
//!  demultiplexes inbound datagrams by stream id into per-stream queues, and hands out
//!  [Publication] handles for sending.
//!
//! Datagram layout is one byte of stream id followed by the envelope frame - UDP preserves
//!  datagram boundaries, so no length field is needed. Everything above this module deals in
//!  frames only; everything below the stream-id byte is the driver's business.
//!
//! This driver sends one datagram per frame and does not fragment: a frame beyond what the
//!  network accepts in a single datagram shows up as a send error in the error log. Drivers
//!  that fragment and reassemble can be substituted behind the same surface.
//!
//! Socket errors never propagate into the pipelines. They are recorded in an internal error
//!  log that the transport's periodic poller drains and writes to the tracing log.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use rustc_hash::FxHashMap;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::buffers::buffer_pool::MAX_LARGE_FRAME_SIZE;

pub const CONTROL_STREAM_ID: u8 = 1;
pub const ORDINARY_STREAM_ID: u8 = 3;
pub const LARGE_STREAM_ID: u8 = 4;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DriverErrorKind {
    /// a socket-level send or receive error
    Socket,
    /// the driver's liveness watchdog expired; logged prominently but never fatal
    Timeout,
}

#[derive(Debug, Clone)]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub message: String,
}

/// One frame received from the wire, before decoding.
#[derive(Debug)]
pub struct InboundFrame {
    pub from: SocketAddr,
    pub frame: BytesMut,
}

pub struct MediaDriver {
    socket: Arc<UdpSocket>,
    subscriptions: Mutex<FxHashMap<u8, mpsc::Sender<InboundFrame>>>,
    errors: Mutex<Vec<DriverError>>,
    recv_handle: Mutex<Option<JoinHandle<()>>>,
    watchdog_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for MediaDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl MediaDriver {
    /// Bind the transport socket and start the receive loop. Port 0 auto-assigns an ephemeral
    ///  port; the effective address is available through [MediaDriver::local_addr].
    ///
    /// `driver_timeout` is the period of the liveness watchdog: a receive loop found dead
    ///  outside of shutdown is reported through the error log as a timeout.
    pub async fn start(hostname: &str, port: u16, driver_timeout: Duration) -> anyhow::Result<Arc<MediaDriver>> {
        let socket = Arc::new(UdpSocket::bind((hostname, port)).await?);
        info!("media driver: bound transport socket to {:?}", socket.local_addr()?);

        let driver = Arc::new(MediaDriver {
            socket,
            subscriptions: Default::default(),
            errors: Default::default(),
            recv_handle: Default::default(),
            watchdog_handle: Default::default(),
        });

        let handle = tokio::spawn(Self::recv_loop(driver.clone()));
        *driver.recv_handle.lock().unwrap() = Some(handle);

        let watchdog = tokio::spawn(Self::watchdog_loop(driver.clone(), driver_timeout));
        *driver.watchdog_handle.lock().unwrap() = Some(watchdog);

        Ok(driver)
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Register the receiving end of a stream. Registering a stream id again (after a pipeline
    ///  restart) replaces the previous queue; frames in the abandoned queue are dropped with
    ///  the old receiver.
    pub fn add_subscription(&self, stream_id: u8, queue_depth: usize) -> mpsc::Receiver<InboundFrame> {
        let (tx, rx) = mpsc::channel(queue_depth);
        self.subscriptions.lock().unwrap().insert(stream_id, tx);
        rx
    }

    pub fn publication(self: &Arc<Self>, dest: SocketAddr, stream_id: u8) -> Publication {
        Publication {
            driver: self.clone(),
            dest,
            stream_id,
        }
    }

    /// Drain the accumulated driver errors; called by the transport's error-log poller.
    pub fn take_errors(&self) -> Vec<DriverError> {
        std::mem::take(&mut *self.errors.lock().unwrap())
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self.watchdog_handle.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.recv_handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    fn record_error(&self, kind: DriverErrorKind, message: String) {
        self.errors.lock().unwrap().push(DriverError { kind, message });
    }

    async fn watchdog_loop(driver: Arc<MediaDriver>, driver_timeout: Duration) {
        loop {
            sleep(driver_timeout).await;
            let receive_loop_died = driver.recv_handle.lock().unwrap()
                .as_ref()
                .map(|handle| handle.is_finished())
                .unwrap_or(false);
            if receive_loop_died {
                driver.record_error(DriverErrorKind::Timeout, "the receive loop is not running".to_string());
            }
        }
    }

    async fn recv_loop(driver: Arc<MediaDriver>) {
        let mut buf = vec![0u8; MAX_LARGE_FRAME_SIZE + 1];
        loop {
            let (num_read, from) = match driver.socket.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    driver.record_error(DriverErrorKind::Socket, format!("receive error: {}", e));
                    continue;
                }
            };
            if num_read == 0 {
                debug!("received empty datagram from {:?} - dropping", from);
                continue;
            }

            let stream_id = buf[0];
            trace!("received {} bytes from {:?} on stream {}", num_read - 1, from, stream_id);

            let subscription = driver.subscriptions.lock().unwrap()
                .get(&stream_id)
                .cloned();
            match subscription {
                None => {
                    debug!("datagram for stream {} without a subscription from {:?} - dropping", stream_id, from);
                }
                Some(tx) => {
                    let frame = InboundFrame {
                        from,
                        frame: BytesMut::from(&buf[1..num_read]),
                    };
                    if tx.try_send(frame).is_err() {
                        warn!("inbound queue for stream {} is full or gone - dropping datagram from {:?}", stream_id, from);
                    }
                }
            }
        }
    }
}

/// Sending endpoint for one (destination, stream) pair. `offer` never fails from the caller's
///  perspective - send errors land in the driver's error log.
#[derive(Clone)]
pub struct Publication {
    driver: Arc<MediaDriver>,
    dest: SocketAddr,
    stream_id: u8,
}

impl Publication {
    pub async fn offer(&self, frame: &[u8]) {
        let mut datagram = Vec::with_capacity(frame.len() + 1);
        datagram.push(self.stream_id);
        datagram.extend_from_slice(frame);

        trace!("offering {} bytes to {:?} on stream {}", frame.len(), self.dest, self.stream_id);
        if let Err(e) = self.driver.socket.send_to(&datagram, self.dest).await {
            self.driver.record_error(
                DriverErrorKind::Socket,
                format!("send to {:?} on stream {} failed: {}", self.dest, self.stream_id, e),
            );
        }
    }
}
