//! Stream bridge between one remote duplex connection and one device channel
//!
//! Device -> remote: the remote sink is owned by a writer task. Bytes count as
//! buffered from the moment they are queued until the sink has accepted them.
//! Before queueing a chunk the bridge waits for occupancy to drop below the
//! high-water mark, so at most one chunk overshoots it.
//!
//! Remote -> device: the next remote message is not pulled until the write of
//! the previous one into the device channel has completed.
//!
//! Whichever side ends first, the other side is closed exactly once.

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::error::{BridgeError, Result};
use crate::transport::Channel;

/// Outbound occupancy above which device output is held back
pub const DEFAULT_HIGH_WATER_MARK: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeOptions {
    pub high_water_mark: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }
}

/// Which side ended the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEnd {
    /// Device channel finished on its own
    DeviceClosed,
    /// Remote connection closed
    RemoteClosed,
    /// Reading from or writing to the device channel failed
    DeviceError,
    /// Reading from or sending to the remote connection failed
    RemoteError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeStats {
    pub chunks_to_remote: u64,
    pub bytes_to_remote: u64,
    pub messages_to_device: u64,
    pub bytes_to_device: u64,
    /// Highest outbound occupancy observed
    pub peak_buffered: usize,
    pub end: BridgeEnd,
}

#[derive(Default)]
struct Counters {
    chunks_to_remote: AtomicU64,
    bytes_to_remote: AtomicU64,
    messages_to_device: AtomicU64,
    bytes_to_device: AtomicU64,
}

#[derive(Default)]
struct OutboundState {
    buffered: AtomicUsize,
    peak: AtomicUsize,
    closed: AtomicBool,
    drained: Notify,
}

/// Queue in front of the remote sink
struct Outbound {
    tx: mpsc::UnboundedSender<Bytes>,
    state: Arc<OutboundState>,
}

impl Outbound {
    fn spawn<W, E>(sink: W) -> (Self, JoinHandle<()>)
    where
        W: Sink<Bytes, Error = E> + Send + 'static,
        E: Display + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let state = Arc::new(OutboundState::default());

        let task_state = state.clone();
        let writer = tokio::spawn(async move {
            let mut sink = Box::pin(sink);
            while let Some(chunk) = rx.recv().await {
                let len = chunk.len();
                let sent = sink.send(chunk).await;
                task_state.buffered.fetch_sub(len, Ordering::AcqRel);
                if let Err(e) = sent {
                    debug!(error = %e, "Remote send failed");
                    break;
                }
                task_state.drained.notify_waiters();
            }

            task_state.closed.store(true, Ordering::Release);
            task_state.drained.notify_waiters();

            // Closing an already closed remote is fine
            if let Err(e) = sink.close().await {
                trace!(error = %e, "Remote close after disconnect");
            }
        });

        (Self { tx, state }, writer)
    }

    fn buffered(&self) -> usize {
        self.state.buffered.load(Ordering::Acquire)
    }

    /// Resolve once fewer than `mark` bytes are waiting to be sent
    async fn wait_below(&self, mark: usize) -> Result<()> {
        loop {
            let drained = self.state.drained.notified();
            if self.state.closed.load(Ordering::Acquire) {
                return Err(BridgeError::RemoteClosed);
            }
            if self.buffered() < mark {
                return Ok(());
            }
            drained.await;
        }
    }

    fn push(&self, chunk: Bytes) -> Result<()> {
        let len = chunk.len();
        let occupancy = self.state.buffered.fetch_add(len, Ordering::AcqRel) + len;
        self.state.peak.fetch_max(occupancy, Ordering::AcqRel);
        self.tx.send(chunk).map_err(|_| BridgeError::RemoteClosed)
    }
}

/// Bridge `channel` to a remote connection until either side closes
///
/// `inbound` yields remote messages; its end is the remote close signal.
/// `outbound` receives device output and is closed when the bridge ends.
pub async fn run<R, W, E1, E2>(
    channel: Channel,
    inbound: R,
    outbound: W,
    options: BridgeOptions,
) -> BridgeStats
where
    R: Stream<Item = std::result::Result<Bytes, E1>> + Send,
    W: Sink<Bytes, Error = E2> + Send + 'static,
    E1: Display + Send,
    E2: Display + Send + 'static,
{
    let Channel {
        service,
        mut readable,
        mut writable,
    } = channel;
    let mut inbound = Box::pin(inbound);
    let (remote, writer) = Outbound::spawn(outbound);
    let counters = Counters::default();

    let device_to_remote = async {
        while let Some(chunk) = readable.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    debug!(service = %service, error = %e, "Device channel read failed");
                    return BridgeEnd::DeviceError;
                }
            };
            if remote.wait_below(options.high_water_mark).await.is_err() {
                return BridgeEnd::RemoteError;
            }
            let len = chunk.len() as u64;
            if remote.push(chunk).is_err() {
                return BridgeEnd::RemoteError;
            }
            counters.chunks_to_remote.fetch_add(1, Ordering::Relaxed);
            counters.bytes_to_remote.fetch_add(len, Ordering::Relaxed);
        }
        BridgeEnd::DeviceClosed
    };

    let remote_to_device = async {
        while let Some(message) = inbound.next().await {
            let data = match message {
                Ok(data) => data,
                Err(e) => {
                    debug!(service = %service, error = %e, "Remote read failed");
                    return BridgeEnd::RemoteError;
                }
            };
            let len = data.len() as u64;
            if let Err(e) = writable.write(data).await {
                debug!(service = %service, error = %e, "Device channel write failed");
                return BridgeEnd::DeviceError;
            }
            counters.messages_to_device.fetch_add(1, Ordering::Relaxed);
            counters.bytes_to_device.fetch_add(len, Ordering::Relaxed);
        }
        BridgeEnd::RemoteClosed
    };

    let end = tokio::select! {
        end = device_to_remote => end,
        end = remote_to_device => end,
    };

    // A device channel that ended on its own is already closed
    if end != BridgeEnd::DeviceClosed {
        writable.close().await;
    }

    let peak_buffered = remote.state.peak.load(Ordering::Acquire);
    drop(remote);
    if let Err(e) = writer.await {
        debug!(service = %service, error = %e, "Remote writer task failed");
    }

    let stats = BridgeStats {
        chunks_to_remote: counters.chunks_to_remote.load(Ordering::Relaxed),
        bytes_to_remote: counters.bytes_to_remote.load(Ordering::Relaxed),
        messages_to_device: counters.messages_to_device.load(Ordering::Relaxed),
        bytes_to_device: counters.bytes_to_device.load(Ordering::Relaxed),
        peak_buffered,
        end,
    };

    info!(
        service = %service,
        end = ?stats.end,
        to_remote = stats.bytes_to_remote,
        to_device = stats.bytes_to_device,
        peak_buffered = stats.peak_buffered,
        "Bridge closed"
    );
    stats
}
