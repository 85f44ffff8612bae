//! Authenticated loopback transport and its channels

use adbridge_core::{
    Banner, BridgeError, Channel, ChannelWriter, DeviceConnection, DeviceId, DeviceTransport,
    Result,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::services::{frames, run_command, LineBuffer, Outcome, Service};

/// Frames queued per direction before the writer waits
const CHANNEL_DEPTH: usize = 16;

pub struct LoopbackTransport {
    identity: DeviceId,
    max_payload_size: u32,
    banner: Banner,
    connection: Box<dyn DeviceConnection>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    open_channels: Arc<AtomicUsize>,
}

impl LoopbackTransport {
    pub fn new(
        identity: DeviceId,
        max_payload_size: u32,
        banner: Banner,
        connection: Box<dyn DeviceConnection>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            identity,
            max_payload_size,
            banner,
            connection,
            closed: AtomicBool::new(false),
            shutdown,
            open_channels: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Channels whose device side is still running
    pub fn open_channels(&self) -> usize {
        self.open_channels.load(Ordering::Acquire)
    }
}

#[async_trait]
impl DeviceTransport for LoopbackTransport {
    fn max_payload_size(&self) -> u32 {
        self.max_payload_size
    }

    fn banner(&self) -> &Banner {
        &self.banner
    }

    async fn connect(&self, service: &str) -> Result<Channel> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BridgeError::Transport("transport closed".to_string()));
        }
        let Some(kind) = Service::parse(service) else {
            return Err(BridgeError::ChannelOpenRejected {
                service: service.to_string(),
                reason: "unknown service".to_string(),
            });
        };

        let (input_tx, input_rx) = mpsc::channel::<Bytes>(CHANNEL_DEPTH);
        let (output_tx, output_rx) = mpsc::channel::<Bytes>(CHANNEL_DEPTH);

        debug!(serial = %self.identity, service = %service, "Opening loopback channel");
        let open_channels = self.open_channels.clone();
        open_channels.fetch_add(1, Ordering::AcqRel);
        let device_side = serve(
            kind,
            self.banner.clone(),
            self.max_payload_size as usize,
            input_rx,
            output_tx,
            self.shutdown.subscribe(),
        );
        tokio::spawn(async move {
            device_side.await;
            open_channels.fetch_sub(1, Ordering::AcqRel);
        });

        let readable = stream::unfold(output_rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok(chunk), rx))
        })
        .boxed();

        Ok(Channel {
            service: service.to_string(),
            readable,
            writable: Box::new(LoopbackWriter {
                input: Some(input_tx),
            }),
        })
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(serial = %self.identity, "Closing loopback transport");
        let _ = self.shutdown.send(true);
        self.connection.close().await;
    }
}

/// Host-to-device half; dropping the sender ends the service
struct LoopbackWriter {
    input: Option<mpsc::Sender<Bytes>>,
}

#[async_trait]
impl ChannelWriter for LoopbackWriter {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        let Some(input) = &self.input else {
            return Err(BridgeError::Transport("channel closed".to_string()));
        };
        input
            .send(chunk)
            .await
            .map_err(|_| BridgeError::Transport("channel closed by device".to_string()))
    }

    async fn close(&mut self) {
        self.input.take();
    }
}

/// Device side of one channel
async fn serve(
    kind: Service,
    banner: Banner,
    max_payload: usize,
    mut input: mpsc::Receiver<Bytes>,
    output: mpsc::Sender<Bytes>,
    mut shutdown: watch::Receiver<bool>,
) {
    let emit = |data: Bytes| {
        let output = output.clone();
        async move {
            for frame in frames(data, max_payload) {
                output.send(frame).await.map_err(|_| ())?;
            }
            Ok::<_, ()>(())
        }
    };

    if let Service::Command(command) = &kind {
        if let Outcome::Output(text) = run_command(command, &banner) {
            let _ = emit(Bytes::from(text)).await;
        }
        return;
    }

    let mut lines = LineBuffer::default();
    loop {
        let chunk = tokio::select! {
            chunk = input.recv() => chunk,
            _ = shutdown.changed() => None,
        };
        let Some(chunk) = chunk else {
            break;
        };

        match kind {
            Service::Echo => {
                if emit(chunk).await.is_err() {
                    break;
                }
            }
            Service::Shell => {
                lines.push(&chunk);
                while let Some(line) = lines.next_line() {
                    match run_command(&line, &banner) {
                        Outcome::Output(text) if text.is_empty() => {}
                        Outcome::Output(text) => {
                            if emit(Bytes::from(text)).await.is_err() {
                                return;
                            }
                        }
                        Outcome::Exit => return,
                    }
                }
            }
            Service::Command(_) => break,
        }
    }
}
