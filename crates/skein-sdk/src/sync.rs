//! Connection driver: the sync protocol over a sequenced transport.

use crate::document::SharedDoc;
use crate::error::{Result, SdkError};
use crate::network::{PeerId, Transport, TransportEvent};
use crate::protocol::{SyncMessage, SyncProtocol};
use crate::sequencer::{SequencedFrame, Sequencer};
use skein_db::{Subscription, TransactionEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Origin attached to transactions that apply remote messages.
pub const REMOTE_ORIGIN: &str = "remote";

/// Configuration for sync behavior.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// How often to force a resync (in milliseconds).
    pub resync_interval_ms: u64,
    /// Delay of the first resync after each (re)connect (in milliseconds).
    /// Peers already mid-epoch stay buffered until then.
    pub join_resync_ms: u64,
    /// Transport message type carrying sync frames.
    pub message_type: String,
    /// Frames allowed to wait behind a gap before a resync is forced.
    pub max_buffered_frames: usize,
    /// Send the whole local state as an update on every (re)connect.
    pub send_full_state_on_connect: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            resync_interval_ms: 10_000,
            join_resync_ms: 250,
            message_type: "sync".to_string(),
            max_buffered_frames: 1024,
            send_full_state_on_connect: true,
        }
    }
}

impl SyncConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_millis(self.resync_interval_ms.max(1))
    }

    /// Never later than a regular resync.
    pub fn join_resync_delay(&self) -> Duration {
        Duration::from_millis(self.join_resync_ms.clamp(1, self.resync_interval_ms.max(1)))
    }
}

/// Builder for sync configuration.
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    pub fn resync_interval(mut self, ms: u64) -> Self {
        self.config.resync_interval_ms = ms;
        self
    }

    pub fn join_resync(mut self, ms: u64) -> Self {
        self.config.join_resync_ms = ms;
        self
    }

    pub fn message_type(mut self, message_type: impl Into<String>) -> Self {
        self.config.message_type = message_type.into();
        self
    }

    pub fn max_buffered_frames(mut self, frames: usize) -> Self {
        self.config.max_buffered_frames = frames;
        self
    }

    pub fn send_full_state_on_connect(mut self, enabled: bool) -> Self {
        self.config.send_full_state_on_connect = enabled;
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps one document in sync with every peer behind a transport.
///
/// The manager is event driven: each `on_*` method handles one transport,
/// document or timer event. [`SyncManager::spawn`] wires them to a
/// background task.
pub struct SyncManager<T: Transport> {
    transport: Arc<T>,
    config: SyncConfig,
    doc: SharedDoc,
    sequencer: Sequencer,
    protocol: SyncProtocol,
}

impl<T: Transport> SyncManager<T> {
    pub fn new(transport: Arc<T>, local: PeerId, doc: SharedDoc, config: SyncConfig) -> Self {
        Self {
            transport,
            config,
            doc,
            sequencer: Sequencer::new(local),
            protocol: SyncProtocol::new(REMOTE_ORIGIN),
        }
    }

    /// Get the sync configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn protocol(&self) -> &SyncProtocol {
        &self.protocol
    }

    /// Open the transport and run the connect sequence.
    pub async fn start(&mut self) -> Result<()> {
        self.transport.start().await?;
        self.on_connected().await
    }

    /// New epoch, then a state vector request and optionally the full state.
    pub async fn on_connected(&mut self) -> Result<()> {
        let epoch = self.sequencer.connect();
        self.protocol.reset();
        let (step1, full_state) = {
            let doc = self.doc.lock();
            let step1 = self.protocol.start(&doc);
            let full_state = self
                .config
                .send_full_state_on_connect
                .then(|| doc.encode_state_as_update(&Default::default()));
            (step1, full_state)
        };
        info!(peer = %self.sequencer.local_id(), epoch, "sync connected");
        self.send(step1).await?;
        if let Some(update) = full_state {
            self.send(SyncMessage::Update(update)).await?;
        }
        Ok(())
    }

    pub fn on_disconnected(&mut self) {
        info!(
            peer = %self.sequencer.local_id(),
            epoch = self.sequencer.epoch(),
            "sync disconnected"
        );
        self.sequencer.disconnect();
        self.protocol.reset();
    }

    /// Forward a committed local transaction. Remote-origin transactions and
    /// commits made while disconnected are not sent.
    pub async fn on_local_update(&mut self, event: &TransactionEvent) -> Result<()> {
        if event.has_origin(self.protocol.origin()) {
            return Ok(());
        }
        if !self.sequencer.is_active() {
            trace!("offline, local update will travel with the next full state");
            return Ok(());
        }
        self.send(SyncMessage::Update(event.update.clone())).await
    }

    /// Handle one transport message. A message that fails to decode or apply
    /// is logged and skipped; the rest of the frame batch still runs.
    pub async fn on_transport_message(&mut self, message_type: &str, payload: &str) -> Result<()> {
        if message_type != self.config.message_type {
            trace!(message_type, "ignoring foreign message type");
            return Ok(());
        }
        let frame = SequencedFrame::from_base64(payload)?;
        for message in self.sequencer.receive(frame) {
            if let Err(err) = self.apply_message(&message).await {
                warn!(error = %err, "rejected sync message");
            }
        }
        if self.sequencer.buffered() > self.config.max_buffered_frames {
            warn!(
                buffered = self.sequencer.buffered(),
                limit = self.config.max_buffered_frames,
                "receive buffer overflow, forcing resync"
            );
            self.resync().await?;
        }
        Ok(())
    }

    async fn apply_message(&mut self, bytes: &[u8]) -> Result<()> {
        let message = SyncMessage::decode(bytes)?;
        let reply = {
            let mut doc = self.doc.lock();
            self.protocol.handle(&mut doc, message)?
        };
        if let Some(reply) = reply {
            self.send(reply).await?;
        }
        Ok(())
    }

    /// Drop whatever is stuck behind a gap and ask every peer for a diff.
    pub async fn resync(&mut self) -> Result<()> {
        if !self.sequencer.resync(self.sequencer.epoch()) {
            return Ok(());
        }
        let step1 = {
            let doc = self.doc.lock();
            self.protocol.start(&doc)
        };
        debug!(peer = %self.sequencer.local_id(), "resync");
        self.send(step1).await
    }

    /// Timer callback; ticks scheduled under an older epoch do nothing.
    pub async fn on_resync_tick(&mut self, epoch: u64) -> Result<()> {
        if epoch != self.sequencer.epoch() || !self.sequencer.is_active() {
            trace!(epoch, "ignoring stale resync tick");
            return Ok(());
        }
        self.resync().await
    }

    async fn send(&mut self, message: SyncMessage) -> Result<()> {
        let frame = self.sequencer.outgoing(message.encode())?;
        self.transport
            .send(&self.config.message_type, frame.to_base64())
            .await?;
        Ok(())
    }

    /// First tick comes after the join delay, then once per resync interval.
    fn ticker(&self) -> Interval {
        let period = self.config.resync_interval();
        let start = Instant::now() + self.config.join_resync_delay();
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Start the manager and drive it from a background task.
    pub async fn spawn(mut self) -> Result<SyncHandle> {
        let transport_events = self.transport.subscribe()?;
        let doc_events = self.doc.lock().subscribe();
        self.start().await?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(transport_events, doc_events, shutdown_rx));
        Ok(SyncHandle {
            shutdown: shutdown_tx,
            task,
        })
    }

    async fn run(
        mut self,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        mut doc_events: Subscription,
        mut shutdown: oneshot::Receiver<()>,
    ) -> Result<()> {
        let mut ticker = self.ticker();
        let mut tick_epoch = self.sequencer.epoch();

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = transport_events.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        TransportEvent::Message { message_type, payload } => {
                            let handled = self.on_transport_message(&message_type, &payload).await;
                            if let Err(err) = handled {
                                warn!(error = %err, "failed to handle transport message");
                            }
                        }
                        TransportEvent::Reconnected => {
                            if let Err(err) = self.on_connected().await {
                                warn!(error = %err, "reconnect handshake failed");
                            }
                            ticker = self.ticker();
                            tick_epoch = self.sequencer.epoch();
                        }
                        TransportEvent::Closed => self.on_disconnected(),
                    }
                }
                event = doc_events.recv() => {
                    let Some(event) = event else { break };
                    if let Err(err) = self.on_local_update(&event).await {
                        warn!(error = %err, "failed to send local update");
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.on_resync_tick(tick_epoch).await {
                        warn!(error = %err, "resync failed");
                    }
                }
            }
        }
        debug!(peer = %self.sequencer.local_id(), "sync task stopped");
        Ok(())
    }
}

/// Handle to a running [`SyncManager`].
pub struct SyncHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl SyncHandle {
    /// Stop the background task and wait for it.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.task.await.map_err(SdkError::from)?
    }
}
