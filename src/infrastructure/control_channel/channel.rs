//! Persistent, authenticated, reconnecting control channel.
//!
//! The channel is a TCP connection framed as newline-delimited JSON. The
//! first line the worker writes is a signed `hello` handshake; every line
//! after that is a [`ControlMessage`] in either direction.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::pending::PendingRequests;
use super::reconnect::{ReconnectPolicy, ReconnectState};
use crate::domain::errors::ChannelError;
use crate::domain::models::{ConfigPropertyRecord, ControlMessage, SecurityQuery};
use crate::domain::ports::{ConfigBackend, SecurityBackend};
use crate::infrastructure::coordinator::{parse_control_message, RequestSigner};

const MAX_LINE: usize = 1024 * 1024;

/// Static settings of a control channel.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// `host:port` to connect to
    pub address: String,
    /// Path signed in the handshake
    pub path: String,
    /// This worker's id
    pub worker_id: String,
    /// Bounded wait for round trips and connection attempts
    pub round_trip_timeout: Duration,
    /// Reconnect tuning
    pub reconnect: ReconnectPolicy,
}

/// Control channel handle, shared by the router, the security cache and the
/// scheduling loop.
pub struct ControlChannel {
    settings: ChannelSettings,
    signer: RequestSigner,
    writer: Mutex<Option<mpsc::UnboundedSender<String>>>,
    connected: watch::Sender<bool>,
    pending: PendingRequests<String, Value>,
    inbound: mpsc::UnboundedSender<ControlMessage>,
    shutdown: CancellationToken,
}

impl ControlChannel {
    /// Create a channel. Messages not answering a round trip are forwarded to
    /// `inbound`. Cancelling `shutdown` stops the channel.
    pub fn new(
        settings: ChannelSettings,
        signer: RequestSigner,
        inbound: mpsc::UnboundedSender<ControlMessage>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (connected, _) = watch::channel(false);
        Arc::new(Self {
            settings,
            signer,
            writer: Mutex::new(None),
            connected,
            pending: PendingRequests::new(),
            inbound,
            shutdown,
        })
    }

    /// Spawn the connect/reconnect loop.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let channel = Arc::clone(self);
        tokio::spawn(async move { channel.run().await })
    }

    /// Whether the channel is currently connected.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Number of round trips awaiting an answer.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn lock_writer(&self) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<String>>> {
        self.writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queue a message on the current connection.
    pub fn send(&self, message: &ControlMessage) -> Result<(), ChannelError> {
        let line =
            serde_json::to_string(message).map_err(|e| ChannelError::Codec(e.to_string()))?;
        match self.lock_writer().as_ref() {
            Some(tx) => tx.send(line).map_err(|_| ChannelError::NotConnected),
            None => Err(ChannelError::NotConnected),
        }
    }

    /// Send a message built around a fresh correlation id and await its answer.
    pub async fn round_trip<F>(&self, build: F) -> Result<Value, ChannelError>
    where
        F: FnOnce(String) -> ControlMessage + Send,
    {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        let correlation_id = Uuid::new_v4().to_string();
        let rx = self.pending.register(correlation_id.clone());
        if let Err(e) = self.send(&build(correlation_id.clone())) {
            self.pending.remove(&correlation_id);
            return Err(e);
        }
        self.pending
            .wait(&correlation_id, rx, self.settings.round_trip_timeout)
            .await
    }

    /// Stop reconnecting, close the connection and fail pending round trips.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.mark_disconnected();
    }

    fn mark_disconnected(&self) {
        self.lock_writer().take();
        self.connected.send_replace(false);
        let failed = self.pending.fail_all(&ChannelError::Closed);
        if failed > 0 {
            debug!(failed, "failed pending round trips on disconnect");
        }
    }

    async fn run(self: Arc<Self>) {
        let mut state = ReconnectState::new(self.settings.reconnect);

        while !self.shutdown.is_cancelled() {
            let delay = match self.connect().await {
                Ok(stream) => {
                    let connected_at = Instant::now();
                    info!(address = %self.settings.address, "control channel connected");
                    let outcome = self.run_session(stream).await;
                    self.mark_disconnected();
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    match outcome {
                        Ok(()) => info!("control channel closed by coordinator"),
                        Err(e) => {
                            if state.should_log(&e.to_string(), Instant::now()) {
                                warn!(error = %e, "control channel connection lost");
                            }
                        }
                    }
                    state.on_disconnect(connected_at.elapsed())
                }
                Err(e) => {
                    let delay = state.on_failure();
                    if state.should_log(&e.to_string(), Instant::now()) {
                        warn!(
                            address = %self.settings.address,
                            error = %e,
                            retry_in_secs = delay.as_secs(),
                            "unable to connect control channel"
                        );
                    } else {
                        debug!(error = %e, "control channel connect failed");
                    }
                    delay
                }
            };

            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.mark_disconnected();
        info!("control channel stopped");
    }

    async fn connect(&self) -> Result<TcpStream, ChannelError> {
        match tokio::time::timeout(
            self.settings.round_trip_timeout,
            TcpStream::connect(&self.settings.address),
        )
        .await
        {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ChannelError::Io(e.to_string())),
            Err(_) => Err(ChannelError::Timeout(self.settings.round_trip_timeout)),
        }
    }

    fn hello(&self) -> Value {
        let signed = self.signer.sign(&self.settings.path);
        json!({
            "type": "hello",
            "workerId": self.settings.worker_id,
            "username": signed.username,
            "path": self.settings.path,
            "time": signed.time,
            "signature": signed.signature,
        })
    }

    async fn run_session(&self, stream: TcpStream) -> Result<(), ChannelError> {
        let (read, write) = stream.into_split();
        let mut reader = FramedRead::new(read, LinesCodec::new_with_max_length(MAX_LINE));
        let mut writer = FramedWrite::new(write, LinesCodec::new());

        writer
            .send(self.hello().to_string())
            .await
            .map_err(|e| ChannelError::Io(e.to_string()))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.lock_writer() = Some(tx);
        self.connected.send_replace(true);

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return Ok(()),
                Some(line) = rx.recv() => {
                    writer
                        .send(line)
                        .await
                        .map_err(|e| ChannelError::Io(e.to_string()))?;
                }
                frame = reader.next() => match frame {
                    Some(Ok(line)) => self.dispatch(&line),
                    Some(Err(e)) => return Err(ChannelError::Io(e.to_string())),
                    None => return Ok(()),
                },
            }
        }
    }

    /// Route one received line: answers resolve pending round trips, other
    /// messages go to the inbound queue.
    fn dispatch(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let message = match serde_json::from_str::<Value>(line)
            .map_err(|e| e.to_string())
            .and_then(|v| parse_control_message(v).map_err(|e| e.to_string()))
        {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "ignoring invalid control message");
                return;
            }
        };

        match message {
            ControlMessage::SecurityResult {
                correlation_id,
                value,
                error,
            } => {
                let result = error.map_or(Ok(value), |e| Err(ChannelError::Remote(e)));
                if !self.pending.resolve(&correlation_id, result) {
                    debug!(correlation_id = %correlation_id, "answer for unknown or expired round trip");
                }
            }
            ControlMessage::ModuleConfigResult {
                correlation_id,
                properties,
                error,
            } => {
                let result = match error {
                    Some(e) => Err(ChannelError::Remote(e)),
                    None => serde_json::to_value(properties)
                        .map_err(|e| ChannelError::Codec(e.to_string())),
                };
                if !self.pending.resolve(&correlation_id, result) {
                    debug!(correlation_id = %correlation_id, "answer for unknown or expired round trip");
                }
            }
            other => {
                debug!(message_type = other.message_type(), "control message received");
                if self.inbound.send(other).is_err() {
                    debug!("inbound control queue closed");
                }
            }
        }
    }
}

#[async_trait]
impl SecurityBackend for ControlChannel {
    fn is_connected(&self) -> bool {
        Self::is_connected(self)
    }

    async fn security_query(
        &self,
        module_name: &str,
        user_id: &str,
        query: SecurityQuery,
    ) -> Result<Value, ChannelError> {
        let module_name = module_name.to_string();
        let user_id = user_id.to_string();
        self.round_trip(move |correlation_id| ControlMessage::SecurityQuery {
            correlation_id,
            module_name,
            user_id,
            query,
        })
        .await
    }
}

#[async_trait]
impl ConfigBackend for ControlChannel {
    fn is_connected(&self) -> bool {
        Self::is_connected(self)
    }

    async fn module_config(
        &self,
        environment_name: &str,
        module_name: &str,
        component_name: &str,
    ) -> Result<Vec<ConfigPropertyRecord>, ChannelError> {
        let environment_name = environment_name.to_string();
        let module_name = module_name.to_string();
        let component_name = component_name.to_string();
        let rows = self
            .round_trip(move |correlation_id| ControlMessage::ModuleConfigLoad {
                correlation_id,
                module_name,
                environment_name,
                component_name,
            })
            .await?;
        serde_json::from_value(rows).map_err(|e| ChannelError::Codec(e.to_string()))
    }
}
