// SPDX-License-Identifier: MIT

//! Ownership and lifecycle of the daemon connection.
//!
//! A [`ConnectionManager`] owns at most one WebSocket to the signing daemon
//! at a time. Everything else in this crate requests transitions through it
//! and never touches the transport directly. There is no automatic
//! reconnection; callers decide policy.

use std::sync::Arc;
use std::time::Instant;

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::{
    connect_async_tls_with_config,
    tungstenite::{protocol::Message, Error as WsError},
    Connector, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::error::ConnectionError;
use crate::protocol::DaemonResponse;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// The lifecycle states of the daemon connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Open,
    Closing,
    Failed,
}

/// A listener invoked with `true` when the connection opens and `false` on
/// any terminal transition.
pub type StatusListener = Arc<dyn Fn(bool) + Send + Sync>;

/// A call awaiting the daemon's next response frame.
///
/// At most one of these exists at a time; the id ties the slot back to the
/// call that installed it so a timed-out call cannot clear a successor's
/// slot.
pub(crate) struct PendingCall {
    pub(crate) id: Uuid,
    pub(crate) sent_at: Instant,
    pub(crate) respond_to: oneshot::Sender<DaemonResponse>,
}

struct ConnState {
    status: ConnectionStatus,
    sink: Option<WsSink>,
    reader: Option<tokio::task::JoinHandle<()>>,
    /// Bumped whenever the connection is replaced or torn down, so a reader
    /// task from a previous connection cannot clobber the current state.
    epoch: u64,
}

struct Shared {
    state: tokio::sync::Mutex<ConnState>,
    pending: std::sync::Mutex<Option<PendingCall>>,
    listeners: std::sync::Mutex<Vec<StatusListener>>,
    connect_cancel: std::sync::Mutex<Option<CancellationToken>>,
}

/// Owner of the single connection to the signing daemon.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
    config: Arc<Config>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.config.daemon_endpoint)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: tokio::sync::Mutex::new(ConnState {
                    status: ConnectionStatus::Disconnected,
                    sink: None,
                    reader: None,
                    epoch: 0,
                }),
                pending: std::sync::Mutex::new(None),
                listeners: std::sync::Mutex::new(Vec::new()),
                connect_cancel: std::sync::Mutex::new(None),
            }),
            config,
        }
    }

    /// The current connection status.
    pub async fn status(&self) -> ConnectionStatus {
        self.shared.state.lock().await.status
    }

    /// Register a status listener.
    ///
    /// Registration is additive; registering the same listener (the same
    /// `Arc`) twice is a no-op.
    pub fn add_status_listener(&self, listener: StatusListener) {
        let mut listeners = self.shared.listeners.lock().expect("listener lock poisoned");
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Remove a previously registered listener. Unknown listeners are
    /// ignored.
    pub fn remove_status_listener(&self, listener: &StatusListener) {
        let mut listeners = self.shared.listeners.lock().expect("listener lock poisoned");
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Open the connection to the daemon.
    ///
    /// Suspends until the connection is open or the attempt fails. If the
    /// connection is already open this returns immediately without opening
    /// a second socket; concurrent calls coalesce onto a single attempt.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let mut state = self.shared.state.lock().await;
        if state.status == ConnectionStatus::Open {
            tracing::debug!("Already connected to the signing daemon");
            return Ok(());
        }
        state.status = ConnectionStatus::Connecting;

        let cancel = CancellationToken::new();
        *self
            .shared
            .connect_cancel
            .lock()
            .expect("cancel lock poisoned") = Some(cancel.clone());

        tracing::debug!(endpoint = %self.config.daemon_endpoint, "Connecting to the signing daemon");
        let attempt = tokio::select! {
            _ = cancel.cancelled() => Err(ConnectionError::Cancelled),
            result = tokio::time::timeout(self.config.connect_timeout, self.open_socket()) => {
                match result {
                    Ok(socket) => socket,
                    Err(_elapsed) => Err(ConnectionError::Timeout),
                }
            }
        };
        self.shared
            .connect_cancel
            .lock()
            .expect("cancel lock poisoned")
            .take();

        match attempt {
            Ok(socket) => {
                let (sink, stream) = socket.split();
                state.epoch += 1;
                let reader = tokio::spawn(read_loop(
                    Arc::clone(&self.shared),
                    stream,
                    state.epoch,
                ));
                state.sink = Some(sink);
                state.reader = Some(reader);
                state.status = ConnectionStatus::Open;
                drop(state);
                tracing::info!("Connected to the signing daemon");
                notify_listeners(&self.shared, true);
                Ok(())
            }
            Err(error) => {
                state.status = match error {
                    ConnectionError::Cancelled => ConnectionStatus::Disconnected,
                    _ => ConnectionStatus::Failed,
                };
                drop(state);
                tracing::warn!(%error, "Failed to connect to the signing daemon");
                notify_listeners(&self.shared, false);
                Err(error)
            }
        }
    }

    async fn open_socket(
        &self,
    ) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, ConnectionError> {
        let connector = if self.config.accept_invalid_certs {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .build()?;
            Some(Connector::NativeTls(tls))
        } else {
            None
        };
        let (socket, _response) = connect_async_tls_with_config(
            self.config.daemon_endpoint.as_str(),
            None,
            false,
            connector,
        )
        .await?;
        Ok(socket)
    }

    /// Close the connection.
    ///
    /// Idempotent and always succeeds. Closing while a connect attempt is
    /// in flight cancels the attempt; closing an open connection rejects
    /// any outstanding call.
    pub async fn close(&self) {
        if let Some(cancel) = self
            .shared
            .connect_cancel
            .lock()
            .expect("cancel lock poisoned")
            .take()
        {
            cancel.cancel();
        }

        let mut state = self.shared.state.lock().await;
        if state.status != ConnectionStatus::Open {
            state.status = ConnectionStatus::Disconnected;
            return;
        }
        state.status = ConnectionStatus::Closing;
        state.epoch += 1;
        if let Some(mut sink) = state.sink.take() {
            // Best effort goodbye; the daemon drops the socket either way.
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        if let Some(reader) = state.reader.take() {
            reader.abort();
        }
        state.status = ConnectionStatus::Disconnected;
        drop(state);
        drop_pending(&self.shared);
        tracing::info!("Closed the connection to the signing daemon");
        notify_listeners(&self.shared, false);
    }

    /// Send a text frame on the open connection.
    pub(crate) async fn send_text(&self, text: String) -> Result<(), ConnectionError> {
        let mut state = self.shared.state.lock().await;
        let sink = state.sink.as_mut().ok_or(ConnectionError::Closed)?;
        sink.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Install the pending call the next inbound frame resolves.
    ///
    /// The correlator's call queue guarantees the slot is free; a leftover
    /// entry would mean a settlement bug, so it is dropped loudly.
    pub(crate) fn install_pending(&self, call: PendingCall) {
        let mut pending = self.shared.pending.lock().expect("pending lock poisoned");
        if let Some(stale) = pending.replace(call) {
            tracing::error!(
                call_id = %stale.id,
                "Replaced an unsettled pending call; this is a bug"
            );
        }
    }

    /// Clear the pending slot, but only if it still belongs to `id`.
    ///
    /// Used by the invoke timeout; a response that raced the timer and
    /// settled the call first wins.
    pub(crate) fn clear_pending(&self, id: Uuid) {
        let mut pending = self.shared.pending.lock().expect("pending lock poisoned");
        if pending.as_ref().is_some_and(|call| call.id == id) {
            pending.take();
        }
    }
}

fn notify_listeners(shared: &Shared, connected: bool) {
    let listeners = shared
        .listeners
        .lock()
        .expect("listener lock poisoned")
        .clone();
    tracing::debug!(connected, count = listeners.len(), "Notifying status listeners");
    for listener in listeners {
        // A panicking listener must not take the connection down with it.
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(connected))).is_err() {
            tracing::warn!("A connection status listener panicked");
        }
    }
}

fn drop_pending(shared: &Shared) {
    // Dropping the sender rejects the waiter with a connection error.
    if let Some(call) = shared
        .pending
        .lock()
        .expect("pending lock poisoned")
        .take()
    {
        tracing::debug!(call_id = %call.id, "Dropping pending call on connection teardown");
    }
}

/// Pump inbound frames into the pending call until the socket ends.
async fn read_loop(shared: Arc<Shared>, mut stream: WsStream, epoch: u64) {
    let failed = loop {
        match stream.next().await {
            Some(Ok(Message::Text(raw))) => deliver(&shared, &raw),
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(?frame, "The signing daemon closed the connection");
                break false;
            }
            // The daemon only speaks text frames; tungstenite answers pings
            // internally.
            Some(Ok(_)) => continue,
            Some(Err(error)) => {
                tracing::warn!(%error, "The daemon connection failed");
                break !matches!(error, WsError::ConnectionClosed);
            }
            None => break false,
        }
    };

    let mut state = shared.state.lock().await;
    if state.epoch != epoch {
        // A close() or a newer connection already took over.
        return;
    }
    state.sink = None;
    state.reader = None;
    state.status = if failed {
        ConnectionStatus::Failed
    } else {
        ConnectionStatus::Disconnected
    };
    drop(state);
    drop_pending(&shared);
    notify_listeners(&shared, false);
}

fn deliver(shared: &Shared, raw: &str) {
    let response: DaemonResponse = match serde_json::from_str(raw) {
        Ok(response) => response,
        Err(error) => {
            tracing::warn!(%error, "Discarding unparseable frame from the daemon");
            return;
        }
    };
    let call = shared
        .pending
        .lock()
        .expect("pending lock poisoned")
        .take();
    match call {
        Some(call) => {
            tracing::debug!(
                call_id = %call.id,
                code = %response.code,
                elapsed_ms = call.sent_at.elapsed().as_millis() as u64,
                "Daemon response received"
            );
            // The waiter may have timed out and gone away; nothing to do.
            let _ = call.respond_to.send(response);
        }
        None => {
            tracing::warn!(code = %response.code, "Discarding response with no pending call");
        }
    }
}
