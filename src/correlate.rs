// SPDX-License-Identifier: MIT

//! Correlation of daemon responses with the calls that requested them.
//!
//! The daemon protocol carries no request identifier, so responses can only
//! be matched to calls by order. A naive shared-callback design misroutes
//! responses as soon as two calls overlap; instead, calls are serialized:
//! at most one is in flight on the connection at any time, and later calls
//! queue on the dispatch mutex in arrival order. Each call is tagged with a
//! UUID used for log correlation and for settling timeout races, not on the
//! wire.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::connection::{ConnectionManager, PendingCall};
use crate::error::{ClientError, ConnectionError};
use crate::protocol::{DaemonRequest, DaemonResponse, CODE_ERROR, CODE_OK};

/// Dispatches calls to the daemon one at a time.
#[derive(Debug)]
pub struct Correlator {
    connection: Arc<ConnectionManager>,
    config: Arc<Config>,
    /// The serialization point: held for the full duration of a call, from
    /// dispatch to settlement. Tokio mutexes hand the lock to waiters in
    /// arrival order, which is what gives invokes their submission-order
    /// guarantee.
    queue: tokio::sync::Mutex<()>,
}

impl Correlator {
    pub fn new(connection: Arc<ConnectionManager>, config: Arc<Config>) -> Self {
        Self {
            connection,
            config,
            queue: tokio::sync::Mutex::new(()),
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Send a request and wait for the daemon's response payload.
    ///
    /// Settles exactly once: with the payload on code `"200"`, with
    /// [`ClientError::Daemon`] on `"500"`, [`ClientError::Protocol`] on any
    /// other code, [`ClientError::Timeout`] when the deadline passes, or a
    /// connection error if the socket goes away mid-call.
    #[instrument(level = "debug", skip_all, fields(method = %request.method, call_id = tracing::field::Empty))]
    pub async fn invoke(&self, request: &DaemonRequest) -> Result<Value, ClientError> {
        let _turn = self.queue.lock().await;

        let call_id = Uuid::now_v7();
        tracing::Span::current().record("call_id", tracing::field::display(call_id));
        let frame = serde_json::to_string(request)?;

        let (respond_to, response) = oneshot::channel();
        self.connection.install_pending(PendingCall {
            id: call_id,
            sent_at: Instant::now(),
            respond_to,
        });
        if let Err(error) = self.connection.send_text(frame).await {
            self.connection.clear_pending(call_id);
            return Err(error.into());
        }
        tracing::debug!("Request dispatched to the daemon");

        let response = match tokio::time::timeout(self.config.request_timeout, response).await {
            Ok(Ok(response)) => response,
            // The connection was torn down while we waited; the reader task
            // dropped our pending call.
            Ok(Err(_closed)) => return Err(ConnectionError::Closed.into()),
            Err(_elapsed) => {
                self.connection.clear_pending(call_id);
                tracing::warn!("The daemon did not respond before the deadline");
                return Err(ClientError::Timeout);
            }
        };
        settle(response)
    }

    /// Send a request the daemon never answers.
    ///
    /// Passes through the same queue as [`Self::invoke`] so a
    /// fire-and-forget send cannot interleave with an outstanding call, but
    /// installs no pending call and returns once the frame is written.
    #[instrument(level = "debug", skip_all, fields(method = %request.method))]
    pub async fn notify(&self, request: &DaemonRequest) -> Result<(), ClientError> {
        let _turn = self.queue.lock().await;
        let frame = serde_json::to_string(request)?;
        self.connection.send_text(frame).await?;
        tracing::debug!("Notification dispatched to the daemon");
        Ok(())
    }
}

fn settle(response: DaemonResponse) -> Result<Value, ClientError> {
    match response.code.as_str() {
        CODE_OK => Ok(response.response_object),
        CODE_ERROR => Err(ClientError::Daemon {
            code: response.code,
            message: response.message,
        }),
        _ => Err(ClientError::Protocol {
            code: response.code,
        }),
    }
}
