// SPDX-License-Identifier: MIT

//! In-process stand-ins for the signing daemon.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::Message;

use ncalink::config::Config;

/// How a [`MockDaemon`] answers a request.
pub enum Reply {
    /// Answer immediately.
    Now(Value),
    /// Answer after a delay; the daemon reads no further requests while it
    /// waits, like the real one blocking on its UI.
    After(Duration, Value),
    /// Leave the request unanswered.
    Silent,
}

/// A scripted NCALayer stand-in on a loopback port.
pub struct MockDaemon {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    task: tokio::task::JoinHandle<()>,
}

impl MockDaemon {
    /// Start a daemon that answers each request frame with `handler`'s
    /// reply. The handler sees connections sequentially, in accept order.
    pub async fn spawn<F>(mut handler: F) -> Self
    where
        F: FnMut(Value) -> Reply + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock daemon");
        let addr = listener.local_addr().expect("mock daemon address");
        let accepted = Arc::new(AtomicUsize::new(0));
        let open = Arc::new(AtomicUsize::new(0));
        let accepted_task = Arc::clone(&accepted);
        let open_task = Arc::clone(&open);
        let task = tokio::spawn(async move {
            while let Ok((stream, _peer)) = listener.accept().await {
                accepted_task.fetch_add(1, Ordering::SeqCst);
                open_task.fetch_add(1, Ordering::SeqCst);
                let mut socket = match tokio_tungstenite::accept_async(stream).await {
                    Ok(socket) => socket,
                    Err(_) => {
                        open_task.fetch_sub(1, Ordering::SeqCst);
                        continue;
                    }
                };
                while let Some(Ok(message)) = socket.next().await {
                    match message {
                        Message::Text(raw) => {
                            let request: Value =
                                serde_json::from_str(&raw).expect("daemon request is JSON");
                            let reply = match handler(request) {
                                Reply::Now(body) => body,
                                Reply::After(delay, body) => {
                                    tokio::time::sleep(delay).await;
                                    body
                                }
                                Reply::Silent => continue,
                            };
                            if socket
                                .send(Message::Text(reply.to_string()))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                open_task.fetch_sub(1, Ordering::SeqCst);
            }
        });
        Self {
            addr,
            accepted,
            open,
            task,
        }
    }

    /// A configuration pointing at this daemon, with timeouts short enough
    /// for tests.
    pub fn config(&self) -> Config {
        Config {
            daemon_endpoint: self.endpoint(),
            request_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(5),
            ..Config::default()
        }
    }

    pub fn endpoint(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    pub fn connections_accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn connections_open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Wait until the daemon sees no open connection.
    pub async fn wait_for_disconnect(&self) {
        for _ in 0..200 {
            if self.connections_open() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("the daemon connection was never closed");
    }
}

impl Drop for MockDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A success frame carrying `payload`.
pub fn ok_frame(payload: Value) -> Value {
    json!({ "code": "200", "message": "", "responseObject": payload })
}

/// A daemon-reported failure frame.
pub fn error_frame(message: &str) -> Value {
    json!({ "code": "500", "message": message, "responseObject": null })
}

/// An address nothing is listening on.
pub async fn refused_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind throwaway listener");
    let addr = listener.local_addr().expect("throwaway address");
    drop(listener);
    format!("ws://{addr}/")
}
