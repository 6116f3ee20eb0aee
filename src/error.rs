// SPDX-License-Identifier: MIT

//! Error types for the NCALayer client and the EDS authentication flow.

use reqwest::StatusCode;
use tokio_tungstenite::tungstenite;

/// Errors that occur while establishing or using the daemon connection.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConnectionError {
    /// The WebSocket connection to the daemon failed.
    ///
    /// This covers a refused connection (the daemon isn't running), a failed
    /// TLS handshake, and I/O errors on an established socket. Retrying is
    /// reasonable once the daemon is known to be up, although a certificate
    /// problem will not resolve itself.
    #[error("the connection to the signing daemon failed: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// The TLS configuration could not be constructed.
    ///
    /// This is not returned for TLS errors during the handshake; retrying
    /// will not help.
    #[error("TLS could not be configured: {0}")]
    Tls(#[from] native_tls::Error),

    /// The daemon did not accept the connection within the configured
    /// deadline.
    ///
    /// The daemon can take several seconds to start listening after launch,
    /// so retrying is usually the right response.
    #[error("timed out while connecting to the signing daemon")]
    Timeout,

    /// The connection attempt was cancelled by a concurrent call to
    /// [`crate::connection::ConnectionManager::close`].
    #[error("the connection attempt was cancelled")]
    Cancelled,

    /// The connection is not open.
    ///
    /// Returned when an operation requires an open connection and none
    /// exists, or when the daemon closed the socket while a call was
    /// outstanding.
    #[error("the connection to the signing daemon is closed")]
    Closed,
}

/// Errors returned by daemon protocol operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ClientError {
    /// The underlying connection failed before or during the call.
    ///
    /// Refer to [`ConnectionError`] for the possible causes and whether
    /// retrying is advisable.
    #[error("connection error with the signing daemon: {0}")]
    Connection(#[from] ConnectionError),

    /// The daemon did not respond to the call within the configured
    /// deadline.
    ///
    /// Signing calls wait on the user interacting with the daemon's UI, so
    /// a timeout commonly means the prompt was left unattended. The call
    /// must be considered unsettled: the daemon may still act on it.
    #[error("the signing daemon did not respond in time")]
    Timeout,

    /// The daemon reported a failure for this call.
    ///
    /// This covers the user cancelling the signing prompt, a missing or
    /// expired certificate, and any other error the daemon chooses to
    /// report. The message is the daemon's own, localized to the daemon's
    /// current locale.
    #[error("the signing daemon reported an error (code {code}): {message}")]
    Daemon { code: String, message: String },

    /// The daemon responded with a code this client does not recognize.
    ///
    /// The protocol defines `"200"` and `"500"`; anything else is a
    /// protocol violation and likely a daemon version mismatch.
    #[error("unrecognized response code from the signing daemon: {code}")]
    Protocol { code: String },

    /// A request or response could not be serialized or deserialized.
    #[error("failed to serialize a request or deserialize a response: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned by the portal backend collaborator.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The HTTP request could not be completed.
    ///
    /// This is likely a transient networking problem, or the backend base
    /// URL is wrong.
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend rejected the credentials or the session token expired.
    ///
    /// Callers are expected to invalidate the local session and force
    /// re-authentication.
    #[error("the backend rejected the request as unauthorized")]
    Unauthorized,

    /// The backend returned a non-success status.
    #[error("the backend returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Errors returned by the authentication flow.
///
/// Each variant identifies the step that failed, so the caller can present
/// a meaningful message and offer a retry. No step is retried internally.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AuthError {
    /// An authentication attempt is already in flight; the new attempt was
    /// rejected without side effects.
    #[error("an authentication attempt is already in progress")]
    AlreadyInProgress,

    /// Connecting to the signing daemon failed (step 1).
    #[error("could not reach the signing daemon: {0}")]
    Connection(#[source] ConnectionError),

    /// Signing the authentication challenge failed (step 3).
    ///
    /// Covers a daemon timeout, the user cancelling at the daemon UI, and
    /// daemon-reported errors.
    #[error("signing the authentication challenge failed: {0}")]
    Signing(#[source] ClientError),

    /// The backend rejected or failed to verify the signed challenge
    /// (step 4).
    #[error("the backend could not verify the signature: {0}")]
    Verification(#[source] BackendError),

    /// Fetching or reconciling the user profile failed (step 6).
    #[error("fetching the user profile failed: {0}")]
    Profile(#[source] BackendError),

    /// No session is available for an operation that requires one.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The session store failed to load or persist the session.
    #[error("the session store failed: {0}")]
    Store(anyhow::Error),
}
