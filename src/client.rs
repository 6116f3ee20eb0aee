// SPDX-License-Identifier: MIT

//! Typed operations against the signing daemon.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::instrument;

use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::correlate::Correlator;
use crate::error::ClientError;
use crate::protocol::{DaemonRequest, KeyInfo, KeyPurpose};

/// A client for the daemon's `commonUtils` operations.
///
/// Operations require an open connection; call
/// [`ConnectionManager::connect`] (or [`SigningClient::probe`]) first. None
/// of the signing operations are idempotent — resubmitting a request may
/// prompt the user again at the daemon UI.
#[derive(Debug, Clone)]
pub struct SigningClient {
    correlator: Arc<Correlator>,
}

impl SigningClient {
    pub fn new(config: Arc<Config>) -> Self {
        let connection = Arc::new(ConnectionManager::new(Arc::clone(&config)));
        Self {
            correlator: Arc::new(Correlator::new(connection, config)),
        }
    }

    /// The connection this client operates on.
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        self.correlator.connection()
    }

    /// Determine whether the daemon is reachable.
    ///
    /// Attempts to connect; `true` on success, `false` on any connection
    /// error. Never returns an error. The connection is left open on
    /// success so an immediately following operation can reuse it; probe
    /// again after a daemon restart by calling
    /// [`ConnectionManager::close`] first.
    pub async fn probe(&self) -> bool {
        self.connection().connect().await.is_ok()
    }

    /// List the credential stores currently available to the daemon.
    ///
    /// `PKCS12` is always present; hardware tokens appear when plugged in.
    #[instrument(level = "debug", skip_all)]
    pub async fn list_credential_stores(&self) -> Result<Vec<String>, ClientError> {
        let request = DaemonRequest::common("getActiveTokens", vec![]);
        let stores = self.correlator.invoke(&request).await?;
        Ok(serde_json::from_value(stores)?)
    }

    /// Fetch the certificate metadata for a credential store.
    ///
    /// The daemon shows its certificate picker, so this may block on the
    /// user.
    #[instrument(level = "debug", skip_all, fields(store = %store))]
    pub async fn get_key_info(&self, store: &str) -> Result<KeyInfo, ClientError> {
        let request = DaemonRequest::common("getKeyInfo", vec![json!(store)]);
        let info = self.correlator.invoke(&request).await?;
        Ok(serde_json::from_value(info)?)
    }

    /// Sign an XML document.
    ///
    /// Blocks on the user confirming (or cancelling) at the daemon UI. The
    /// two trailing empty arguments are part of the wire format.
    #[instrument(level = "debug", skip_all, fields(store = %store, purpose = purpose.as_str()))]
    pub async fn sign_xml(
        &self,
        store: &str,
        purpose: KeyPurpose,
        xml: &str,
    ) -> Result<String, ClientError> {
        let request = DaemonRequest::common(
            "signXml",
            vec![
                json!(store),
                json!(purpose.as_str()),
                json!(xml),
                json!(""),
                json!(""),
            ],
        );
        let signed = self.correlator.invoke(&request).await?;
        Ok(serde_json::from_value(signed)?)
    }

    /// Sign a raw base64-encoded payload.
    #[instrument(level = "debug", skip_all, fields(store = %store, purpose = purpose.as_str()))]
    pub async fn sign_raw(
        &self,
        store: &str,
        purpose: KeyPurpose,
        base64: &str,
    ) -> Result<String, ClientError> {
        let request = DaemonRequest::common(
            "signData",
            vec![json!(store), json!(purpose.as_str()), json!(base64)],
        );
        let signed = self.correlator.invoke(&request).await?;
        Ok(serde_json::from_value(signed)?)
    }

    /// Switch the language of the daemon's UI.
    ///
    /// The daemon does not answer this call; success means the request was
    /// written to the socket. `lang` is one of `kk`, `ru`, `en`.
    #[instrument(level = "debug", skip_all, fields(lang = %lang))]
    pub async fn set_locale(&self, lang: &str) -> Result<(), ClientError> {
        let request = DaemonRequest::common("changeLocale", vec![Value::from(lang)]);
        self.correlator.notify(&request).await
    }
}
