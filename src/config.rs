// SPDX-License-Identifier: MIT

//! Client configuration.
//!
//! The daemon endpoint and timeouts were fixed constants in the portal this
//! crate grew out of; they are configuration here, with the production
//! values as defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the NCALayer client and the authentication flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The WebSocket endpoint of the local signing daemon.
    ///
    /// The daemon listens on a fixed loopback port; there is no reason to
    /// change this outside of tests.
    pub daemon_endpoint: String,
    /// The base URL of the portal backend, including the API prefix.
    pub backend_url: String,
    /// The amount of time to wait for the daemon to answer a single call.
    ///
    /// Signing calls block on the user interacting with the daemon UI, so
    /// this needs to be generous.
    pub request_timeout: Duration,
    /// The amount of time to wait for the daemon to accept a connection.
    pub connect_timeout: Duration,
    /// The credential store used for authentication signatures.
    ///
    /// `PKCS12` is the file-based store every NCALayer installation has;
    /// hardware tokens show up under their own store names (see
    /// [`crate::client::SigningClient::list_credential_stores`]).
    pub default_store: String,
    /// Skip verification of the daemon's TLS certificate.
    ///
    /// The daemon's loopback certificate chains to the national root CA,
    /// which is not in every system trust store. Prefer installing the root
    /// over enabling this.
    pub accept_invalid_certs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon_endpoint: "wss://127.0.0.1:13579/".to_string(),
            backend_url: "http://localhost:8000/api".to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            default_store: "PKCS12".to_string(),
            accept_invalid_certs: false,
        }
    }
}

#[cfg(feature = "cli")]
impl std::fmt::Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            toml::ser::to_string_pretty(&self).unwrap_or_default()
        )
    }
}

#[cfg(feature = "cli")]
fn private_load_config<T>(path: &std::path::Path) -> anyhow::Result<T>
where
    T: Default + std::fmt::Display + serde::de::DeserializeOwned,
{
    use anyhow::Context;

    let config = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read from path {path:?}"))?;
    tracing::info!(path=%path.display(), "Read from configuration file");
    toml::from_str(&config)
        .inspect_err(|error| {
            eprintln!("Failed to parse configuration loaded from {path:?}:\n{error}");
            eprintln!("Example config file:\n\n{}", T::default());
        })
        .context("configuration file is invalid")
}

/// Load the configuration with fallback options.
///
/// If `path` is [`None`], the `default` path, which should be relative to
/// $XDG_CONFIG_HOME, is checked. If the default config doesn't exist, the
/// [`Default`] implementation is returned.
///
/// # Errors
///
/// In the event that one of the config files exists, but is invalid, an
/// error is returned.
#[cfg(feature = "cli")]
pub fn load_config<T>(
    path: Option<std::path::PathBuf>,
    default: &std::path::Path,
) -> anyhow::Result<T>
where
    T: Default + std::fmt::Display + serde::de::DeserializeOwned,
{
    path.or_else(|| {
        std::env::var("XDG_CONFIG_HOME")
            .or_else(|_| std::env::var("HOME").map(|home| format!("{home}/.config")))
            .map(std::path::PathBuf::from)
            .ok()
            .map(|base_path| base_path.join(default))
            .filter(|path| path.is_file())
    })
    .map_or_else(
        || {
            tracing::debug!("No configuration file found; using defaults");
            Ok(T::default())
        },
        |path| {
            tracing::info!(?path, "Attempting to load configuration");
            private_load_config::<T>(&path)
        },
    )
}
