// SPDX-License-Identifier: MIT

//! Wire types for the NCALayer daemon protocol.
//!
//! Every request names a daemon module and a method inside it, plus an
//! ordered argument list. Responses carry a string status code, a message,
//! and an arbitrary payload. The daemon does not echo any request
//! identifier, which is why calls must be serialized (see
//! [`crate::correlate`]).

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The daemon module implementing the common signing operations.
pub const COMMON_UTILS: &str = "kz.gov.pki.knca.commonUtils";

/// Response code for a successful call.
pub const CODE_OK: &str = "200";
/// Response code for a daemon-reported failure.
pub const CODE_ERROR: &str = "500";

/// A request frame sent to the daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonRequest {
    pub module: String,
    pub method: String,
    /// Positional arguments; the daemon rejects named parameters. Omitted
    /// from the JSON entirely when empty, which is what the daemon expects
    /// for argument-less methods.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
}

impl DaemonRequest {
    /// A request against the `commonUtils` module.
    pub fn common(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            module: COMMON_UTILS.to_string(),
            method: method.into(),
            args,
        }
    }
}

/// A response frame received from the daemon.
///
/// All fields are optional on the wire; missing fields deserialize to their
/// defaults so a malformed-but-parseable frame still surfaces as a protocol
/// error rather than a serde error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonResponse {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub response_object: Value,
}

/// Which of the key pair's purposes a signature should use.
///
/// EDS certificates come in pairs: one marked for authentication, one for
/// legally-binding signatures. The daemon filters the certificate picker by
/// this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyPurpose {
    Authentication,
    Signature,
}

impl KeyPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPurpose::Authentication => "AUTHENTICATION",
            KeyPurpose::Signature => "SIGNATURE",
        }
    }
}

/// Certificate metadata returned by the daemon's `getKeyInfo` method.
///
/// The daemon returns whatever the selected certificate carries; everything
/// is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyInfo {
    pub alias: Option<String>,
    pub key_id: Option<String>,
    pub algorithm: Option<String>,
    pub subject_cn: Option<String>,
    pub subject_dn: Option<String>,
    pub issuer_cn: Option<String>,
    pub issuer_dn: Option<String>,
    pub serial_number: Option<String>,
    /// Validity bounds as epoch-millisecond strings.
    pub cert_not_before: Option<String>,
    pub cert_not_after: Option<String>,
    pub authority_key_identifier: Option<String>,
    pub pem: Option<String>,
}

/// The challenge signed during EDS authentication.
///
/// The timestamp makes every challenge unique; the backend checks it for
/// freshness when verifying the signature.
#[derive(Debug, Clone, Serialize)]
pub struct AuthChallenge {
    pub timestamp: String,
    pub action: String,
}

impl AuthChallenge {
    /// A challenge stamped with the current time.
    pub fn new() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            action: "authenticate".to_string(),
        }
    }

    /// Render the challenge into the XML document the backend expects.
    ///
    /// The layout is fixed; the backend verifies the signature over this
    /// exact structure.
    pub fn to_xml(&self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <auth>\n  <timestamp>{}</timestamp>\n  <action>{}</action>\n</auth>",
            self.timestamp, self.action
        )
    }
}

impl Default for AuthChallenge {
    fn default() -> Self {
        Self::new()
    }
}
