//! Wire format between the host and a sourcer process.
//!
//! 1. The host launches the plugin with `REGSCORE_SOURCER_COOKIE` set in
//!    its environment. A plugin that does not see the expected cookie
//!    exits without speaking the protocol.
//! 2. The plugin prints one handshake line, `regscore-sourcer|<version>`.
//! 3. The host writes one JSON [`Request`] per line. The plugin answers
//!    each with one JSON [`ReplyHeader`] line; an `ok` header is followed
//!    by exactly `length` raw image bytes.
//!
//! All of stdout belongs to the protocol. Plugins log to stderr.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Version both sides must agree on during the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// First field of the handshake line.
pub const HANDSHAKE_PREFIX: &str = "regscore-sourcer";

/// Environment variable carrying the magic cookie.
pub const COOKIE_KEY: &str = "REGSCORE_SOURCER_COOKIE";

/// Cookie value shared by the host and every stock plugin.
pub const COOKIE_VALUE: &str = "5e1d3c0a-regscore-sourcer";

/// Largest image payload either side accepts (64 MiB).
pub const MAX_IMAGE_BYTES: u64 = 64 * 1024 * 1024;

/// Handshake parameters. Host and plugin must be built with matching values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    pub protocol_version: u32,
    pub cookie_key: String,
    pub cookie_value: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            cookie_key: COOKIE_KEY.to_string(),
            cookie_value: COOKIE_VALUE.to_string(),
        }
    }
}

/// Host-to-plugin request, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    GetImage,
}

/// Plugin-to-host reply header, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyHeader {
    /// Followed by `length` raw bytes of image data.
    Ok {
        metadata: BTreeMap<String, String>,
        length: u64,
    },
    /// Sourcing failed; no payload follows.
    Err(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("Expected 'regscore-sourcer|<version>', got '{0}'")]
    Malformed(String),

    #[error("Protocol version mismatch: host speaks {expected}, plugin speaks {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
}

/// The line a plugin prints once it is ready.
pub fn handshake_line(version: u32) -> String {
    format!("{HANDSHAKE_PREFIX}|{version}")
}

/// Validate a plugin's handshake line against the expected version.
pub fn check_handshake(line: &str, expected: u32) -> Result<(), HandshakeError> {
    let line = line.trim_end();
    let malformed = || HandshakeError::Malformed(line.to_string());

    let (prefix, version) = line.split_once('|').ok_or_else(malformed)?;
    if prefix != HANDSHAKE_PREFIX {
        return Err(malformed());
    }
    let actual: u32 = version.parse().map_err(|_| malformed())?;
    if actual != expected {
        return Err(HandshakeError::VersionMismatch { expected, actual });
    }
    Ok(())
}
