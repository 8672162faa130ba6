// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Pairing URI parsing.
//!
//! Format: `wc:<topic>@<version>?symKey=<hex>&relay-protocol=<name>[&expiryTimestamp=<unix>]`

use std::fmt;
use std::str::FromStr;

use url::Url;

/// Protocol prefix of every pairing URI.
pub const PAIRING_SCHEME: &str = "wc";

/// Relay protocol assumed when the URI does not name one.
pub const DEFAULT_RELAY_PROTOCOL: &str = "irn";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UriError {
    #[error("not a URI: {0}")]
    Malformed(String),

    #[error("unrecognized protocol prefix: {0}")]
    Scheme(String),

    #[error("missing pairing topic")]
    MissingTopic,

    #[error("invalid protocol version: {0}")]
    Version(String),

    #[error("missing symKey parameter")]
    MissingSymKey,

    #[error("invalid expiryTimestamp: {0}")]
    Expiry(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingUri {
    pub topic: String,
    pub version: u8,
    pub sym_key: String,
    pub relay_protocol: String,
    pub relay_data: Option<String>,
    pub expiry: Option<i64>,
}

impl PairingUri {
    /// Whether the URI carries an expiry that has already passed.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }
}

impl FromStr for PairingUri {
    type Err = UriError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(raw.trim()).map_err(|e| UriError::Malformed(e.to_string()))?;
        if url.scheme() != PAIRING_SCHEME {
            return Err(UriError::Scheme(url.scheme().to_string()));
        }

        // `wc:` URIs are opaque, so `<topic>@<version>` lands in the path.
        let (topic, version) = url
            .path()
            .split_once('@')
            .ok_or(UriError::MissingTopic)?;
        if topic.is_empty() || !topic.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(UriError::MissingTopic);
        }
        let version: u8 = version
            .parse()
            .map_err(|_| UriError::Version(version.to_string()))?;

        let mut sym_key = None;
        let mut relay_protocol = None;
        let mut relay_data = None;
        let mut expiry = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "symKey" => sym_key = Some(value.into_owned()),
                "relay-protocol" => relay_protocol = Some(value.into_owned()),
                "relay-data" => relay_data = Some(value.into_owned()),
                "expiryTimestamp" => {
                    expiry = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| UriError::Expiry(value.to_string()))?,
                    )
                }
                _ => {}
            }
        }

        let sym_key = sym_key
            .filter(|k| !k.is_empty())
            .ok_or(UriError::MissingSymKey)?;

        Ok(Self {
            topic: topic.to_string(),
            version,
            sym_key,
            relay_protocol: relay_protocol.unwrap_or_else(|| DEFAULT_RELAY_PROTOCOL.to_string()),
            relay_data,
            expiry,
        })
    }
}

impl fmt::Display for PairingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{PAIRING_SCHEME}:{}@{}?relay-protocol={}&symKey={}",
            self.topic, self.version, self.relay_protocol, self.sym_key
        )?;
        if let Some(expiry) = self.expiry {
            write!(f, "&expiryTimestamp={expiry}")?;
        }
        Ok(())
    }
}
