//! Probing a single host and deciding whether it is worth reporting.
//!
//! A [`Probe`] turns one [`Host`] into one [`ProbeResult`]. Nothing in here
//! ever fails past the probe: dial errors, resolution misses and handshake
//! failures are all just [`Outcome`] variants.
mod classify;
mod tls;

pub use classify::Policy;
pub use tls::TlsProbe;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde_derive::Deserialize;

use crate::address::Host;

/// Something that can probe a host.
///
/// The scan engine only talks to this trait, which keeps the worker pool
/// independent of the network.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Probes `host`. For domains the returned host carries the resolved
    /// address when resolution succeeded.
    async fn probe(&self, host: Host) -> ProbeResult;
}

/// TLS protocol versions, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.1")]
    V1_1,
    #[serde(rename = "1.2")]
    V1_2,
    #[serde(rename = "1.3")]
    V1_3,
}

impl TlsVersion {
    /// The highest version defined.
    pub const LATEST: Self = Self::V1_3;

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V1_0 => "1.0",
            Self::V1_1 => "1.1",
            Self::V1_2 => "1.2",
            Self::V1_3 => "1.3",
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TlsVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches(['v', 'V']) {
            "1.0" => Ok(Self::V1_0),
            "1.1" => Ok(Self::V1_1),
            "1.2" => Ok(Self::V1_2),
            "1.3" => Ok(Self::V1_3),
            other => Err(format!(
                "Unknown TLS version '{other}'. Expected one of 1.0, 1.1, 1.2, 1.3"
            )),
        }
    }
}

/// What a completed handshake told us.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Handshake {
    pub version: Option<TlsVersion>,
    /// Negotiated ALPN protocol, empty when none was agreed.
    pub alpn: String,
    /// Subject common name of the leaf certificate.
    pub cert_domain: String,
    /// Issuer organisation(s) of the leaf certificate, `", "`-joined.
    pub cert_issuer: String,
    /// ISO country code, or `"N/A"`.
    pub geo: String,
    pub feasible: bool,
}

/// How far a probe got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The domain did not resolve to any address the policy allows.
    Unresolvable(String),
    /// TCP connect failed or timed out.
    Unreachable(String),
    /// TCP connected but the TLS handshake did not complete.
    HandshakeFailed(String),
    Negotiated(Handshake),
}

/// The result of probing one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub host: Host,
    pub outcome: Outcome,
}

impl ProbeResult {
    pub const fn new(host: Host, outcome: Outcome) -> Self {
        Self { host, outcome }
    }

    pub const fn tcp_reachable(&self) -> bool {
        matches!(
            self.outcome,
            Outcome::HandshakeFailed(_) | Outcome::Negotiated(_)
        )
    }

    pub const fn tls_negotiated(&self) -> bool {
        matches!(self.outcome, Outcome::Negotiated(_))
    }

    pub const fn handshake(&self) -> Option<&Handshake> {
        match &self.outcome {
            Outcome::Negotiated(handshake) => Some(handshake),
            _ => None,
        }
    }

    pub fn feasible(&self) -> bool {
        self.handshake().is_some_and(|h| h.feasible)
    }
}
