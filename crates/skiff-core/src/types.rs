//! Domain types carried on the wire between the client and a location.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Opaque identifier the location assigns to a node.
pub type NodeId = String;

/// Identity of the account that owns volumes and containers.
pub type OwnerId = String;

/// Per-node resource scores, keyed by stat name (`cpu`, `memory`, ...).
///
/// The `cpu` score is already corrected for processor performance by the
/// location, so scores from different hardware compare directly.
pub type Stats = HashMap<String, f64>;

/// Which stat drives node ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankBias {
    Cpu,
    #[default]
    Memory,
}

impl RankBias {
    /// Stat key this bias ranks on.
    pub fn stat_key(self) -> &'static str {
        match self {
            RankBias::Cpu => "cpu",
            RankBias::Memory => "memory",
        }
    }
}

impl fmt::Display for RankBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stat_key())
    }
}

impl FromStr for RankBias {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(RankBias::Cpu),
            "memory" | "mem" => Ok(RankBias::Memory),
            other => Err(format!("unknown rank bias '{other}' (expected cpu or memory)")),
        }
    }
}

/// A remote container as the location identifies it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerRef {
    pub uuid: String,
    pub node: NodeId,
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.uuid, self.node)
    }
}

/// A node entry in a resource offer: `(id, stats)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferedNode(pub NodeId, pub Stats);

/// A volume entry in a resource offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferedVolume {
    pub uuid: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(rename = "async", default = "default_async")]
    pub async_writes: bool,
}

fn default_async() -> bool {
    true
}

/// A routable domain in a resource offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferedDomain {
    pub domain: String,
}

/// PEM-encoded certificate chain and private key for a published domain.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslMaterial {
    pub cert_pem: String,
    pub key_pem: String,
}

impl fmt::Debug for SslMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SslMaterial")
            .field("cert_pem", &format_args!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}
