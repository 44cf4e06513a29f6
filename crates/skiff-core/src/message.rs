//! Wire vocabulary: commands sent to the location, replies, and
//! unsolicited push events.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::*;

/// A command sent from the client to the location.
///
/// Some commands expect a [`Reply`]; the rest are fire-and-forget. The
/// split is a property of the call site (`Transport::request` versus
/// `Transport::send`), not of the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    CreateVolume {
        owner: OwnerId,
        tag: Option<String>,
        #[serde(rename = "async")]
        async_writes: bool,
    },
    DestroyVolume {
        owner: OwnerId,
        volume: String,
    },
    SnapshotVolume {
        volume: String,
    },
    RollbackVolume {
        volume: String,
    },
    FindTag {
        tag: String,
    },
    Heartbeat,
    CreateTunnel {
        tunnel: Uuid,
        container: ContainerRef,
        port: u16,
    },
    DestroyTunnel {
        tunnel: Uuid,
    },
    ToProxy {
        tunnel: Uuid,
        proxy: u64,
        data: Vec<u8>,
    },
    CloseProxy {
        tunnel: Uuid,
        proxy: u64,
    },
    PublishWeb {
        domain: String,
        fqdn: String,
        cluster: Uuid,
        containers: Vec<ContainerRef>,
        rewrite: Option<String>,
        ssl: Option<SslMaterial>,
    },
    UnpublishWeb {
        domain: String,
        cluster: Uuid,
    },
}

impl Command {
    /// Wire name of the command, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateVolume { .. } => "create_volume",
            Command::DestroyVolume { .. } => "destroy_volume",
            Command::SnapshotVolume { .. } => "snapshot_volume",
            Command::RollbackVolume { .. } => "rollback_volume",
            Command::FindTag { .. } => "find_tag",
            Command::Heartbeat => "heartbeat",
            Command::CreateTunnel { .. } => "create_tunnel",
            Command::DestroyTunnel { .. } => "destroy_tunnel",
            Command::ToProxy { .. } => "to_proxy",
            Command::CloseProxy { .. } => "close_proxy",
            Command::PublishWeb { .. } => "publish_web",
            Command::UnpublishWeb { .. } => "unpublish_web",
        }
    }
}

/// A successful reply to a blocking command.
///
/// Rejections travel separately and surface as [`Error::Remote`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Ack,
    VolumeCreated {
        uuid: String,
    },
    TagFound {
        uuid: String,
        node: NodeId,
        address: IpAddr,
    },
}

impl Reply {
    pub fn into_ack(self) -> Result<()> {
        match self {
            Reply::Ack => Ok(()),
            other => Err(unexpected("ack", &other)),
        }
    }

    /// Extract the server-assigned uuid from a `create_volume` reply.
    pub fn into_volume_uuid(self) -> Result<String> {
        match self {
            Reply::VolumeCreated { uuid } => Ok(uuid),
            other => Err(unexpected("volume_created", &other)),
        }
    }

    /// Extract the container located by a `find_tag` reply.
    pub fn into_tag_found(self) -> Result<(ContainerRef, IpAddr)> {
        match self {
            Reply::TagFound {
                uuid,
                node,
                address,
            } => Ok((ContainerRef { uuid, node }, address)),
            other => Err(unexpected("tag_found", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &Reply) -> Error {
    Error::Remote(format!("expected {wanted} reply, got {got:?}"))
}

/// An unsolicited event pushed by the location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PushEvent {
    /// Full replacement of the session's view of nodes, volumes and domains.
    ResourceOffer {
        #[serde(default)]
        domains: Vec<OfferedDomain>,
        #[serde(default)]
        nodes: Vec<OfferedNode>,
        #[serde(default)]
        volumes: Vec<OfferedVolume>,
    },
    UpdateStats {
        node: NodeId,
        stats: Stats,
    },
    FromProxy {
        tunnel: Uuid,
        proxy: u64,
        data: Vec<u8>,
    },
    CloseProxy {
        tunnel: Uuid,
        proxy: u64,
    },
    Log {
        error: bool,
        log: String,
    },
}
