//! BGP announcement control for anycastd
//!
//! The [`Announcer`] injects or withdraws the node's anycast prefixes on the
//! speaker. Both operations are idempotent at the speaker level (adding an
//! existing path is deduplicated, deleting a missing one is benign on the
//! next tick), which lets callers retry edges by simply reissuing them.

pub mod metrics;
pub mod proto;
pub mod speaker;

pub use speaker::{BgpApi, GobgpClient};

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use thiserror::Error;
use tracing::debug;

/// Result type alias for announcer operations.
pub type Result<T> = std::result::Result<T, AnnounceError>;

#[derive(Debug, Error)]
pub enum AnnounceError {
    #[error("invalid speaker endpoint: {0}")]
    Endpoint(String),

    #[error("speaker transport: {0}")]
    Transport(String),

    #[error("speaker rejected the call: {0}")]
    Status(#[from] tonic::Status),
}

/// Advertises or withdraws the configured prefix set as a unit.
#[async_trait]
pub trait Announcer: Send + Sync {
    async fn announce(&self) -> Result<()>;
    async fn denounce(&self) -> Result<()>;
}

/// Static announcement configuration, derived from the config file once at
/// startup.
pub struct Config {
    pub speaker: Arc<dyn BgpApi>,
    pub prefixes: Vec<Ipv4Net>,
    pub next_hop: Ipv4Addr,
}

pub struct BgpAnnouncer {
    speaker: Arc<dyn BgpApi>,
    prefixes: Vec<Ipv4Net>,
    next_hop: Ipv4Addr,
}

impl BgpAnnouncer {
    pub fn new(config: Config) -> Self {
        Self {
            speaker: config.speaker,
            prefixes: config.prefixes,
            next_hop: config.next_hop,
        }
    }

    /// The same configuration always yields the same paths in the same
    /// order, so every path added is later removable.
    fn path_list(&self) -> Vec<proto::Path> {
        self.prefixes
            .iter()
            .map(|prefix| build_path(prefix, self.next_hop))
            .collect()
    }
}

#[async_trait]
impl Announcer for BgpAnnouncer {
    async fn announce(&self) -> Result<()> {
        for path in self.path_list() {
            let nlri = path.nlri.clone();
            self.speaker
                .add_path(proto::AddPathRequest {
                    table_type: proto::TableType::Global as i32,
                    vrf_id: String::new(),
                    path: Some(path),
                })
                .await?;
            debug!(?nlri, "path announced");
        }
        Ok(())
    }

    async fn denounce(&self) -> Result<()> {
        for path in self.path_list() {
            let nlri = path.nlri.clone();
            let family = path.family.clone();
            self.speaker
                .delete_path(proto::DeletePathRequest {
                    table_type: proto::TableType::Global as i32,
                    vrf_id: String::new(),
                    family,
                    path: Some(path),
                })
                .await?;
            debug!(?nlri, "path withdrawn");
        }
        Ok(())
    }
}

fn build_path(prefix: &Ipv4Net, next_hop: Ipv4Addr) -> proto::Path {
    let nlri = proto::to_any(
        proto::type_url::IP_ADDRESS_PREFIX,
        &proto::IpAddressPrefix {
            prefix_len: u32::from(prefix.prefix_len()),
            prefix: prefix.addr().to_string(),
        },
    );

    let origin = proto::to_any(
        proto::type_url::ORIGIN_ATTRIBUTE,
        // IGP origin; AS_PATH prepending is the speaker's job.
        &proto::OriginAttribute { origin: 0 },
    );
    let next_hop = proto::to_any(
        proto::type_url::NEXT_HOP_ATTRIBUTE,
        &proto::NextHopAttribute {
            next_hop: next_hop.to_string(),
        },
    );

    proto::Path {
        nlri: Some(nlri),
        pattrs: vec![origin, next_hop],
        is_withdraw: false,
        family: Some(proto::Family {
            afi: proto::Afi::Ip as i32,
            safi: proto::Safi::Unicast as i32,
        }),
    }
}
