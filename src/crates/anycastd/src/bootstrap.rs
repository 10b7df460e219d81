//! Speaker bootstrap: global BGP configuration and peer registration.

use announcer::proto;
use announcer::BgpApi;
use tracing::{debug, info};

use crate::config::AnnouncerConfig;

/// Starts the BGP instance and registers every configured peer.
pub async fn start_speaker(
    speaker: &dyn BgpApi,
    config: &AnnouncerConfig,
) -> announcer::Result<()> {
    debug!("starting BGP sessions");
    speaker
        .start_bgp(proto::StartBgpRequest {
            global: Some(proto::Global {
                asn: config.local_asn,
                router_id: config.router_id.to_string(),
                // The daemon originates; it does not accept inbound sessions.
                listen_port: -1,
            }),
        })
        .await?;

    for peer in &config.peers {
        info!(
            peer = %peer.name,
            address = %peer.remote_address,
            asn = peer.remote_asn,
            "adding peer"
        );
        speaker
            .add_peer(proto::AddPeerRequest {
                peer: Some(proto::Peer {
                    conf: Some(proto::PeerConf {
                        neighbor_address: peer.remote_address.to_string(),
                        peer_asn: peer.remote_asn,
                    }),
                    ebgp_multihop: peer.multihop.then_some(proto::EbgpMultihop {
                        enabled: true,
                        multihop_ttl: peer.multihop_ttl,
                    }),
                    state: None,
                }),
            })
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSpeaker {
        started: AtomicU32,
        peers: Mutex<Vec<proto::AddPeerRequest>>,
    }

    #[async_trait]
    impl BgpApi for RecordingSpeaker {
        async fn start_bgp(&self, request: proto::StartBgpRequest) -> announcer::Result<()> {
            assert_eq!(request.global.as_ref().map(|g| g.asn), Some(65000));
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop_bgp(&self) -> announcer::Result<()> {
            Ok(())
        }

        async fn add_peer(&self, request: proto::AddPeerRequest) -> announcer::Result<()> {
            self.peers.lock().unwrap().push(request);
            Ok(())
        }

        async fn add_path(
            &self,
            _: proto::AddPathRequest,
        ) -> announcer::Result<proto::AddPathResponse> {
            unreachable!("bootstrap must not announce")
        }

        async fn delete_path(&self, _: proto::DeletePathRequest) -> announcer::Result<()> {
            unreachable!("bootstrap must not withdraw")
        }

        async fn list_peers(&self) -> announcer::Result<Vec<proto::Peer>> {
            Ok(Vec::new())
        }
    }

    fn config() -> AnnouncerConfig {
        AnnouncerConfig {
            router_id: "10.0.0.1".parse().unwrap(),
            local_address: "10.0.0.1".parse().unwrap(),
            local_asn: 65000,
            routes: vec!["10.100.0.0/24".parse().unwrap()],
            gobgp_endpoint: "http://127.0.0.1:50051".to_string(),
            peers: vec![
                PeerConfig {
                    name: "rtr-1".to_string(),
                    remote_address: "10.0.0.254".parse().unwrap(),
                    remote_asn: 65001,
                    multihop: false,
                    multihop_ttl: 0,
                },
                PeerConfig {
                    name: "rtr-2".to_string(),
                    remote_address: "10.0.1.254".parse().unwrap(),
                    remote_asn: 65002,
                    multihop: true,
                    multihop_ttl: 2,
                },
            ],
        }
    }

    #[tokio::test]
    async fn starts_bgp_and_adds_peers() {
        let speaker = RecordingSpeaker::default();
        start_speaker(&speaker, &config()).await.unwrap();

        assert_eq!(speaker.started.load(Ordering::SeqCst), 1);

        let peers = speaker.peers.lock().unwrap();
        assert_eq!(peers.len(), 2);

        let first = peers[0].peer.as_ref().unwrap();
        assert_eq!(
            first.conf.as_ref().unwrap().neighbor_address,
            "10.0.0.254"
        );
        assert!(first.ebgp_multihop.is_none());

        let second = peers[1].peer.as_ref().unwrap();
        let multihop = second.ebgp_multihop.as_ref().unwrap();
        assert!(multihop.enabled);
        assert_eq!(multihop.multihop_ttl, 2);
    }
}
