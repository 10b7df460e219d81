//! Peer-session metrics collector.
//!
//! Polls the speaker's peer list on an interval and exports session state and
//! message counters per peer in the `anycastd_gobgp` namespace.

use std::sync::Arc;
use std::time::Duration;

use prometheus::{IntGaugeVec, Opts, Registry};
use tracing::warn;

use crate::proto;
use crate::speaker::BgpApi;

pub struct PeerMetrics {
    speaker: Arc<dyn BgpApi>,
    router_id: String,
    interval: Duration,

    peer_count: IntGaugeVec,
    peer_admin_state: IntGaugeVec,
    peer_session_state: IntGaugeVec,
    peer_messages: IntGaugeVec,
}

impl PeerMetrics {
    pub fn new(
        speaker: Arc<dyn BgpApi>,
        router_id: impl Into<String>,
        interval: Duration,
        registry: &Registry,
    ) -> Result<Self, prometheus::Error> {
        let opts = |name: &str, help: &str| {
            Opts::new(name, help).namespace("anycastd").subsystem("gobgp")
        };

        let peer_count = IntGaugeVec::new(
            opts(
                "peer_count",
                "Total amount of peers configured for the speaker",
            ),
            &["router_id"],
        )?;
        let peer_admin_state = IntGaugeVec::new(
            opts("peer_admin_state", "Peer state 0=up, 1=down, 2=pfx_ct"),
            &["router_id", "peer"],
        )?;
        let peer_session_state = IntGaugeVec::new(
            opts(
                "peer_session_state",
                "Peer session state 0=unknown, 1=idle, 2=connect, 3=active, 4=opensent, 5=openconfirm, 6=established",
            ),
            &["router_id", "peer"],
        )?;
        let peer_messages = IntGaugeVec::new(
            opts(
                "peer_messages",
                "Number of BGP messages exchanged with the peer, by direction and type",
            ),
            &["router_id", "peer", "direction", "type"],
        )?;

        registry.register(Box::new(peer_count.clone()))?;
        registry.register(Box::new(peer_admin_state.clone()))?;
        registry.register(Box::new(peer_session_state.clone()))?;
        registry.register(Box::new(peer_messages.clone()))?;

        Ok(Self {
            speaker,
            router_id: router_id.into(),
            interval,
            peer_count,
            peer_admin_state,
            peer_session_state,
            peer_messages,
        })
    }

    /// Polls forever; scrape failures are logged and retried on the next
    /// interval. Callers cancel by dropping the future.
    pub async fn run(&self) {
        loop {
            if let Err(err) = self.scrape().await {
                warn!(error = %err, "peer metrics scrape failed");
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    async fn scrape(&self) -> crate::Result<()> {
        let peers = self.speaker.list_peers().await?;

        self.peer_count
            .with_label_values(&[&self.router_id])
            .set(peers.len() as i64);

        for peer in &peers {
            let Some(state) = &peer.state else { continue };
            let name = &state.neighbor_address;

            self.peer_admin_state
                .with_label_values(&[&self.router_id, name])
                .set(i64::from(state.admin_state));
            self.peer_session_state
                .with_label_values(&[&self.router_id, name])
                .set(i64::from(state.session_state));

            if let Some(messages) = &state.messages {
                for (direction, counters) in [
                    ("received", &messages.received),
                    ("sent", &messages.sent),
                ] {
                    let Some(counters) = counters else { continue };
                    for (kind, value) in message_counters(counters) {
                        self.peer_messages
                            .with_label_values(&[&self.router_id, name, direction, kind])
                            .set(value as i64);
                    }
                }
            }
        }

        Ok(())
    }
}

fn message_counters(message: &proto::Message) -> [(&'static str, u64); 9] {
    [
        ("notification", message.notification),
        ("update", message.update),
        ("open", message.open),
        ("keepalive", message.keepalive),
        ("refresh", message.refresh),
        ("discarded", message.discarded),
        ("total", message.total),
        ("withdraw_update", message.withdraw_update),
        ("withdraw_prefix", message.withdraw_prefix),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::MockSpeaker;

    fn peer(address: &str, session_state: proto::SessionState) -> proto::Peer {
        proto::Peer {
            conf: Some(proto::PeerConf {
                neighbor_address: address.to_string(),
                peer_asn: 65001,
            }),
            ebgp_multihop: None,
            state: Some(proto::PeerState {
                neighbor_address: address.to_string(),
                peer_asn: 65001,
                session_state: session_state as i32,
                admin_state: proto::AdminState::Up as i32,
                messages: Some(proto::Messages {
                    received: Some(proto::Message {
                        total: 42,
                        ..Default::default()
                    }),
                    sent: Some(proto::Message {
                        total: 7,
                        ..Default::default()
                    }),
                }),
            }),
        }
    }

    #[tokio::test]
    async fn scrape_exports_peer_state() {
        let mut speaker = MockSpeaker::new();
        speaker.expect_list_peers().returning(|| {
            Ok(vec![
                peer("192.0.2.10", proto::SessionState::Established),
                peer("192.0.2.11", proto::SessionState::Active),
            ])
        });

        let registry = Registry::new();
        let metrics = PeerMetrics::new(
            Arc::new(speaker),
            "10.0.0.1",
            Duration::from_secs(30),
            &registry,
        )
        .unwrap();

        metrics.scrape().await.unwrap();

        assert_eq!(
            metrics.peer_count.with_label_values(&["10.0.0.1"]).get(),
            2
        );
        assert_eq!(
            metrics
                .peer_session_state
                .with_label_values(&["10.0.0.1", "192.0.2.10"])
                .get(),
            proto::SessionState::Established as i64
        );
        assert_eq!(
            metrics
                .peer_messages
                .with_label_values(&["10.0.0.1", "192.0.2.10", "received", "total"])
                .get(),
            42
        );
    }

    #[tokio::test]
    async fn scrape_propagates_speaker_errors() {
        let mut speaker = MockSpeaker::new();
        speaker
            .expect_list_peers()
            .returning(|| Err(crate::AnnounceError::Transport("down".into())));

        let registry = Registry::new();
        let metrics = PeerMetrics::new(
            Arc::new(speaker),
            "10.0.0.1",
            Duration::from_secs(30),
            &registry,
        )
        .unwrap();

        assert!(metrics.scrape().await.is_err());
    }
}
