//! gRPC client for an external gobgpd instance.
//!
//! The daemon does not implement BGP; it drives a speaker through the small
//! [`BgpApi`] surface below. The client is built directly on
//! [`tonic::client::Grpc`] with the hand-written messages from
//! [`crate::proto`].

use async_trait::async_trait;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;

use crate::proto;
use crate::{AnnounceError, Result};

const ADD_PATH: &str = "/apipb.GobgpApi/AddPath";
const DELETE_PATH: &str = "/apipb.GobgpApi/DeletePath";
const START_BGP: &str = "/apipb.GobgpApi/StartBgp";
const STOP_BGP: &str = "/apipb.GobgpApi/StopBgp";
const ADD_PEER: &str = "/apipb.GobgpApi/AddPeer";
const LIST_PEER: &str = "/apipb.GobgpApi/ListPeer";

/// Operations the daemon needs from a BGP speaker.
#[async_trait]
pub trait BgpApi: Send + Sync {
    async fn start_bgp(&self, request: proto::StartBgpRequest) -> Result<()>;
    async fn stop_bgp(&self) -> Result<()>;
    async fn add_peer(&self, request: proto::AddPeerRequest) -> Result<()>;
    async fn add_path(&self, request: proto::AddPathRequest) -> Result<proto::AddPathResponse>;
    async fn delete_path(&self, request: proto::DeletePathRequest) -> Result<()>;
    async fn list_peers(&self) -> Result<Vec<proto::Peer>>;
}

/// gobgpd client over a lazily established channel.
#[derive(Clone)]
pub struct GobgpClient {
    channel: Channel,
}

impl GobgpClient {
    /// Creates a client for the given endpoint, e.g.
    /// `http://127.0.0.1:50051`. The connection is established on first use.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let channel = Endpoint::from_shared(endpoint.into())
            .map_err(|err| AnnounceError::Endpoint(err.to_string()))?
            .connect_lazy();
        Ok(Self { channel })
    }

    async fn ready(&self) -> Result<Grpc<Channel>> {
        let mut grpc = Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|err| AnnounceError::Transport(err.to_string()))?;
        Ok(grpc)
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp>
    where
        Req: prost::Message + 'static,
        Resp: prost::Message + Default + 'static,
    {
        let mut grpc = self.ready().await?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc
            .unary(
                Request::new(request),
                PathAndQuery::from_static(path),
                codec,
            )
            .await?;
        Ok(response.into_inner())
    }
}

#[async_trait]
impl BgpApi for GobgpClient {
    async fn start_bgp(&self, request: proto::StartBgpRequest) -> Result<()> {
        self.unary::<_, proto::Empty>(START_BGP, request).await?;
        Ok(())
    }

    async fn stop_bgp(&self) -> Result<()> {
        self.unary::<_, proto::Empty>(STOP_BGP, proto::StopBgpRequest {})
            .await?;
        Ok(())
    }

    async fn add_peer(&self, request: proto::AddPeerRequest) -> Result<()> {
        self.unary::<_, proto::Empty>(ADD_PEER, request).await?;
        Ok(())
    }

    async fn add_path(&self, request: proto::AddPathRequest) -> Result<proto::AddPathResponse> {
        self.unary(ADD_PATH, request).await
    }

    async fn delete_path(&self, request: proto::DeletePathRequest) -> Result<()> {
        self.unary::<_, proto::Empty>(DELETE_PATH, request).await?;
        Ok(())
    }

    async fn list_peers(&self) -> Result<Vec<proto::Peer>> {
        let mut grpc = self.ready().await?;
        let codec: ProstCodec<proto::ListPeerRequest, proto::ListPeerResponse> =
            ProstCodec::default();
        let response = grpc
            .server_streaming(
                Request::new(proto::ListPeerRequest::default()),
                PathAndQuery::from_static(LIST_PEER),
                codec,
            )
            .await?;

        let mut stream = response.into_inner();
        let mut peers = Vec::new();
        while let Some(item) = stream.message().await? {
            if let Some(peer) = item.peer {
                peers.push(peer);
            }
        }
        Ok(peers)
    }
}
