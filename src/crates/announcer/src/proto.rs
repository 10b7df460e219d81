//! Hand-written subset of the GoBGP gRPC API (`apipb`) message definitions.
//!
//! Only the messages and fields the daemon actually exchanges are modeled;
//! unknown fields on the wire are skipped by prost.

/// Type URLs for the `google.protobuf.Any`-encoded NLRI and path attributes.
pub mod type_url {
    pub const IP_ADDRESS_PREFIX: &str = "type.googleapis.com/apipb.IPAddressPrefix";
    pub const ORIGIN_ATTRIBUTE: &str = "type.googleapis.com/apipb.OriginAttribute";
    pub const NEXT_HOP_ATTRIBUTE: &str = "type.googleapis.com/apipb.NextHopAttribute";
}

/// Packs a message into an `Any` under the given type URL.
pub fn to_any<M: prost::Message>(type_url: &str, message: &M) -> prost_types::Any {
    prost_types::Any {
        type_url: type_url.to_string(),
        value: message.encode_to_vec(),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum Afi {
    Unknown = 0,
    Ip = 1,
    Ip6 = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum Safi {
    Unknown = 0,
    Unicast = 1,
    Multicast = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum TableType {
    Global = 0,
    Local = 1,
    AdjIn = 2,
    AdjOut = 3,
    Vrf = 4,
}

/// BGP FSM state as reported in `PeerState`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum SessionState {
    Unknown = 0,
    Idle = 1,
    Connect = 2,
    Active = 3,
    Opensent = 4,
    Openconfirm = 5,
    Established = 6,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum AdminState {
    Up = 0,
    Down = 1,
    PfxCt = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Family {
    #[prost(enumeration = "Afi", tag = "1")]
    pub afi: i32,
    #[prost(enumeration = "Safi", tag = "2")]
    pub safi: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IpAddressPrefix {
    #[prost(uint32, tag = "1")]
    pub prefix_len: u32,
    #[prost(string, tag = "2")]
    pub prefix: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OriginAttribute {
    #[prost(uint32, tag = "1")]
    pub origin: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NextHopAttribute {
    #[prost(string, tag = "1")]
    pub next_hop: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Path {
    #[prost(message, optional, tag = "1")]
    pub nlri: Option<prost_types::Any>,
    #[prost(message, repeated, tag = "2")]
    pub pattrs: Vec<prost_types::Any>,
    #[prost(bool, tag = "5")]
    pub is_withdraw: bool,
    #[prost(message, optional, tag = "9")]
    pub family: Option<Family>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddPathRequest {
    #[prost(enumeration = "TableType", tag = "1")]
    pub table_type: i32,
    #[prost(string, tag = "2")]
    pub vrf_id: String,
    #[prost(message, optional, tag = "3")]
    pub path: Option<Path>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddPathResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub uuid: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeletePathRequest {
    #[prost(enumeration = "TableType", tag = "1")]
    pub table_type: i32,
    #[prost(string, tag = "2")]
    pub vrf_id: String,
    #[prost(message, optional, tag = "3")]
    pub family: Option<Family>,
    #[prost(message, optional, tag = "4")]
    pub path: Option<Path>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Global {
    #[prost(uint32, tag = "1")]
    pub asn: u32,
    #[prost(string, tag = "2")]
    pub router_id: String,
    #[prost(int32, tag = "3")]
    pub listen_port: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartBgpRequest {
    #[prost(message, optional, tag = "1")]
    pub global: Option<Global>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StopBgpRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Empty {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PeerConf {
    #[prost(string, tag = "1")]
    pub neighbor_address: String,
    #[prost(uint32, tag = "2")]
    pub peer_asn: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EbgpMultihop {
    #[prost(bool, tag = "1")]
    pub enabled: bool,
    #[prost(uint32, tag = "2")]
    pub multihop_ttl: u32,
}

/// Per-direction BGP message counters.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    #[prost(uint64, tag = "1")]
    pub notification: u64,
    #[prost(uint64, tag = "2")]
    pub update: u64,
    #[prost(uint64, tag = "3")]
    pub open: u64,
    #[prost(uint64, tag = "4")]
    pub keepalive: u64,
    #[prost(uint64, tag = "5")]
    pub refresh: u64,
    #[prost(uint64, tag = "6")]
    pub discarded: u64,
    #[prost(uint64, tag = "7")]
    pub total: u64,
    #[prost(uint64, tag = "8")]
    pub withdraw_update: u64,
    #[prost(uint64, tag = "9")]
    pub withdraw_prefix: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Messages {
    #[prost(message, optional, tag = "1")]
    pub received: Option<Message>,
    #[prost(message, optional, tag = "2")]
    pub sent: Option<Message>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PeerState {
    #[prost(string, tag = "1")]
    pub neighbor_address: String,
    #[prost(uint32, tag = "2")]
    pub peer_asn: u32,
    #[prost(enumeration = "SessionState", tag = "3")]
    pub session_state: i32,
    #[prost(enumeration = "AdminState", tag = "4")]
    pub admin_state: i32,
    #[prost(message, optional, tag = "5")]
    pub messages: Option<Messages>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Peer {
    #[prost(message, optional, tag = "1")]
    pub conf: Option<PeerConf>,
    #[prost(message, optional, tag = "2")]
    pub ebgp_multihop: Option<EbgpMultihop>,
    #[prost(message, optional, tag = "3")]
    pub state: Option<PeerState>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddPeerRequest {
    #[prost(message, optional, tag = "1")]
    pub peer: Option<Peer>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListPeerRequest {
    #[prost(string, tag = "1")]
    pub address: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListPeerResponse {
    #[prost(message, optional, tag = "1")]
    pub peer: Option<Peer>,
}
