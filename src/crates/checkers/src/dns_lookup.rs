//! DNS probe: sends a recursive A query to a configured resolver and expects
//! at least one answer record.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::net::UdpSocket;

use crate::retry::with_retries;
use crate::{CheckError, Checker, Result};

const KIND: &str = "dns_lookup";

const FLAG_QR: u8 = 0x80;
const FLAG_RD: u8 = 0x01;
const RCODE_NOERROR: u8 = 0;
const RCODE_NXDOMAIN: u8 = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct Spec {
    pub query: String,
    pub resolver: String,
    pub tries: u8,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

pub struct DnsLookup {
    query: String,
    resolver: SocketAddr,
    tries: u8,
    interval: Duration,
    timeout: Duration,
}

impl DnsLookup {
    pub fn new(spec: Spec) -> Result<Self> {
        if spec.tries == 0 {
            return Err(CheckError::InvalidSpec("tries must be at least 1".into()));
        }
        let resolver: SocketAddr = spec
            .resolver
            .parse()
            .map_err(|err| CheckError::InvalidSpec(format!("invalid resolver address: {err}")))?;

        // Fail at construction time on names the codec cannot encode.
        build_query(0, &spec.query)?;

        Ok(Self {
            query: spec.query,
            resolver,
            tries: spec.tries,
            interval: spec.interval,
            timeout: spec.timeout,
        })
    }

    async fn probe(&self) -> Result<()> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(self.resolver).await?;

        let id: u16 = rand::random();
        let packet = build_query(id, &self.query)?;
        socket.send(&packet).await?;

        let mut buf = [0u8; 512];
        let n = tokio::time::timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| CheckError::Timeout(self.timeout))??;

        let answers = parse_response(id, &buf[..n])?;
        if answers == 0 {
            return Err(CheckError::Unhealthy(format!(
                "no records in answer for `{}`",
                self.query
            )));
        }
        Ok(())
    }
}

/// Registry constructor.
pub fn from_spec(spec: serde_json::Value) -> Result<Box<dyn Checker>> {
    let spec: Spec =
        serde_json::from_value(spec).map_err(|err| CheckError::InvalidSpec(err.to_string()))?;
    Ok(Box::new(DnsLookup::new(spec)?))
}

#[async_trait]
impl Checker for DnsLookup {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn check(&self) -> Result<()> {
        with_retries(KIND, self.tries, self.interval, || self.probe()).await
    }
}

/// Encodes a single recursive IN A question.
fn build_query(id: u16, name: &str) -> Result<Vec<u8>> {
    let mut packet = Vec::with_capacity(17 + name.len());
    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&[FLAG_RD, 0x00]); // RD set, no other flags
    packet.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    packet.extend_from_slice(&[0u8; 6]); // AN/NS/AR counts

    for label in name.trim_end_matches('.').split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(CheckError::InvalidSpec(format!(
                "invalid dns label in `{name}`"
            )));
        }
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);

    packet.extend_from_slice(&1u16.to_be_bytes()); // QTYPE A
    packet.extend_from_slice(&1u16.to_be_bytes()); // QCLASS IN
    Ok(packet)
}

/// Validates the response header and returns the answer count.
fn parse_response(id: u16, packet: &[u8]) -> Result<u16> {
    if packet.len() < 12 {
        return Err(CheckError::Unhealthy("short dns response".into()));
    }
    if u16::from_be_bytes([packet[0], packet[1]]) != id {
        return Err(CheckError::Unhealthy("response id mismatch".into()));
    }
    if packet[2] & FLAG_QR == 0 {
        return Err(CheckError::Unhealthy("response is not an answer".into()));
    }

    match packet[3] & 0x0F {
        RCODE_NOERROR => Ok(u16::from_be_bytes([packet[6], packet[7]])),
        RCODE_NXDOMAIN => Err(CheckError::Unhealthy("NXDOMAIN".into())),
        rcode => Err(CheckError::Unhealthy(format!(
            "resolver returned rcode {rcode}"
        ))),
    }
}
