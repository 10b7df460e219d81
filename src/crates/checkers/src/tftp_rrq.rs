//! TFTP probe: issues a read request (RFC 1350, octet mode) and expects the
//! first DATA block, which is acknowledged before the transfer is abandoned.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::net::UdpSocket;

use crate::retry::with_retries;
use crate::{CheckError, Checker, Result};

const KIND: &str = "tftp_rrq";

const OPCODE_RRQ: u16 = 1;
const OPCODE_DATA: u16 = 3;
const OPCODE_ACK: u16 = 4;
const OPCODE_ERROR: u16 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct Spec {
    pub server: String,
    pub filename: String,
    pub tries: u8,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

pub struct TftpRrq {
    server: String,
    filename: String,
    tries: u8,
    interval: Duration,
    timeout: Duration,
}

impl TftpRrq {
    pub fn new(spec: Spec) -> Result<Self> {
        if spec.tries == 0 {
            return Err(CheckError::InvalidSpec("tries must be at least 1".into()));
        }
        if spec.filename.is_empty() {
            return Err(CheckError::InvalidSpec("filename must not be empty".into()));
        }

        let server = if spec.server.contains(':') {
            spec.server
        } else {
            format!("{}:69", spec.server)
        };

        Ok(Self {
            server,
            filename: spec.filename,
            tries: spec.tries,
            interval: spec.interval,
            timeout: spec.timeout,
        })
    }

    async fn probe(&self) -> Result<()> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket
            .send_to(&build_rrq(&self.filename), self.server.as_str())
            .await?;

        let mut buf = [0u8; 1024];
        // The data transfer continues from an ephemeral TID, not port 69.
        let (n, from) = tokio::time::timeout(self.timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| CheckError::Timeout(self.timeout))??;

        let block = parse_first_block(&buf[..n])?;
        socket.send_to(&build_ack(block), from).await?;
        Ok(())
    }
}

/// Registry constructor.
pub fn from_spec(spec: serde_json::Value) -> Result<Box<dyn Checker>> {
    let spec: Spec =
        serde_json::from_value(spec).map_err(|err| CheckError::InvalidSpec(err.to_string()))?;
    Ok(Box::new(TftpRrq::new(spec)?))
}

#[async_trait]
impl Checker for TftpRrq {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn check(&self) -> Result<()> {
        with_retries(KIND, self.tries, self.interval, || self.probe()).await
    }
}

fn build_rrq(filename: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(filename.len() + 9);
    packet.extend_from_slice(&OPCODE_RRQ.to_be_bytes());
    packet.extend_from_slice(filename.as_bytes());
    packet.push(0);
    packet.extend_from_slice(b"octet");
    packet.push(0);
    packet
}

fn build_ack(block: u16) -> [u8; 4] {
    let mut packet = [0u8; 4];
    packet[..2].copy_from_slice(&OPCODE_ACK.to_be_bytes());
    packet[2..].copy_from_slice(&block.to_be_bytes());
    packet
}

/// Expects DATA block 1; a server ERROR is surfaced with its message.
fn parse_first_block(packet: &[u8]) -> Result<u16> {
    if packet.len() < 4 {
        return Err(CheckError::Unhealthy("short tftp response".into()));
    }

    let opcode = u16::from_be_bytes([packet[0], packet[1]]);
    match opcode {
        OPCODE_DATA => {
            let block = u16::from_be_bytes([packet[2], packet[3]]);
            if block != 1 {
                return Err(CheckError::Unhealthy(format!(
                    "unexpected data block {block}"
                )));
            }
            Ok(block)
        }
        OPCODE_ERROR => {
            let code = u16::from_be_bytes([packet[2], packet[3]]);
            let message = std::str::from_utf8(&packet[4..])
                .unwrap_or_default()
                .trim_end_matches('\0')
                .to_string();
            Err(CheckError::Unhealthy(format!(
                "server error {code}: {message}"
            )))
        }
        other => Err(CheckError::Unhealthy(format!(
            "unexpected opcode {other}"
        ))),
    }
}
