//! ICMP echo probe using an unprivileged datagram ICMP socket.
//!
//! Sends `tries` echo requests and derives RTT and loss statistics; the
//! target is healthy when at least one reply arrives. Socket I/O is blocking
//! and runs on the blocking thread pool, bounded by the configured timeout.

use std::io::Read;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use prometheus::{CounterVec, GaugeVec, Opts};
use serde::Deserialize;
use socket2::{Domain, Protocol, Socket, Type};

use crate::{CheckError, Checker, Result};

const KIND: &str = "icmp_ping";

const ECHO_REQUEST: u8 = 8;
const ECHO_REPLY: u8 = 0;
const PAYLOAD: &[u8] = b"anycastd-probe";

static RTT_SECONDS: Lazy<GaugeVec> = Lazy::new(|| {
    let gauge = GaugeVec::new(
        Opts::new("anycastd_check_rtt_seconds", "RTT of ICMP checks"),
        &["check", "host", "stat"],
    )
    .expect("valid metric definition");
    let _ = prometheus::register(Box::new(gauge.clone()));
    gauge
});

static LOSS_PERCENT: Lazy<GaugeVec> = Lazy::new(|| {
    let gauge = GaugeVec::new(
        Opts::new("anycastd_check_loss_percent", "Percent of packet loss"),
        &["check", "host"],
    )
    .expect("valid metric definition");
    let _ = prometheus::register(Box::new(gauge.clone()));
    gauge
});

static PACKETS: Lazy<CounterVec> = Lazy::new(|| {
    let counter = CounterVec::new(
        Opts::new(
            "anycastd_check_packets_total",
            "Total amount of ICMP packets sent and received",
        ),
        &["check", "host", "direction"],
    )
    .expect("valid metric definition");
    let _ = prometheus::register(Box::new(counter.clone()));
    counter
});

#[derive(Debug, Clone, Deserialize)]
pub struct Spec {
    pub host: String,
    pub tries: u8,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

pub struct IcmpPing {
    host: String,
    tries: u8,
    interval: Duration,
    timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PingStats {
    sent: u32,
    received: u32,
    loss_percent: f64,
    min_rtt: Duration,
    max_rtt: Duration,
    avg_rtt: Duration,
    stddev_rtt: Duration,
}

impl IcmpPing {
    pub fn new(spec: Spec) -> Result<Self> {
        if spec.tries == 0 {
            return Err(CheckError::InvalidSpec("tries must be at least 1".into()));
        }
        if spec.timeout.is_zero() {
            return Err(CheckError::InvalidSpec("timeout must be non-zero".into()));
        }
        Ok(Self {
            host: spec.host,
            tries: spec.tries,
            interval: spec.interval,
            timeout: spec.timeout,
        })
    }
}

/// Registry constructor.
pub fn from_spec(spec: serde_json::Value) -> Result<Box<dyn Checker>> {
    let spec: Spec =
        serde_json::from_value(spec).map_err(|err| CheckError::InvalidSpec(err.to_string()))?;
    Ok(Box::new(IcmpPing::new(spec)?))
}

#[async_trait]
impl Checker for IcmpPing {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn check(&self) -> Result<()> {
        let (host, tries, interval, timeout) =
            (self.host.clone(), self.tries, self.interval, self.timeout);

        let stats = tokio::task::spawn_blocking(move || run_ping(&host, tries, interval, timeout))
            .await
            .map_err(|err| CheckError::Unhealthy(format!("ping task failed: {err}")))??;

        PACKETS
            .with_label_values(&[KIND, &self.host, "sent"])
            .inc_by(stats.sent as f64);
        PACKETS
            .with_label_values(&[KIND, &self.host, "received"])
            .inc_by(stats.received as f64);
        LOSS_PERCENT
            .with_label_values(&[KIND, &self.host])
            .set(stats.loss_percent);
        for (stat, value) in [
            ("min", stats.min_rtt),
            ("max", stats.max_rtt),
            ("avg", stats.avg_rtt),
            ("stddev", stats.stddev_rtt),
        ] {
            RTT_SECONDS
                .with_label_values(&[KIND, &self.host, stat])
                .set(value.as_secs_f64());
        }

        if stats.received == 0 {
            return Err(CheckError::Unhealthy(format!(
                "no echo replies received from {}",
                self.host
            )));
        }
        Ok(())
    }
}

fn run_ping(host: &str, tries: u8, interval: Duration, timeout: Duration) -> Result<PingStats> {
    let target = resolve_v4(host)?;
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4))?;
    socket.connect(&target.into())?;

    let mut rtts = Vec::with_capacity(tries as usize);
    for seq in 0..tries as u16 {
        let packet = build_echo_request(seq, PAYLOAD);
        let sent_at = Instant::now();
        socket.send(&packet)?;

        if let Some(rtt) = await_reply(&socket, seq, sent_at, timeout)? {
            rtts.push(rtt);
        }

        if seq + 1 < tries as u16 {
            std::thread::sleep(interval);
        }
    }

    Ok(compute_stats(tries as u32, &rtts))
}

/// Reads until the reply for `seq` arrives or the timeout elapses.
fn await_reply(
    socket: &Socket,
    seq: u16,
    sent_at: Instant,
    timeout: Duration,
) -> Result<Option<Duration>> {
    let deadline = sent_at + timeout;
    let mut buf = [0u8; 1500];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        socket.set_read_timeout(Some(remaining))?;

        let n = match (&*socket).read(&mut buf) {
            Ok(n) => n,
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Ok(None)
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(reply_seq) = parse_echo_reply(&buf[..n]) {
            if reply_seq == seq {
                return Ok(Some(sent_at.elapsed()));
            }
        }
    }
}

fn resolve_v4(host: &str) -> Result<SocketAddr> {
    (host, 0)
        .to_socket_addrs()
        .map_err(|err| CheckError::Unhealthy(format!("resolving {host}: {err}")))?
        .find(|addr| matches!(addr.ip(), IpAddr::V4(_)))
        .ok_or_else(|| CheckError::Unhealthy(format!("no IPv4 address for {host}")))
}

/// Echo request with a zero identifier; datagram ICMP sockets have the
/// kernel rewrite the identifier, so replies are matched by sequence only.
fn build_echo_request(seq: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![ECHO_REQUEST, 0, 0, 0, 0, 0];
    packet.extend_from_slice(&seq.to_be_bytes());
    packet.extend_from_slice(payload);

    let checksum = internet_checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    packet
}

fn parse_echo_reply(packet: &[u8]) -> Option<u16> {
    if packet.len() < 8 || packet[0] != ECHO_REPLY || packet[1] != 0 {
        return None;
    }
    Some(u16::from_be_bytes([packet[6], packet[7]]))
}

fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum = 0u32;
    for chunk in data.chunks(2) {
        let word = match chunk {
            [high, low] => u16::from_be_bytes([*high, *low]),
            [high] => u16::from_be_bytes([*high, 0]),
            _ => 0,
        };
        sum = sum.wrapping_add(word as u32);
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

fn compute_stats(sent: u32, rtts: &[Duration]) -> PingStats {
    let received = rtts.len() as u32;
    let loss_percent = if sent == 0 {
        0.0
    } else {
        (sent - received) as f64 / sent as f64 * 100.0
    };

    if rtts.is_empty() {
        return PingStats {
            sent,
            received,
            loss_percent,
            min_rtt: Duration::ZERO,
            max_rtt: Duration::ZERO,
            avg_rtt: Duration::ZERO,
            stddev_rtt: Duration::ZERO,
        };
    }

    let min_rtt = rtts.iter().min().copied().unwrap_or_default();
    let max_rtt = rtts.iter().max().copied().unwrap_or_default();
    let avg_secs = rtts.iter().map(Duration::as_secs_f64).sum::<f64>() / received as f64;
    let variance = rtts
        .iter()
        .map(|rtt| (rtt.as_secs_f64() - avg_secs).powi(2))
        .sum::<f64>()
        / received as f64;

    PingStats {
        sent,
        received,
        loss_percent,
        min_rtt,
        max_rtt,
        avg_rtt: Duration::from_secs_f64(avg_secs),
        stddev_rtt: Duration::from_secs_f64(variance.sqrt()),
    }
}
