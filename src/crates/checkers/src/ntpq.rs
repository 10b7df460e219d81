//! NTP probe: issues an SNTPv4 query and verifies the local clock offset
//! stays within a configured threshold.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use prometheus::{CounterVec, GaugeVec, Opts};
use serde::Deserialize;
use tokio::net::UdpSocket;

use crate::retry::with_retries;
use crate::{CheckError, Checker, Result};

const KIND: &str = "ntpq";

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET: f64 = 2_208_988_800.0;

const MODE_CLIENT: u8 = 3;
const MODE_SERVER: u8 = 4;
const VERSION: u8 = 4;

static NTP_OFFSET_MS: Lazy<GaugeVec> = Lazy::new(|| {
    let gauge = GaugeVec::new(
        Opts::new(
            "anycastd_check_last_ntp_offset_ms",
            "The estimated offset of the local system clock relative to the server's clock",
        ),
        &["check", "host"],
    )
    .expect("valid metric definition");
    let _ = prometheus::register(Box::new(gauge.clone()));
    gauge
});

static NTP_RTT_MS: Lazy<GaugeVec> = Lazy::new(|| {
    let gauge = GaugeVec::new(
        Opts::new(
            "anycastd_check_last_ntp_rtt_ms",
            "An estimate of the round-trip-time delay between the client and the server",
        ),
        &["check", "host"],
    )
    .expect("valid metric definition");
    let _ = prometheus::register(Box::new(gauge.clone()));
    gauge
});

static NTP_PACKETS_SENT: Lazy<CounterVec> = Lazy::new(|| {
    let counter = CounterVec::new(
        Opts::new(
            "anycastd_check_ntp_packets_sent_total",
            "Total amount of ntp packets sent",
        ),
        &["check", "host"],
    )
    .expect("valid metric definition");
    let _ = prometheus::register(Box::new(counter.clone()));
    counter
});

#[derive(Debug, Clone, Deserialize)]
pub struct Spec {
    pub server: String,
    #[serde(with = "humantime_serde")]
    pub offset_threshold: Duration,
    pub tries: u8,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

pub struct Ntpq {
    server: String,
    offset_threshold: Duration,
    tries: u8,
    interval: Duration,
    timeout: Duration,
}

impl Ntpq {
    pub fn new(spec: Spec) -> Result<Self> {
        if spec.tries == 0 {
            return Err(CheckError::InvalidSpec("tries must be at least 1".into()));
        }

        let server = if spec.server.contains(':') {
            spec.server
        } else {
            format!("{}:123", spec.server)
        };

        Ok(Self {
            server,
            offset_threshold: spec.offset_threshold,
            tries: spec.tries,
            interval: spec.interval,
            timeout: spec.timeout,
        })
    }

    async fn probe(&self) -> Result<()> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(self.server.as_str()).await?;

        let mut packet = [0u8; 48];
        packet[0] = (VERSION << 3) | MODE_CLIENT;
        encode_timestamp(ntp_now(), &mut packet[40..48]);

        socket.send(&packet).await?;
        NTP_PACKETS_SENT.with_label_values(&[KIND, &self.server]).inc();
        let t1 = ntp_now();

        let mut response = [0u8; 48];
        let n = tokio::time::timeout(self.timeout, socket.recv(&mut response))
            .await
            .map_err(|_| CheckError::Timeout(self.timeout))??;
        let t4 = ntp_now();

        let (t2, t3) = parse_response(&response[..n])?;
        let offset = clock_offset(t1, t2, t3, t4);
        let rtt = round_trip_delay(t1, t2, t3, t4);

        NTP_OFFSET_MS
            .with_label_values(&[KIND, &self.server])
            .set(offset * 1000.0);
        NTP_RTT_MS
            .with_label_values(&[KIND, &self.server])
            .set(rtt * 1000.0);

        if offset.abs() > self.offset_threshold.as_secs_f64() {
            return Err(CheckError::Unhealthy(format!(
                "clock offset {:.3}ms exceeds threshold {:?}",
                offset * 1000.0,
                self.offset_threshold
            )));
        }
        Ok(())
    }
}

/// Registry constructor.
pub fn from_spec(spec: serde_json::Value) -> Result<Box<dyn Checker>> {
    let spec: Spec =
        serde_json::from_value(spec).map_err(|err| CheckError::InvalidSpec(err.to_string()))?;
    Ok(Box::new(Ntpq::new(spec)?))
}

#[async_trait]
impl Checker for Ntpq {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn check(&self) -> Result<()> {
        with_retries(KIND, self.tries, self.interval, || self.probe()).await
    }
}

/// Validates the reply and extracts the receive (t2) and transmit (t3)
/// timestamps.
fn parse_response(packet: &[u8]) -> Result<(f64, f64)> {
    if packet.len() < 48 {
        return Err(CheckError::Unhealthy("short ntp response".into()));
    }
    if packet[0] & 0x07 != MODE_SERVER {
        return Err(CheckError::Unhealthy(format!(
            "unexpected ntp mode {}",
            packet[0] & 0x07
        )));
    }
    // Stratum 0 is a kiss-of-death packet.
    if packet[1] == 0 {
        return Err(CheckError::Unhealthy("server sent kiss-of-death".into()));
    }

    Ok((
        decode_timestamp(&packet[32..40]),
        decode_timestamp(&packet[40..48]),
    ))
}

fn clock_offset(t1: f64, t2: f64, t3: f64, t4: f64) -> f64 {
    ((t2 - t1) + (t3 - t4)) / 2.0
}

fn round_trip_delay(t1: f64, t2: f64, t3: f64, t4: f64) -> f64 {
    (t4 - t1) - (t3 - t2)
}

fn ntp_now() -> f64 {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    unix.as_secs_f64() + NTP_UNIX_OFFSET
}

fn decode_timestamp(bytes: &[u8]) -> f64 {
    let seconds = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64;
    let fraction = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as f64;
    seconds + fraction / (u32::MAX as f64 + 1.0)
}

fn encode_timestamp(timestamp: f64, out: &mut [u8]) {
    let seconds = timestamp.trunc() as u32;
    let fraction = (timestamp.fract() * (u32::MAX as f64 + 1.0)) as u32;
    out[..4].copy_from_slice(&seconds.to_be_bytes());
    out[4..8].copy_from_slice(&fraction.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_roundtrip() {
        let now = ntp_now();
        let mut buf = [0u8; 8];
        encode_timestamp(now, &mut buf);
        let decoded = decode_timestamp(&buf);
        assert!((decoded - now).abs() < 1e-6, "{decoded} vs {now}");
    }

    #[test]
    fn offset_and_delay_math() {
        // Client clock 10s behind the server, 2s of symmetric network delay.
        let t1 = 1000.0;
        let t2 = 1011.0;
        let t3 = 1011.5;
        let t4 = 1002.5;
        assert_eq!(clock_offset(t1, t2, t3, t4), 10.0);
        assert!((round_trip_delay(t1, t2, t3, t4) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn response_validation() {
        let mut packet = [0u8; 48];
        packet[0] = (VERSION << 3) | MODE_CLIENT;
        packet[1] = 2;
        assert!(parse_response(&packet).is_err(), "client mode rejected");

        packet[0] = (VERSION << 3) | MODE_SERVER;
        packet[1] = 0;
        assert!(parse_response(&packet).is_err(), "kiss-of-death rejected");

        packet[1] = 2;
        assert!(parse_response(&packet).is_ok());
        assert!(parse_response(&packet[..20]).is_err(), "short packet");
    }

    async fn stub_server(skew: f64) -> std::net::SocketAddr {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 48];
            let (_, from) = server.recv_from(&mut buf).await.unwrap();

            let mut reply = [0u8; 48];
            reply[0] = (VERSION << 3) | MODE_SERVER;
            reply[1] = 2;
            let server_now = ntp_now() + skew;
            encode_timestamp(server_now, &mut reply[32..40]);
            encode_timestamp(server_now, &mut reply[40..48]);
            server.send_to(&reply, from).await.unwrap();
        });
        addr
    }

    fn spec(server: String, threshold: Duration) -> Spec {
        Spec {
            server,
            offset_threshold: threshold,
            tries: 1,
            interval: Duration::from_millis(1),
            timeout: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn accepts_small_offset() {
        let addr = stub_server(0.0).await;
        let checker = Ntpq::new(spec(addr.to_string(), Duration::from_secs(5))).unwrap();
        assert!(checker.check().await.is_ok());
    }

    #[tokio::test]
    async fn rejects_large_offset() {
        let addr = stub_server(3600.0).await;
        let checker = Ntpq::new(spec(addr.to_string(), Duration::from_millis(100))).unwrap();
        let err = checker.check().await.unwrap_err();
        assert!(err.to_string().contains("exceeds threshold"), "{err}");
    }

    #[test]
    fn default_port_is_appended() {
        let checker = Ntpq::new(spec("ntp.example.com".into(), Duration::from_secs(1))).unwrap();
        assert_eq!(checker.server, "ntp.example.com:123");
    }
}
