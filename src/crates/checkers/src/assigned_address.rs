//! Local address probe: verifies the node actually carries a given IPv4
//! address, optionally pinned to an interface name.

use std::collections::HashMap;
use std::net::IpAddr;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{CheckError, Checker, Result};

const KIND: &str = "assigned_address";

#[derive(Debug, Clone, Deserialize)]
pub struct Spec {
    pub ipv4: Ipv4Addr,
    #[serde(default)]
    pub interface: Option<String>,
}

type Collector = Box<dyn Fn() -> std::io::Result<HashMap<IpAddr, String>> + Send + Sync>;

pub struct AssignedAddress {
    ipv4: Ipv4Addr,
    interface: Option<String>,
    collector: Collector,
}

impl AssignedAddress {
    pub fn new(spec: Spec) -> Result<Self> {
        Ok(Self::with_collector(spec, Box::new(gather_interfaces)))
    }

    fn with_collector(spec: Spec, collector: Collector) -> Self {
        Self {
            ipv4: spec.ipv4,
            interface: spec.interface,
            collector,
        }
    }
}

/// Registry constructor.
pub fn from_spec(spec: serde_json::Value) -> Result<Box<dyn Checker>> {
    let spec: Spec =
        serde_json::from_value(spec).map_err(|err| CheckError::InvalidSpec(err.to_string()))?;
    Ok(Box::new(AssignedAddress::new(spec)?))
}

#[async_trait]
impl Checker for AssignedAddress {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn check(&self) -> Result<()> {
        let interfaces = (self.collector)()
            .map_err(|err| CheckError::Unhealthy(format!("discovering interfaces: {err}")))?;

        tracing::trace!(check = KIND, ?interfaces, "discovered interfaces");

        let Some(interface) = interfaces.get(&IpAddr::V4(self.ipv4)) else {
            return Err(CheckError::Unhealthy(format!(
                "address {} is not assigned on the system",
                self.ipv4
            )));
        };

        if let Some(expected) = &self.interface {
            if expected != interface {
                return Err(CheckError::Unhealthy(format!(
                    "address {} is assigned to `{interface}`, expected `{expected}`",
                    self.ipv4
                )));
            }
        }

        Ok(())
    }
}

/// Maps every locally assigned address to its interface name.
fn gather_interfaces() -> std::io::Result<HashMap<IpAddr, String>> {
    Ok(if_addrs::get_if_addrs()?
        .into_iter()
        .map(|iface| (iface.addr.ip(), iface.name))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(entries: &[(&str, &str)]) -> Collector {
        let map: HashMap<IpAddr, String> = entries
            .iter()
            .map(|(ip, name)| (ip.parse().unwrap(), name.to_string()))
            .collect();
        Box::new(move || Ok(map.clone()))
    }

    fn spec(ipv4: &str, interface: Option<&str>) -> Spec {
        Spec {
            ipv4: ipv4.parse().unwrap(),
            interface: interface.map(String::from),
        }
    }

    #[tokio::test]
    async fn passes_when_address_present() {
        let checker = AssignedAddress::with_collector(
            spec("10.0.0.1", None),
            fixed(&[("10.0.0.1", "lo"), ("192.168.1.2", "eth0")]),
        );
        assert!(checker.check().await.is_ok());
    }

    #[tokio::test]
    async fn fails_when_address_missing() {
        let checker =
            AssignedAddress::with_collector(spec("10.0.0.1", None), fixed(&[("127.0.0.1", "lo")]));
        let err = checker.check().await.unwrap_err();
        assert!(err.to_string().contains("not assigned"));
    }

    #[tokio::test]
    async fn honors_interface_pin() {
        let entries = &[("10.0.0.1", "dummy0")];

        let pinned_right =
            AssignedAddress::with_collector(spec("10.0.0.1", Some("dummy0")), fixed(entries));
        assert!(pinned_right.check().await.is_ok());

        let pinned_wrong =
            AssignedAddress::with_collector(spec("10.0.0.1", Some("eth0")), fixed(entries));
        let err = pinned_wrong.check().await.unwrap_err();
        assert!(err.to_string().contains("expected `eth0`"));
    }

    #[tokio::test]
    async fn loopback_is_discoverable() {
        // Every test environment has a loopback; exercises the real collector.
        let checker = AssignedAddress::new(spec("127.0.0.1", None)).unwrap();
        assert!(checker.check().await.is_ok());
    }

    #[test]
    fn from_spec_parses_json() {
        assert!(from_spec(serde_json::json!({"ipv4": "10.0.0.1"})).is_ok());
        assert!(from_spec(serde_json::json!({"ipv4": "not-an-ip"})).is_err());
    }
}
