//! TLS certificate probe: inspects a chain loaded from a local PEM file or a
//! remote TLS endpoint and verifies expiry and identity expectations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use prometheus::{GaugeVec, Opts};
use serde::Deserialize;
use tokio::net::TcpStream;
use x509_parser::prelude::*;

use crate::{CheckError, Checker, Result};

const KIND: &str = "tls_certificate";

static CERTIFICATE_EXPIRES_IN_SECONDS: Lazy<GaugeVec> = Lazy::new(|| {
    let gauge = GaugeVec::new(
        Opts::new(
            "anycastd_certificate_expires_in_seconds",
            "Time the certificate expires in (in seconds)",
        ),
        &["check", "path"],
    )
    .expect("valid metric definition");
    let _ = prometheus::register(Box::new(gauge.clone()));
    gauge
});

#[derive(Debug, Clone, Deserialize)]
pub struct LocalSpec {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSpec {
    pub addr: String,
    #[serde(default = "default_handshake_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_handshake_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Deserialize)]
pub struct Spec {
    #[serde(default)]
    pub local: Option<LocalSpec>,
    #[serde(default)]
    pub remote: Option<RemoteSpec>,
    #[serde(default)]
    pub common_name: Option<String>,
    #[serde(default)]
    pub dns_names: Option<Vec<String>>,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub expires_in: Option<Duration>,
}

enum Source {
    Local { path: PathBuf },
    Remote { addr: String, timeout: Duration },
}

impl Source {
    fn target(&self) -> String {
        match self {
            Self::Local { path } => path.display().to_string(),
            Self::Remote { addr, .. } => addr.clone(),
        }
    }

    async fn retrieve(&self) -> Result<Vec<Vec<u8>>> {
        match self {
            Self::Local { path } => {
                let data = tokio::fs::read(path).await?;
                rustls_pemfile::certs(&mut data.as_slice()).map_err(CheckError::Io)
            }
            Self::Remote { addr, timeout } => {
                tokio::time::timeout(*timeout, retrieve_remote(addr))
                    .await
                    .map_err(|_| CheckError::Timeout(*timeout))?
            }
        }
    }
}

pub struct TlsCertificate {
    source: Source,
    common_name: Option<String>,
    dns_names: Vec<String>,
    issuer: Option<String>,
    expires_in: Duration,
}

impl TlsCertificate {
    pub fn new(spec: Spec) -> Result<Self> {
        let source = match (spec.local, spec.remote) {
            (Some(local), None) => Source::Local { path: local.path },
            (None, Some(remote)) => Source::Remote {
                addr: remote.addr,
                timeout: remote.timeout,
            },
            _ => {
                return Err(CheckError::InvalidSpec(
                    "either local or remote configuration must be defined".into(),
                ))
            }
        };

        Ok(Self {
            source,
            common_name: spec.common_name,
            dns_names: spec.dns_names.unwrap_or_default(),
            issuer: spec.issuer,
            expires_in: spec.expires_in.unwrap_or(Duration::ZERO),
        })
    }

    fn verify(&self, der: &[u8]) -> Result<()> {
        let (_, cert) = parse_x509_certificate(der)
            .map_err(|err| CheckError::Unhealthy(format!("parsing certificate: {err}")))?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        let remaining = cert.validity().not_after.timestamp() - now;

        CERTIFICATE_EXPIRES_IN_SECONDS
            .with_label_values(&[KIND, &self.source.target()])
            .set(remaining as f64);

        if remaining <= self.expires_in.as_secs() as i64 {
            return Err(CheckError::Unhealthy(format!(
                "certificate expires in {remaining}s"
            )));
        }

        if let Some(expected) = &self.common_name {
            let cn = common_name(cert.subject());
            if cn.as_deref() != Some(expected.as_str()) {
                return Err(CheckError::Unhealthy(format!(
                    "common name mismatch: got {cn:?}, expected `{expected}`"
                )));
            }
        }

        if !self.dns_names.is_empty() {
            let sans = dns_names(&cert);
            for expected in &self.dns_names {
                if !sans.iter().any(|san| san == expected) {
                    return Err(CheckError::Unhealthy(format!(
                        "dns name `{expected}` not present in certificate"
                    )));
                }
            }
        }

        if let Some(expected) = &self.issuer {
            let issuer = common_name(cert.issuer());
            if issuer.as_deref() != Some(expected.as_str()) {
                return Err(CheckError::Unhealthy(format!(
                    "issuer mismatch: got {issuer:?}, expected `{expected}`"
                )));
            }
        }

        Ok(())
    }
}

/// Registry constructor.
pub fn from_spec(spec: serde_json::Value) -> Result<Box<dyn Checker>> {
    let spec: Spec =
        serde_json::from_value(spec).map_err(|err| CheckError::InvalidSpec(err.to_string()))?;
    Ok(Box::new(TlsCertificate::new(spec)?))
}

#[async_trait]
impl Checker for TlsCertificate {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn check(&self) -> Result<()> {
        let chain = self.source.retrieve().await?;
        let leaf = chain
            .first()
            .ok_or_else(|| CheckError::Unhealthy("no certificates found".into()))?;
        self.verify(leaf)
    }
}

fn common_name(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(String::from)
}

fn dns_names(cert: &X509Certificate<'_>) -> Vec<String> {
    cert.subject_alternative_name()
        .ok()
        .flatten()
        .map(|ext| {
            ext.value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Performs a handshake with verification disabled and returns the peer's
/// chain in DER form. The probe inspects certificates, it does not trust them.
async fn retrieve_remote(addr: &str) -> Result<Vec<Vec<u8>>> {
    let host = addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(addr);
    let server_name = rustls::ServerName::try_from(host)
        .map_err(|err| CheckError::Unhealthy(format!("invalid server name `{host}`: {err}")))?;

    let config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(NoVerification))
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));

    let stream = TcpStream::connect(addr).await?;
    let tls = connector
        .connect(server_name, stream)
        .await
        .map_err(|err| CheckError::Unhealthy(format!("tls handshake with {addr}: {err}")))?;

    let (_, session) = tls.get_ref();
    let chain = session
        .peer_certificates()
        .ok_or_else(|| CheckError::Unhealthy("peer presented no certificates".into()))?;

    Ok(chain.iter().map(|cert| cert.0.clone()).collect())
}

struct NoVerification;

impl rustls::client::ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn self_signed(cn: &str, sans: &[&str]) -> String {
        let mut params =
            rcgen::CertificateParams::new(sans.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, cn);
        params.not_after = rcgen::date_time_ymd(2035, 1, 1);
        let cert = rcgen::Certificate::from_params(params).unwrap();
        cert.serialize_pem().unwrap()
    }

    fn pem_file(pem: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(pem.as_bytes()).unwrap();
        file
    }

    fn local_spec(path: &std::path::Path) -> Spec {
        Spec {
            local: Some(LocalSpec {
                path: path.to_path_buf(),
            }),
            remote: None,
            common_name: None,
            dns_names: None,
            issuer: None,
            expires_in: None,
        }
    }

    #[tokio::test]
    async fn accepts_valid_local_certificate() {
        let file = pem_file(&self_signed("example.com", &["example.com"]));
        let checker = TlsCertificate::new(local_spec(file.path())).unwrap();
        assert!(checker.check().await.is_ok());
    }

    #[tokio::test]
    async fn verifies_identity_expectations() {
        let file = pem_file(&self_signed("example.com", &["example.com", "alt.example.com"]));

        let mut spec = local_spec(file.path());
        spec.common_name = Some("example.com".into());
        spec.dns_names = Some(vec!["alt.example.com".into()]);
        // Self-signed: the issuer is the subject.
        spec.issuer = Some("example.com".into());
        let checker = TlsCertificate::new(spec).unwrap();
        assert!(checker.check().await.is_ok());

        let mut wrong_cn = local_spec(file.path());
        wrong_cn.common_name = Some("other.example.com".into());
        let checker = TlsCertificate::new(wrong_cn).unwrap();
        assert!(checker.check().await.is_err());

        let mut wrong_san = local_spec(file.path());
        wrong_san.dns_names = Some(vec!["missing.example.com".into()]);
        let checker = TlsCertificate::new(wrong_san).unwrap();
        assert!(checker.check().await.is_err());
    }

    #[tokio::test]
    async fn rejects_certificate_below_expiry_threshold() {
        let file = pem_file(&self_signed("example.com", &["example.com"]));

        let mut spec = local_spec(file.path());
        // The fixture certificate expires well within a century.
        spec.expires_in = Some(Duration::from_secs(100 * 365 * 24 * 3600));
        let checker = TlsCertificate::new(spec).unwrap();

        let err = checker.check().await.unwrap_err();
        assert!(err.to_string().contains("expires in"));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let checker =
            TlsCertificate::new(local_spec(std::path::Path::new("/nonexistent.pem"))).unwrap();
        assert!(checker.check().await.is_err());
    }

    #[test]
    fn requires_exactly_one_source() {
        let neither = Spec {
            local: None,
            remote: None,
            common_name: None,
            dns_names: None,
            issuer: None,
            expires_in: None,
        };
        assert!(TlsCertificate::new(neither).is_err());

        let both = Spec {
            local: Some(LocalSpec {
                path: "/tmp/x.pem".into(),
            }),
            remote: Some(RemoteSpec {
                addr: "example.com:443".into(),
                timeout: Duration::from_secs(1),
            }),
            common_name: None,
            dns_names: None,
            issuer: None,
            expires_in: None,
        };
        assert!(TlsCertificate::new(both).is_err());
    }

    #[test]
    fn from_spec_parses_json() {
        assert!(from_spec(serde_json::json!({
            "remote": {"addr": "example.com:443"},
            "expires_in": "30d",
        }))
        .is_ok());
        assert!(from_spec(serde_json::json!({"expires_in": 42})).is_err());
    }
}
