//! HTTP probe: the target is healthy when it answers with a 2xx code.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::retry::with_retries;
use crate::{CheckError, Checker, Result};

const KIND: &str = "http_2xx";

#[derive(Debug, Clone, Deserialize)]
pub struct Spec {
    pub url: String,
    pub method: String,
    pub tries: u8,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Spec {
    fn validate(&self) -> Result<()> {
        if self.tries == 0 {
            return Err(CheckError::InvalidSpec("tries must be at least 1".into()));
        }
        if self.timeout.is_zero() {
            return Err(CheckError::InvalidSpec("timeout must be non-zero".into()));
        }
        Ok(())
    }
}

pub struct Http2xx {
    client: reqwest::Client,
    url: reqwest::Url,
    method: reqwest::Method,
    tries: u8,
    interval: Duration,
}

impl Http2xx {
    pub fn new(spec: Spec) -> Result<Self> {
        spec.validate()?;

        let url = reqwest::Url::parse(&spec.url)
            .map_err(|err| CheckError::InvalidSpec(format!("invalid url: {err}")))?;
        let method = reqwest::Method::from_bytes(spec.method.to_uppercase().as_bytes())
            .map_err(|err| CheckError::InvalidSpec(format!("invalid method: {err}")))?;
        let client = reqwest::Client::builder()
            .timeout(spec.timeout)
            .build()
            .map_err(|err| CheckError::InvalidSpec(format!("building http client: {err}")))?;

        Ok(Self {
            client,
            url,
            method,
            tries: spec.tries,
            interval: spec.interval,
        })
    }

    async fn probe(&self) -> Result<()> {
        let response = self
            .client
            .request(self.method.clone(), self.url.clone())
            .send()
            .await
            .map_err(|err| CheckError::Unhealthy(format!("request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CheckError::Unhealthy(format!(
                "unexpected code received: {}",
                status.as_u16()
            )));
        }

        Ok(())
    }
}

/// Registry constructor.
pub fn from_spec(spec: serde_json::Value) -> Result<Box<dyn Checker>> {
    let spec: Spec =
        serde_json::from_value(spec).map_err(|err| CheckError::InvalidSpec(err.to_string()))?;
    Ok(Box::new(Http2xx::new(spec)?))
}

#[async_trait]
impl Checker for Http2xx {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn check(&self) -> Result<()> {
        with_retries(KIND, self.tries, self.interval, || self.probe()).await
    }
}
