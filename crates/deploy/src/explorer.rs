//! Etherscan-compatible explorer verification.

use std::time::Duration;

use alloy_core::primitives::hex;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::{
    artifacts::ArtifactDir,
    traits::{ServiceVerdict, VerificationRejected, VerificationRequest, VerificationService},
    verify::is_already_verified,
};

const DEFAULT_STATUS_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_STATUS_POLLS: u32 = 12;

#[derive(Debug, Deserialize)]
struct EtherscanResponse {
    status: String,
    message: String,
    #[serde(default)]
    result: Value,
}

impl EtherscanResponse {
    fn ok(&self) -> bool {
        self.status == "1"
    }

    fn result_text(&self) -> String {
        match &self.result {
            Value::String(s) => s.clone(),
            Value::Null => self.message.clone(),
            other => other.to_string(),
        }
    }
}

/// Submits standard-JSON verifications to an Etherscan-compatible API.
///
/// Sources and compiler settings come from the build-info files next to the artifacts.
#[derive(Debug, Clone)]
pub struct EtherscanVerifier {
    http: reqwest::Client,
    api_url: Url,
    api_key: Option<String>,
    chain_id: Option<u64>,
    artifacts: ArtifactDir,
    poll_interval: Duration,
    max_polls: u32,
}

impl EtherscanVerifier {
    pub fn new(api_url: Url, api_key: Option<String>, artifacts: ArtifactDir) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_url,
            api_key: api_key.filter(|k| !k.is_empty()),
            chain_id: None,
            artifacts,
            poll_interval: DEFAULT_STATUS_POLL_INTERVAL,
            max_polls: DEFAULT_STATUS_POLLS,
        })
    }

    /// Send `chainid` with every request, as multichain APIs require.
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn with_status_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    fn chain_param(&self) -> Vec<(&'static str, String)> {
        self.chain_id
            .map(|id| vec![("chainid", id.to_string())])
            .unwrap_or_default()
    }

    async fn submit(&self, api_key: &str, request: &VerificationRequest) -> Result<EtherscanResponse> {
        let build_info = self
            .artifacts
            .build_info(&request.contract)
            .map_err(|e| VerificationRejected(format!("{e:#}")))?;
        let source = serde_json::to_string(&build_info.input)
            .context("Failed to serialize compiler input")?;

        let form = [
            ("apikey", api_key.to_string()),
            ("module", "contract".to_string()),
            ("action", "verifysourcecode".to_string()),
            ("contractaddress", request.address.to_checksum(None)),
            ("sourceCode", source),
            ("codeformat", "solidity-standard-json-input".to_string()),
            ("contractname", build_info.fully_qualified_name),
            ("compilerversion", format!("v{}", build_info.solc_long_version)),
            // Etherscan's spelling.
            ("constructorArguements", hex::encode(&request.encoded_args)),
        ];

        tracing::debug!(address = %request.address, contract = %request.contract, "Submitting source to explorer");

        self.http
            .post(self.api_url.clone())
            .query(&self.chain_param())
            .form(&form)
            .send()
            .await
            .context("Failed to reach explorer API")?
            .json()
            .await
            .context("Failed to parse explorer response")
    }

    async fn check_status(&self, api_key: &str, guid: &str) -> Result<EtherscanResponse> {
        let mut query = vec![
            ("apikey", api_key.to_string()),
            ("module", "contract".to_string()),
            ("action", "checkverifystatus".to_string()),
            ("guid", guid.to_string()),
        ];
        query.extend(self.chain_param());

        self.http
            .get(self.api_url.clone())
            .query(&query)
            .send()
            .await
            .context("Failed to reach explorer API")?
            .json()
            .await
            .context("Failed to parse explorer status response")
    }
}

impl VerificationService for EtherscanVerifier {
    async fn verify(&self, request: &VerificationRequest) -> Result<ServiceVerdict> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(VerificationRejected("no explorer API key configured".to_string()).into());
        };

        let submitted = self.submit(api_key, request).await?;
        let text = submitted.result_text();
        if !submitted.ok() {
            if is_already_verified(&text) {
                return Ok(ServiceVerdict::AlreadyVerified);
            }
            anyhow::bail!("{text}");
        }

        let guid = text;
        tracing::debug!(%guid, "Verification submitted, polling status...");

        for _ in 0..self.max_polls {
            tokio::time::sleep(self.poll_interval).await;

            let status = self.check_status(api_key, &guid).await?;
            let text = status.result_text();
            if status.ok() {
                return Ok(ServiceVerdict::Verified);
            }
            if is_already_verified(&text) {
                return Ok(ServiceVerdict::AlreadyVerified);
            }
            if !text.to_lowercase().contains("pending") {
                anyhow::bail!("{text}");
            }
        }

        anyhow::bail!("verification {guid} still pending after {} polls", self.max_polls)
    }
}
