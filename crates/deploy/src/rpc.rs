//! JSON-RPC chain client for nodes that hold unlocked accounts (Anvil, Hardhat, Geth dev).

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, B256, Bytes, U64};
use anyhow::{Context, Result};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use crate::traits::{ChainClient, DeployReceipt, TxReceipt};

/// Timeout of a single HTTP request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between receipt and block-number polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How long to wait for a submitted transaction to be mined.
const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {method} request"))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {method} response"))?;

    if let Some(error) = result.get("error") {
        anyhow::bail!(
            "RPC error in {}: {}",
            method,
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
        );
    }

    let result_value = result
        .get("result")
        .with_context(|| format!("No result in {method} response"))?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {method} result"))
}

/// Poll `check` until it yields a value or `timeout` elapses.
///
/// Errors from `check` are treated as transient and retried. Returns `None` on timeout.
pub async fn poll_until<T, F, Fut>(
    what: &str,
    timeout: Duration,
    interval: Duration,
    check: F,
) -> Option<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = tokio::time::Instant::now();

    loop {
        match check().await {
            Ok(Some(value)) => return Some(value),
            Ok(None) => {}
            Err(e) => {
                tracing::trace!(error = %e, what, "Poll failed, retrying...");
            }
        }

        if start.elapsed() >= timeout {
            return None;
        }
        tokio::time::sleep(interval).await;
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    #[serde(default)]
    status: Option<U64>,
    #[serde(default)]
    contract_address: Option<Address>,
    #[serde(default)]
    block_number: Option<U64>,
}

impl RpcReceipt {
    /// Pre-Byzantium receipts carry no status; treat them as successful.
    fn success(&self) -> bool {
        self.status.is_none_or(|s| s != U64::ZERO)
    }
}

/// [`ChainClient`] over plain JSON-RPC.
///
/// Transactions are sent with `eth_sendTransaction`, so signing happens on the node.
#[derive(Debug, Clone)]
pub struct JsonRpcChainClient {
    http: reqwest::Client,
    url: Url,
    from: Address,
    chain_id: u64,
    poll_interval: Duration,
    receipt_timeout: Duration,
}

impl JsonRpcChainClient {
    /// Connect to `url`, sending from `from` or, if unset, the node's first account.
    pub async fn connect(url: Url, from: Option<Address>) -> Result<Self> {
        let http = create_client()?;

        let chain_id: U64 = json_rpc_call(&http, url.as_str(), "eth_chainId", vec![])
            .await
            .with_context(|| format!("Failed to reach node at {url}"))?;

        let from = match from {
            Some(from) => from,
            None => {
                let accounts: Vec<Address> =
                    json_rpc_call(&http, url.as_str(), "eth_accounts", vec![]).await?;
                accounts
                    .first()
                    .copied()
                    .context("Node exposes no unlocked accounts, set an explicit sender")?
            }
        };

        let chain_id = chain_id.to::<u64>();
        tracing::info!(%url, chain_id, %from, "Connected to node");

        Ok(Self {
            http,
            url,
            from,
            chain_id,
            poll_interval: DEFAULT_POLL_INTERVAL,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_receipt_timeout(mut self, receipt_timeout: Duration) -> Self {
        self.receipt_timeout = receipt_timeout;
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        json_rpc_call(&self.http, self.url.as_str(), method, params).await
    }

    /// Send a transaction and wait until it is mined.
    async fn submit(&self, to: Option<Address>, data: Bytes) -> Result<(B256, RpcReceipt)> {
        let mut tx = serde_json::json!({
            "from": self.from,
            "data": data,
        });
        if let Some(to) = to {
            tx["to"] = serde_json::json!(to);
        }

        let tx_hash: B256 = self
            .request("eth_sendTransaction", vec![tx])
            .await
            .context("Failed to send transaction")?;
        tracing::debug!(%tx_hash, "Transaction sent, waiting for receipt...");

        let receipt = poll_until(
            "transaction receipt",
            self.receipt_timeout,
            self.poll_interval,
            || async move {
                self.request::<Option<RpcReceipt>>(
                    "eth_getTransactionReceipt",
                    vec![serde_json::json!(tx_hash)],
                )
                .await
            },
        )
        .await
        .with_context(|| format!("Transaction {tx_hash} was not mined in time"))?;

        Ok((tx_hash, receipt))
    }
}

impl ChainClient for JsonRpcChainClient {
    fn sender(&self) -> Address {
        self.from
    }

    async fn deploy_contract(&self, creation_code: Bytes) -> Result<DeployReceipt> {
        let (tx_hash, receipt) = self.submit(None, creation_code).await?;
        let success = receipt.success();
        let address = match (success, receipt.contract_address) {
            (true, Some(address)) => address,
            (true, None) => anyhow::bail!("Receipt of {tx_hash} has no contract address"),
            (false, address) => address.unwrap_or_default(),
        };

        Ok(DeployReceipt {
            address,
            tx_hash: Some(tx_hash),
            success,
        })
    }

    async fn send_transaction(&self, to: Address, calldata: Bytes) -> Result<TxReceipt> {
        let (tx_hash, receipt) = self.submit(Some(to), calldata).await?;
        Ok(TxReceipt {
            tx_hash: Some(tx_hash),
            success: receipt.success(),
        })
    }

    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes> {
        self.request(
            "eth_call",
            vec![
                serde_json::json!({ "from": self.from, "to": to, "data": calldata }),
                serde_json::json!("latest"),
            ],
        )
        .await
        .with_context(|| format!("eth_call to {to} failed"))
    }

    async fn wait_for_confirmations(
        &self,
        tx_hash: B256,
        confirmations: u64,
        timeout: Duration,
    ) -> Result<bool> {
        let confirmed = poll_until("confirmations", timeout, self.poll_interval, || async move {
            let receipt: Option<RpcReceipt> = self
                .request("eth_getTransactionReceipt", vec![serde_json::json!(tx_hash)])
                .await?;
            let Some(mined_in) = receipt.and_then(|r| r.block_number) else {
                return Ok(None);
            };
            let head: U64 = self.request("eth_blockNumber", vec![]).await?;
            let observed = head.saturating_sub(mined_in).to::<u64>() + 1;
            tracing::debug!(%tx_hash, observed, confirmations, "Polled confirmations");
            Ok::<_, anyhow::Error>((observed >= confirmations).then_some(()))
        })
        .await;

        Ok(confirmed.is_some())
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256> {
        self.request(
            "eth_getStorageAt",
            vec![
                serde_json::json!(address),
                serde_json::json!(slot),
                serde_json::json!("latest"),
            ],
        )
        .await
    }

    async fn code_at(&self, address: Address) -> Result<Bytes> {
        self.request(
            "eth_getCode",
            vec![serde_json::json!(address), serde_json::json!("latest")],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_status() {
        let ok: RpcReceipt = serde_json::from_value(serde_json::json!({
            "status": "0x1",
            "contractAddress": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "blockNumber": "0x2"
        }))
        .unwrap();
        assert!(ok.success());
        assert_eq!(ok.block_number, Some(U64::from(2)));

        let reverted: RpcReceipt =
            serde_json::from_value(serde_json::json!({ "status": "0x0", "contractAddress": null }))
                .unwrap();
        assert!(!reverted.success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_times_out() {
        let result: Option<()> = poll_until(
            "never",
            Duration::from_secs(10),
            Duration::from_secs(2),
            || async { Ok::<_, anyhow::Error>(None) },
        )
        .await;
        assert!(result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_retries_errors() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result = poll_until("flaky", Duration::from_secs(60), Duration::from_secs(1), || {
            let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                if n < 2 {
                    anyhow::bail!("connection refused")
                }
                Ok(Some(n))
            }
        })
        .await;
        assert_eq!(result, Some(2));
    }
}
