//! Error taxonomy for deployment orchestration.

use alloy_core::primitives::{Address, B256};

/// Errors that can occur while deploying, upgrading or verifying contracts.
///
/// Only [`DeployError::ConfirmationTimeout`] is recovered locally (by falling back to a fixed
/// wait). Everything else propagates up to the orchestrator, which decides the exit signal.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Missing or malformed configuration. Raised before any chain interaction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Arguments that do not match the contract ABI. Raised before submission.
    #[error("invalid arguments for {target}: {reason}")]
    InvalidArguments { target: String, reason: String },

    /// A transaction was mined but reverted.
    #[error("transaction reverted during {step}{}", tx_suffix(.tx_hash))]
    TransactionReverted { step: String, tx_hash: Option<B256> },

    /// The requested confirmation depth was not observed in time.
    #[error("timed out waiting for {required} confirmations of {tx_hash}")]
    ConfirmationTimeout { tx_hash: B256, required: u64 },

    /// The initializer call through a freshly deployed proxy reverted.
    #[error("initializer `{initializer}` failed on proxy {proxy}: {reason}")]
    InitializationFailed {
        proxy: Address,
        initializer: String,
        reason: String,
    },

    /// The upgrade transaction reverted and the implementation pointer is unchanged.
    #[error("upgrade of proxy {proxy} to {implementation} reverted{}", tx_suffix(.tx_hash))]
    UpgradeReverted {
        proxy: Address,
        implementation: Address,
        tx_hash: Option<B256>,
    },

    /// Chain state contradicts the outcome reported for a transaction.
    #[error("fatal inconsistency: {0}")]
    FatalInconsistency(String),

    /// The run was cancelled (signal or overall timeout) while waiting on a step.
    #[error("cancelled while waiting for {step}")]
    Cancelled { step: String },

    /// The chain client failed for a reason that is not a revert.
    #[error("chain client error during {step}: {error:#}")]
    Chain { step: String, error: anyhow::Error },
}

impl DeployError {
    pub fn chain(step: impl Into<String>, error: anyhow::Error) -> Self {
        Self::Chain {
            step: step.into(),
            error,
        }
    }

    pub fn invalid_arguments(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error can be recovered from without failing the deployment.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ConfirmationTimeout { .. })
    }

    /// Whether the error was raised before anything was submitted to the chain.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::InvalidArguments { .. }
        )
    }
}

fn tx_suffix(tx_hash: &Option<B256>) -> String {
    tx_hash.map(|h| format!(" (tx {h})")).unwrap_or_default()
}
