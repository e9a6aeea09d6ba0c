//! Block-explorer verification contract.

use std::future::Future;

use alloy_core::primitives::{Address, Bytes};
use anyhow::Result;

/// Everything an explorer needs to match deployed bytecode to its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    pub address: Address,
    /// Artifact identifier of the contract deployed at `address`.
    pub contract: String,
    /// Constructor arguments as supplied by the user.
    pub constructor_args: Vec<String>,
    /// ABI-encoded constructor arguments.
    pub encoded_args: Bytes,
}

/// Successful answers from a verification service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceVerdict {
    Verified,
    AlreadyVerified,
}

/// Error a service returns when retrying cannot help (bad API key, missing sources, ...).
///
/// Any other error is treated as a transient failure by the retrier.
#[derive(Debug, thiserror::Error)]
#[error("verification rejected: {0}")]
pub struct VerificationRejected(pub String);

/// External verification service (Etherscan-compatible explorer, Sourcify, ...).
pub trait VerificationService: Send + Sync {
    /// Submit a verification. Failures carry the explorer's message.
    fn verify(
        &self,
        request: &VerificationRequest,
    ) -> impl Future<Output = Result<ServiceVerdict>> + Send;
}

/// Placeholder service for runs without an explorer configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVerifier;

impl VerificationService for NoVerifier {
    async fn verify(&self, _request: &VerificationRequest) -> Result<ServiceVerdict> {
        Err(VerificationRejected("no verification service configured".to_string()).into())
    }
}
