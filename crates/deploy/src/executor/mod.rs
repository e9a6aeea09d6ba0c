//! Executors that sequence on-chain steps for each deployment kind.
//!
//! Every executor runs its steps strictly in order: each one depends on a chain-observable
//! result of the previous one. Executors never lock a proxy; concurrent upgrades of the same
//! proxy are ordered by the chain and are the caller's responsibility.

mod deployment;
mod proxy;
mod upgrade;

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};

pub use deployment::DeploymentExecutor;
pub use proxy::{ProxyContracts, ProxyDeploymentExecutor};
pub use upgrade::UpgradeExecutor;

use crate::{
    CancelSignal, DeployError,
    abi::PreparedCall,
    artifacts::{ArtifactStore, ContractArtifact},
    model::{ContractRole, DeployedContract},
    outcome::Progress,
    traits::{ChainClient, Sleeper, TxReceipt},
};

/// Default bound on a confirmation wait.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Fixed delay used instead of confirmations when they cannot be observed.
pub const DEFAULT_CONFIRMATION_FALLBACK: Duration = Duration::from_secs(10);

/// How long to wait for confirmations, and what to do when that wait fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationPolicy {
    pub timeout: Duration,
    pub fallback_wait: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            fallback_wait: DEFAULT_CONFIRMATION_FALLBACK,
        }
    }
}

/// Collaborators and policies shared by the executors of one run.
pub struct ExecutionContext<'a, C, A, S> {
    pub client: &'a C,
    pub artifacts: &'a A,
    pub sleeper: &'a S,
    pub confirmation: ConfirmationPolicy,
    pub cancel: CancelSignal,
}

impl<C, A, S> ExecutionContext<'_, C, A, S>
where
    C: ChainClient,
    A: ArtifactStore,
    S: Sleeper,
{
    pub(crate) fn load_artifact(&self, identifier: &str) -> Result<ContractArtifact, DeployError> {
        self.artifacts
            .load(identifier)
            .map_err(|e| DeployError::Configuration(format!("{e:#}")))
    }

    /// Submit creation code and record the resulting contract in `progress`.
    pub(crate) async fn submit_deployment(
        &self,
        identifier: &str,
        role: ContractRole,
        creation_code: Bytes,
        progress: &mut Progress,
    ) -> Result<DeployedContract, DeployError> {
        let step = format!("deployment of {identifier}");
        tracing::info!(contract = identifier, %role, "Submitting deployment transaction...");

        let receipt = self
            .cancel
            .run(&step, self.client.deploy_contract(creation_code))
            .await?
            .map_err(|e| DeployError::chain(&step, e))?;

        if !receipt.success {
            return Err(DeployError::TransactionReverted {
                step,
                tx_hash: receipt.tx_hash,
            });
        }
        if receipt.address == Address::ZERO {
            return Err(DeployError::FatalInconsistency(format!(
                "{step} was mined but reported the zero address"
            )));
        }

        let deployed = DeployedContract {
            role,
            identifier: identifier.to_string(),
            address: receipt.address,
            transaction_hash: receipt.tx_hash,
        };
        progress.record(deployed.clone());

        tracing::info!(
            contract = identifier,
            %role,
            address = %receipt.address,
            tx_hash = ?receipt.tx_hash,
            "Contract deployed"
        );
        Ok(deployed)
    }

    /// Send a transaction and wait for it to be mined. Reverts are returned in the receipt.
    pub(crate) async fn transact(
        &self,
        step: &str,
        to: Address,
        calldata: Bytes,
    ) -> Result<TxReceipt, DeployError> {
        self.cancel
            .run(step, self.client.send_transaction(to, calldata))
            .await?
            .map_err(|e| DeployError::chain(step, e))
    }

    /// Execute prepared calls against `target` in order, stopping at the first revert.
    pub(crate) async fn run_calls(
        &self,
        target: Address,
        calls: &[PreparedCall],
    ) -> Result<(), DeployError> {
        for call in calls {
            let step = format!("call {} on {}", call.display, target);
            let receipt = self.transact(&step, target, call.calldata.clone()).await?;
            if !receipt.success {
                return Err(DeployError::TransactionReverted {
                    step,
                    tx_hash: receipt.tx_hash,
                });
            }
            tracing::info!(call = %call.display, %target, tx_hash = ?receipt.tx_hash, "Call executed");
        }
        Ok(())
    }

    /// Wait for `required` confirmations of `tx_hash`.
    ///
    /// The transaction is already mined when this is called, so a timeout or a client failure
    /// only downgrades to a fixed wait. Returns the number of confirmations observed.
    pub(crate) async fn await_confirmations(
        &self,
        tx_hash: Option<B256>,
        required: u64,
    ) -> Result<u64, DeployError> {
        if required == 0 {
            return Ok(0);
        }

        let Some(tx_hash) = tx_hash else {
            tracing::warn!(
                required,
                fallback = ?self.confirmation.fallback_wait,
                "Transaction hash unavailable, waiting a fixed delay instead of confirmations"
            );
            self.fallback_wait().await?;
            return Ok(0);
        };

        tracing::info!(%tx_hash, required, "Waiting for block confirmations...");
        let step = format!("{required} confirmations of {tx_hash}");
        let waited = self
            .cancel
            .run(
                &step,
                self.client
                    .wait_for_confirmations(tx_hash, required, self.confirmation.timeout),
            )
            .await?;

        match waited {
            Ok(true) => Ok(required),
            Ok(false) => {
                let timeout = DeployError::ConfirmationTimeout { tx_hash, required };
                tracing::warn!(
                    error = %timeout,
                    fallback = ?self.confirmation.fallback_wait,
                    "Confirmation wait timed out, falling back to a fixed delay"
                );
                self.fallback_wait().await?;
                Ok(0)
            }
            Err(e) => {
                tracing::warn!(
                    error = %format_args!("{e:#}"),
                    fallback = ?self.confirmation.fallback_wait,
                    "Confirmation wait failed, falling back to a fixed delay"
                );
                self.fallback_wait().await?;
                Ok(0)
            }
        }
    }

    async fn fallback_wait(&self) -> Result<(), DeployError> {
        self.cancel
            .run(
                "confirmation fallback wait",
                self.sleeper.sleep(self.confirmation.fallback_wait),
            )
            .await
    }
}

/// Creation code for scaffolding contracts whose constructor arguments are encoded directly.
pub(crate) fn scaffold_code(
    artifact: &ContractArtifact,
    encoded_args: Vec<u8>,
) -> Result<Bytes, DeployError> {
    if artifact.bytecode.is_empty() {
        return Err(DeployError::Configuration(format!(
            "artifact `{}` has no creation bytecode",
            artifact.identifier
        )));
    }
    let mut code = artifact.bytecode.to_vec();
    code.extend_from_slice(&encoded_args);
    Ok(code.into())
}
