//! Deployment of a single immutable contract.

use crate::{
    DeployError, ExecutionOutcome,
    abi::{self, PreparedCall, PreparedDeployment},
    artifacts::ArtifactStore,
    model::{ContractRole, DeploymentResult, DeploymentSpec},
    outcome::Progress,
    traits::{ChainClient, Sleeper},
};

use super::ExecutionContext;

/// Deploys one contract, waits for confirmations, then runs its post-deploy calls.
pub struct DeploymentExecutor<'a, C, A, S> {
    ctx: &'a ExecutionContext<'a, C, A, S>,
}

impl<'a, C, A, S> DeploymentExecutor<'a, C, A, S>
where
    C: ChainClient,
    A: ArtifactStore,
    S: Sleeper,
{
    pub fn new(ctx: &'a ExecutionContext<'a, C, A, S>) -> Self {
        Self { ctx }
    }

    /// Deploy `spec.contract`.
    ///
    /// Artifact and argument problems fail before anything is submitted. A timed-out
    /// confirmation wait is not an error: the result then reports zero confirmations.
    pub async fn deploy(&self, spec: &DeploymentSpec) -> ExecutionOutcome<DeploymentResult> {
        let mut progress = Progress::default();

        let (prepared, calls) = match self.prepare(spec) {
            Ok(prepared) => prepared,
            Err(e) => return progress.fail(e),
        };

        match self.execute(spec, prepared, &calls, &mut progress).await {
            Ok(result) => ExecutionOutcome::Success(result),
            Err(e) => progress.fail(e),
        }
    }

    fn prepare(
        &self,
        spec: &DeploymentSpec,
    ) -> Result<(PreparedDeployment, Vec<PreparedCall>), DeployError> {
        let artifact = self.ctx.load_artifact(&spec.contract)?;
        let prepared = abi::encode_deployment(&artifact, &spec.constructor_args)?;
        let calls = spec
            .calls
            .iter()
            .map(|call| abi::encode_call(&spec.contract, &artifact.abi, call))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((prepared, calls))
    }

    async fn execute(
        &self,
        spec: &DeploymentSpec,
        prepared: PreparedDeployment,
        calls: &[PreparedCall],
        progress: &mut Progress,
    ) -> Result<DeploymentResult, DeployError> {
        let deployed = self
            .ctx
            .submit_deployment(
                &spec.contract,
                ContractRole::Contract,
                prepared.creation_code,
                progress,
            )
            .await?;

        let block_confirmations = self
            .ctx
            .await_confirmations(deployed.transaction_hash, spec.confirmations)
            .await?;

        self.ctx.run_calls(deployed.address, calls).await?;

        Ok(DeploymentResult {
            contract: spec.contract.clone(),
            address: deployed.address,
            transaction_hash: deployed.transaction_hash,
            block_confirmations,
            constructor_args: prepared.constructor_args,
        })
    }
}
