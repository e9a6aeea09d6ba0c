//! Composition of executors, verification and read-back probes into a single run.

use std::{process::ExitCode, time::Duration};

use alloy_core::primitives::{Address, B256, Bytes};
use chrono::{DateTime, Utc};
use derive_more::{Deref, From};
use serde::{Deserialize, Serialize};

use crate::{
    CancelSignal, DeployError, ExecutionOutcome,
    abi::{self, PreparedCall},
    artifacts::ArtifactStore,
    env::{EnvSource, resolve_all},
    executor::{
        ConfirmationPolicy, DeploymentExecutor, ExecutionContext, ProxyContracts,
        ProxyDeploymentExecutor, UpgradeExecutor,
    },
    model::{
        ContractRole, DeployedContract, DeploymentSpec, FunctionCall, ProxyDeployment,
        ProxyDeploymentSpec, ProxyState, UpgradeSpec,
    },
    traits::{
        ChainClient, NoVerifier, Sleeper, TokioSleeper, VerificationRequest, VerificationService,
    },
    verify::{RetryPolicy, VerificationReport, VerificationRetrier, VerificationStatus},
};

/// Default wait before verifying when no confirmations were requested.
pub const DEFAULT_INDEXING_DELAY: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DeploymentKind {
    Plain,
    Proxy,
    Upgrade,
}

#[derive(Debug, Clone, PartialEq, Eq, From)]
pub enum Deployment {
    Plain(DeploymentSpec),
    Proxy(ProxyDeploymentSpec),
    Upgrade(UpgradeSpec),
}

impl Deployment {
    pub fn kind(&self) -> DeploymentKind {
        match self {
            Self::Plain(_) => DeploymentKind::Plain,
            Self::Proxy(_) => DeploymentKind::Proxy,
            Self::Upgrade(_) => DeploymentKind::Upgrade,
        }
    }

    /// Artifact whose ABI describes the deployed code: the contract itself, or the
    /// implementation behind a proxy.
    pub fn contract(&self) -> &str {
        match self {
            Self::Plain(spec) => &spec.contract,
            Self::Proxy(spec) => &spec.implementation,
            Self::Upgrade(spec) => &spec.new_implementation,
        }
    }

    fn confirmations(&self) -> u64 {
        match self {
            Self::Plain(spec) => spec.confirmations,
            Self::Proxy(spec) => spec.confirmations,
            Self::Upgrade(spec) => spec.confirmations,
        }
    }
}

/// One orchestration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Network name, used for records and the ledger file.
    pub network: String,
    pub deployment: Deployment,
    /// Verify the deployed code on the explorer once the deployment succeeded.
    pub verify: bool,
    /// Read-only calls evaluated against the deployed contract (through the proxy, if any).
    pub reads: Vec<FunctionCall>,
}

impl RunRequest {
    pub fn new(network: impl Into<String>, deployment: impl Into<Deployment>) -> Self {
        Self {
            network: network.into(),
            deployment: deployment.into(),
            verify: false,
            reads: Vec::new(),
        }
    }

    pub fn plain(network: impl Into<String>, spec: DeploymentSpec) -> Self {
        Self::new(network, spec)
    }

    pub fn proxy(network: impl Into<String>, spec: ProxyDeploymentSpec) -> Self {
        Self::new(network, spec)
    }

    pub fn upgrade(network: impl Into<String>, spec: UpgradeSpec) -> Self {
        Self::new(network, spec)
    }

    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_read(mut self, call: FunctionCall) -> Self {
        self.reads.push(call);
        self
    }

    /// Substitute `${NAME}` placeholders in every argument of the request.
    ///
    /// Must run before [`Orchestrator::run`]; arguments are used verbatim afterwards.
    pub fn resolve_placeholders(&mut self, env: &impl EnvSource) -> Result<(), DeployError> {
        let calls = match &mut self.deployment {
            Deployment::Plain(spec) => {
                resolve_all(&mut spec.constructor_args, env)?;
                spec.calls.iter_mut().collect::<Vec<_>>()
            }
            Deployment::Proxy(spec) => {
                resolve_all(&mut spec.initializer_args, env)?;
                spec.calls.iter_mut().collect()
            }
            Deployment::Upgrade(spec) => {
                spec.migration.iter_mut().chain(&mut spec.calls).collect()
            }
        };
        for call in calls.into_iter().chain(self.reads.iter_mut()) {
            resolve_all(&mut call.args, env)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub confirmation: ConfirmationPolicy,
    pub retry: RetryPolicy,
    /// Wait before the first verification attempt when the run did not wait for confirmations.
    pub indexing_delay: Duration,
    pub proxy_contracts: ProxyContracts,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            confirmation: ConfirmationPolicy::default(),
            retry: RetryPolicy::default(),
            indexing_delay: DEFAULT_INDEXING_DELAY,
            proxy_contracts: ProxyContracts::default(),
        }
    }
}

/// Result of a read-only probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadResult {
    pub call: String,
    pub values: Vec<String>,
    pub error: Option<String>,
}

/// Structured record of what a run did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeRecord {
    pub network: String,
    pub kind: DeploymentKind,
    pub contract: String,
    /// Address users interact with: the contract, or the proxy.
    pub address: Option<Address>,
    pub transaction_hash: Option<B256>,
    pub block_confirmations: Option<u64>,
    pub proxy: Option<ProxyState>,
    /// Every contract known to be on-chain, including those left by a failed run.
    pub deployed: Vec<DeployedContract>,
    pub reads: Vec<ReadResult>,
    pub verification: Option<VerificationReport>,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl OutcomeRecord {
    fn new(request: &RunRequest) -> Self {
        Self {
            network: request.network.clone(),
            kind: request.deployment.kind(),
            contract: request.deployment.contract().to_string(),
            address: None,
            transaction_hash: None,
            block_confirmations: None,
            proxy: None,
            deployed: Vec::new(),
            reads: Vec::new(),
            verification: None,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Process-level result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ExitSignal {
    Success,
    Failure,
}

impl ExitSignal {
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
        }
    }
}

impl From<ExitSignal> for ExitCode {
    fn from(signal: ExitSignal) -> Self {
        ExitCode::from(signal.code())
    }
}

#[derive(Debug, Clone, Deref)]
pub struct RunReport {
    #[deref]
    pub record: OutcomeRecord,
    pub exit: ExitSignal,
}

/// Contract that verification and probes target after a successful step.
struct Deployed {
    /// Address calls go to.
    address: Address,
    /// Contract whose source is verified.
    verify: VerificationRequest,
}

/// Runs one deployment kind end to end and decides the exit signal.
///
/// Deployment failures and inconsistencies yield [`ExitSignal::Failure`]. Verification never
/// does: an exhausted or rejected verification is reported in the record only.
pub struct Orchestrator<C, A, V = NoVerifier, S = TokioSleeper> {
    client: C,
    artifacts: A,
    verifier: V,
    sleeper: S,
    settings: OrchestratorSettings,
}

impl<C, A> Orchestrator<C, A> {
    pub fn new(client: C, artifacts: A) -> Self {
        Self {
            client,
            artifacts,
            verifier: NoVerifier,
            sleeper: TokioSleeper,
            settings: OrchestratorSettings::default(),
        }
    }
}

impl<C, A, V, S> Orchestrator<C, A, V, S> {
    pub fn with_verifier<V2>(self, verifier: V2) -> Orchestrator<C, A, V2, S> {
        Orchestrator {
            client: self.client,
            artifacts: self.artifacts,
            verifier,
            sleeper: self.sleeper,
            settings: self.settings,
        }
    }

    pub fn with_sleeper<S2>(self, sleeper: S2) -> Orchestrator<C, A, V, S2> {
        Orchestrator {
            client: self.client,
            artifacts: self.artifacts,
            verifier: self.verifier,
            sleeper,
            settings: self.settings,
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }
}

impl<C, A, V, S> Orchestrator<C, A, V, S>
where
    C: ChainClient,
    A: ArtifactStore,
    V: VerificationService,
    S: Sleeper,
{
    pub async fn run(&self, request: RunRequest, cancel: CancelSignal) -> RunReport {
        let mut record = OutcomeRecord::new(&request);
        tracing::info!(
            network = %request.network,
            kind = %record.kind,
            contract = %record.contract,
            verify = request.verify,
            "Starting deployment run"
        );

        let ctx = ExecutionContext {
            client: &self.client,
            artifacts: &self.artifacts,
            sleeper: &self.sleeper,
            confirmation: self.settings.confirmation,
            cancel: cancel.clone(),
        };

        let reads = match self.prepare_reads(&ctx, &request) {
            Ok(reads) => reads,
            Err(e) => return fail(record, Vec::new(), e),
        };

        let deployed = match &request.deployment {
            Deployment::Plain(spec) => {
                match DeploymentExecutor::new(&ctx).deploy(spec).await {
                    ExecutionOutcome::Success(result) => {
                        record.address = Some(result.address);
                        record.transaction_hash = result.transaction_hash;
                        record.block_confirmations = Some(result.block_confirmations);
                        record.deployed.push(DeployedContract {
                            role: ContractRole::Contract,
                            identifier: spec.contract.clone(),
                            address: result.address,
                            transaction_hash: result.transaction_hash,
                        });
                        Deployed {
                            address: result.address,
                            verify: VerificationRequest {
                                address: result.address,
                                contract: spec.contract.clone(),
                                constructor_args: spec.constructor_args.clone(),
                                encoded_args: result.constructor_args,
                            },
                        }
                    }
                    ExecutionOutcome::Partial { deployed, error } => {
                        return fail(record, deployed, error);
                    }
                    ExecutionOutcome::Failed(error) => return fail(record, Vec::new(), error),
                }
            }
            Deployment::Proxy(spec) => {
                let executor =
                    ProxyDeploymentExecutor::new(&ctx, &self.settings.proxy_contracts);
                match executor.deploy_proxy(spec).await {
                    ExecutionOutcome::Success(deployment) => {
                        let target = proxy_target(&deployment.state, &spec.implementation);
                        record_proxy(&mut record, deployment);
                        target
                    }
                    ExecutionOutcome::Partial { deployed, error } => {
                        return fail(record, deployed, error);
                    }
                    ExecutionOutcome::Failed(error) => return fail(record, Vec::new(), error),
                }
            }
            Deployment::Upgrade(spec) => {
                // The proxy stays the contract users reach, whatever happens to the upgrade.
                record.address = Some(spec.proxy);
                match UpgradeExecutor::new(&ctx).upgrade(spec).await {
                    ExecutionOutcome::Success(deployment) => {
                        let target = proxy_target(&deployment.state, &spec.new_implementation);
                        record_proxy(&mut record, deployment);
                        target
                    }
                    ExecutionOutcome::Partial { deployed, error } => {
                        return fail(record, deployed, error);
                    }
                    ExecutionOutcome::Failed(error) => return fail(record, Vec::new(), error),
                }
            }
        };

        record.reads = self.run_reads(&cancel, deployed.address, &reads).await;

        if request.verify {
            record.verification = Some(
                self.verify(&deployed.verify, request.deployment.confirmations(), cancel)
                    .await,
            );
        }

        tracing::info!(
            kind = %record.kind,
            contract = %record.contract,
            address = ?record.address,
            verification = ?record.verification.as_ref().map(|v| v.status.to_string()),
            "Deployment run succeeded"
        );
        RunReport {
            record,
            exit: ExitSignal::Success,
        }
    }

    /// Encode read probes up front so a typo fails before anything is deployed.
    fn prepare_reads(
        &self,
        ctx: &ExecutionContext<'_, C, A, S>,
        request: &RunRequest,
    ) -> Result<Vec<PreparedCall>, DeployError> {
        if request.reads.is_empty() {
            return Ok(Vec::new());
        }
        let contract = request.deployment.contract();
        let artifact = ctx.load_artifact(contract)?;
        request
            .reads
            .iter()
            .map(|call| abi::encode_call(contract, &artifact.abi, call))
            .collect()
    }

    async fn run_reads(
        &self,
        cancel: &CancelSignal,
        target: Address,
        reads: &[PreparedCall],
    ) -> Vec<ReadResult> {
        let mut results = Vec::with_capacity(reads.len());
        for read in reads {
            let step = format!("read {} on {target}", read.display);
            let output = match cancel.run(&step, self.client.call(target, read.calldata.clone())).await {
                Ok(Ok(data)) => abi::decode_output(read, &data),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(e.into()),
            };

            let result = match output {
                Ok(values) => {
                    tracing::info!(call = %read.display, %target, values = ?values, "Read-back");
                    ReadResult {
                        call: read.display.clone(),
                        values,
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::warn!(call = %read.display, %target, error = %format_args!("{e:#}"), "Read-back failed");
                    ReadResult {
                        call: read.display.clone(),
                        values: Vec::new(),
                        error: Some(format!("{e:#}")),
                    }
                }
            };
            results.push(result);
        }
        results
    }

    async fn verify(
        &self,
        request: &VerificationRequest,
        confirmations: u64,
        cancel: CancelSignal,
    ) -> VerificationReport {
        let delay = self.settings.indexing_delay;
        if confirmations == 0 && !delay.is_zero() {
            tracing::info!(?delay, "Waiting for the explorer to index the deployment...");
            if cancel
                .run("explorer indexing delay", self.sleeper.sleep(delay))
                .await
                .is_err()
            {
                return VerificationReport {
                    status: VerificationStatus::Cancelled,
                    attempts: Vec::new(),
                };
            }
        }

        VerificationRetrier::new(&self.verifier, &self.sleeper, cancel)
            .verify_with_retry(request, &self.settings.retry)
            .await
    }
}

fn record_proxy(record: &mut OutcomeRecord, deployment: ProxyDeployment) {
    let ProxyDeployment { state, deployed } = deployment;
    record.address = Some(state.proxy);
    record.proxy = Some(state);
    record.deployed = deployed;
}

/// Proxied runs verify the implementation and probe through the proxy.
fn proxy_target(state: &ProxyState, implementation: &str) -> Deployed {
    Deployed {
        address: state.proxy,
        verify: VerificationRequest {
            address: state.implementation,
            contract: implementation.to_string(),
            constructor_args: Vec::new(),
            encoded_args: Bytes::new(),
        },
    }
}

fn fail(mut record: OutcomeRecord, deployed: Vec<DeployedContract>, error: DeployError) -> RunReport {
    if deployed.is_empty() {
        tracing::error!(
            kind = %record.kind,
            contract = %record.contract,
            preflight = error.is_preflight(),
            error = %error,
            "Deployment run failed"
        );
    } else {
        tracing::error!(
            kind = %record.kind,
            contract = %record.contract,
            deployed = ?deployed.iter().map(|c| c.address).collect::<Vec<_>>(),
            error = %error,
            "Deployment run failed after contracts reached the chain"
        );
    }

    // Upgrades preset the proxy they target; other runs point at whatever reached the chain.
    let proxy = deployed.iter().rev().find(|c| c.role == ContractRole::Proxy);
    record.address = proxy
        .map(|c| c.address)
        .or(record.address)
        .or_else(|| deployed.first().map(|c| c.address));
    record.deployed = deployed;
    record.error = Some(error.to_string());

    RunReport {
        record,
        exit: ExitSignal::Failure,
    }
}
