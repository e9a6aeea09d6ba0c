//! Upgradeable deployment: implementation, proxy scaffolding, one-time initialization.

use alloy_core::primitives::{Address, B256, Bytes};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

use crate::{
    DeployError, ExecutionOutcome,
    abi::{self, PreparedCall, PreparedDeployment},
    artifacts::{ArtifactStore, ContractArtifact},
    model::{
        ContractRole, FunctionCall, ProxyDeployment, ProxyDeploymentSpec, ProxyKind, ProxyState,
    },
    outcome::Progress,
    slots::ProxyInspector,
    traits::{ChainClient, Sleeper},
};

use super::{ExecutionContext, scaffold_code};

/// Artifact identifiers of the proxy scaffolding contracts.
///
/// Defaults to the OpenZeppelin v5 contract names, which must be compiled into the same
/// artifacts directory as the implementations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyContracts {
    /// `TransparentUpgradeableProxy(logic, initialOwner, data)`, deploys its own `ProxyAdmin`.
    pub transparent: String,
    /// `ERC1967Proxy(implementation, data)`, used for UUPS.
    pub erc1967: String,
    /// `UpgradeableBeacon(implementation, initialOwner)`
    pub beacon: String,
    /// `BeaconProxy(beacon, data)`
    pub beacon_proxy: String,
}

impl Default for ProxyContracts {
    fn default() -> Self {
        Self {
            transparent: "TransparentUpgradeableProxy".to_string(),
            erc1967: "ERC1967Proxy".to_string(),
            beacon: "UpgradeableBeacon".to_string(),
            beacon_proxy: "BeaconProxy".to_string(),
        }
    }
}

enum Scaffolding {
    Transparent(ContractArtifact),
    Uups(ContractArtifact),
    Beacon {
        beacon: ContractArtifact,
        proxy: ContractArtifact,
    },
}

struct PreparedProxy {
    implementation: PreparedDeployment,
    initializer: PreparedCall,
    calls: Vec<PreparedCall>,
    scaffolding: Scaffolding,
}

/// Deploys an implementation behind a fresh proxy and initializes it exactly once.
///
/// The proxy is created with empty initialization data and the initializer is sent as its own
/// transaction, so a failing initializer leaves an identifiable (uninitialized) proxy behind
/// instead of reverting the proxy creation.
pub struct ProxyDeploymentExecutor<'a, C, A, S> {
    ctx: &'a ExecutionContext<'a, C, A, S>,
    contracts: &'a ProxyContracts,
}

impl<'a, C, A, S> ProxyDeploymentExecutor<'a, C, A, S>
where
    C: ChainClient,
    A: ArtifactStore,
    S: Sleeper,
{
    pub fn new(ctx: &'a ExecutionContext<'a, C, A, S>, contracts: &'a ProxyContracts) -> Self {
        Self { ctx, contracts }
    }

    pub async fn deploy_proxy(
        &self,
        spec: &ProxyDeploymentSpec,
    ) -> ExecutionOutcome<ProxyDeployment> {
        let mut progress = Progress::default();

        let prepared = match self.prepare(spec) {
            Ok(prepared) => prepared,
            Err(e) => return progress.fail(e),
        };

        match self.execute(spec, prepared, &mut progress).await {
            Ok(state) => ExecutionOutcome::Success(ProxyDeployment {
                state,
                deployed: progress.into_deployed(),
            }),
            Err(e) => progress.fail(e),
        }
    }

    fn prepare(&self, spec: &ProxyDeploymentSpec) -> Result<PreparedProxy, DeployError> {
        let artifact = self.ctx.load_artifact(&spec.implementation)?;
        // Upgradeable implementations take their parameters through the initializer.
        let implementation = abi::encode_deployment(&artifact, &[])?;

        let initializer = FunctionCall::new(spec.initializer.clone(), spec.initializer_args.clone());
        let initializer = abi::encode_call(&spec.implementation, &artifact.abi, &initializer)?;
        let calls = spec
            .calls
            .iter()
            .map(|call| abi::encode_call(&spec.implementation, &artifact.abi, call))
            .collect::<Result<Vec<_>, _>>()?;

        let scaffolding = match spec.kind {
            ProxyKind::Transparent => {
                Scaffolding::Transparent(self.ctx.load_artifact(&self.contracts.transparent)?)
            }
            ProxyKind::Uups => Scaffolding::Uups(self.ctx.load_artifact(&self.contracts.erc1967)?),
            ProxyKind::Beacon => Scaffolding::Beacon {
                beacon: self.ctx.load_artifact(&self.contracts.beacon)?,
                proxy: self.ctx.load_artifact(&self.contracts.beacon_proxy)?,
            },
        };

        Ok(PreparedProxy {
            implementation,
            initializer,
            calls,
            scaffolding,
        })
    }

    async fn execute(
        &self,
        spec: &ProxyDeploymentSpec,
        prepared: PreparedProxy,
        progress: &mut Progress,
    ) -> Result<ProxyState, DeployError> {
        let ctx = self.ctx;
        let owner = spec.owner.unwrap_or_else(|| ctx.client.sender());

        let implementation = ctx
            .submit_deployment(
                &spec.implementation,
                ContractRole::Implementation,
                prepared.implementation.creation_code,
                progress,
            )
            .await?
            .address;

        let (proxy, beacon) = match &prepared.scaffolding {
            Scaffolding::Transparent(artifact) => {
                let args = (implementation, owner, Bytes::new()).abi_encode_params();
                let proxy = ctx
                    .submit_deployment(
                        &artifact.identifier,
                        ContractRole::Proxy,
                        scaffold_code(artifact, args)?,
                        progress,
                    )
                    .await?;
                (proxy.address, None)
            }
            Scaffolding::Uups(artifact) => {
                let args = (implementation, Bytes::new()).abi_encode_params();
                let proxy = ctx
                    .submit_deployment(
                        &artifact.identifier,
                        ContractRole::Proxy,
                        scaffold_code(artifact, args)?,
                        progress,
                    )
                    .await?;
                (proxy.address, None)
            }
            Scaffolding::Beacon { beacon, proxy } => {
                let args = (implementation, owner).abi_encode_params();
                let beacon_address = ctx
                    .submit_deployment(
                        &beacon.identifier,
                        ContractRole::Beacon,
                        scaffold_code(beacon, args)?,
                        progress,
                    )
                    .await?
                    .address;

                let args = (beacon_address, Bytes::new()).abi_encode_params();
                let proxy = ctx
                    .submit_deployment(
                        &proxy.identifier,
                        ContractRole::Proxy,
                        scaffold_code(proxy, args)?,
                        progress,
                    )
                    .await?;
                (proxy.address, Some(beacon_address))
            }
        };

        let init_tx = self.initialize(spec, proxy, &prepared.initializer).await?;
        ctx.await_confirmations(init_tx, spec.confirmations).await?;

        let state = self.read_back(spec.kind, proxy, implementation, beacon).await?;

        ctx.run_calls(proxy, &prepared.calls).await?;

        tracing::info!(
            kind = %state.kind,
            proxy = %state.proxy,
            implementation = %state.implementation,
            admin = ?state.admin,
            beacon = ?state.beacon,
            "Proxy deployed and initialized"
        );
        Ok(state)
    }

    /// Call the initializer through the proxy. Never retried: a second attempt would hit the
    /// already-initialized guard at best.
    async fn initialize(
        &self,
        spec: &ProxyDeploymentSpec,
        proxy: Address,
        initializer: &PreparedCall,
    ) -> Result<Option<B256>, DeployError> {
        let step = format!("initializer {} on proxy {proxy}", initializer.display);
        tracing::info!(%proxy, initializer = %initializer.display, "Initializing proxy...");

        let failed = |reason: String| DeployError::InitializationFailed {
            proxy,
            initializer: spec.initializer.clone(),
            reason,
        };

        let receipt = match self
            .ctx
            .transact(&step, proxy, initializer.calldata.clone())
            .await
        {
            Ok(receipt) => receipt,
            Err(DeployError::Chain { error, .. }) => return Err(failed(format!("{error:#}"))),
            Err(e) => return Err(e),
        };

        if !receipt.success {
            let reason = match receipt.tx_hash {
                Some(hash) => format!("transaction {hash} reverted"),
                None => "transaction reverted".to_string(),
            };
            return Err(failed(reason));
        }
        Ok(receipt.tx_hash)
    }

    /// Read the proxy back from chain storage and check it matches what was just deployed.
    async fn read_back(
        &self,
        kind: ProxyKind,
        proxy: Address,
        implementation: Address,
        beacon: Option<Address>,
    ) -> Result<ProxyState, DeployError> {
        let client = self.ctx.client;
        let state = ProxyInspector::new(client)
            .state(proxy)
            .await
            .map_err(|e| DeployError::chain(format!("read-back of proxy {proxy}"), e))?;

        if state.implementation != implementation {
            return Err(DeployError::FatalInconsistency(format!(
                "proxy {proxy} reports implementation {} but {implementation} was deployed",
                state.implementation
            )));
        }
        if state.kind != kind {
            return Err(DeployError::FatalInconsistency(format!(
                "proxy {proxy} was deployed as {kind} but its storage describes a {} proxy",
                state.kind
            )));
        }
        if kind == ProxyKind::Beacon && state.beacon != beacon {
            return Err(DeployError::FatalInconsistency(format!(
                "proxy {proxy} reports beacon {:?}, expected {beacon:?}",
                state.beacon
            )));
        }

        let code = client
            .code_at(implementation)
            .await
            .map_err(|e| DeployError::chain(format!("code read of {implementation}"), e))?;
        if code.is_empty() {
            return Err(DeployError::FatalInconsistency(format!(
                "no bytecode at implementation {implementation}"
            )));
        }

        Ok(state)
    }
}
