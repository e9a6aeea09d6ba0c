//! Upgrade of an existing proxy to a new implementation.

use alloy_core::primitives::{Address, Bytes};
use alloy_sol_types::SolCall;

use crate::{
    DeployError, ExecutionOutcome,
    abi::{self, PreparedCall, PreparedDeployment},
    artifacts::ArtifactStore,
    model::{
        ContractRole, FunctionCall, ProxyDeployment, ProxyKind, ProxyState, UpgradeSpec,
    },
    outcome::Progress,
    slots::ProxyInspector,
    solidity::{IProxyAdmin, IUUPSUpgradeable, IUpgradeableBeacon},
    traits::{ChainClient, Sleeper, TxReceipt},
};

use super::ExecutionContext;

struct PreparedUpgrade {
    implementation: PreparedDeployment,
    migration: Option<PreparedCall>,
    calls: Vec<PreparedCall>,
}

/// Deploys a new implementation and atomically repoints an existing proxy at it.
///
/// The upgrade entrypoint depends on the proxy kind found on-chain: `ProxyAdmin.upgradeAndCall`
/// for transparent proxies, `upgradeToAndCall` on the proxy itself for UUPS, and
/// `UpgradeableBeacon.upgradeTo` for beacons. The migration, if any, runs in the same
/// transaction as the switch. Follow-up calls go through the proxy once the switch is checked.
pub struct UpgradeExecutor<'a, C, A, S> {
    ctx: &'a ExecutionContext<'a, C, A, S>,
}

impl<'a, C, A, S> UpgradeExecutor<'a, C, A, S>
where
    C: ChainClient,
    A: ArtifactStore,
    S: Sleeper,
{
    pub fn new(ctx: &'a ExecutionContext<'a, C, A, S>) -> Self {
        Self { ctx }
    }

    pub async fn upgrade(&self, spec: &UpgradeSpec) -> ExecutionOutcome<ProxyDeployment> {
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

    fn prepare(&self, spec: &UpgradeSpec) -> Result<PreparedUpgrade, DeployError> {
        let artifact = self.ctx.load_artifact(&spec.new_implementation)?;
        let implementation = abi::encode_deployment(&artifact, &[])?;
        let encode =
            |call: &FunctionCall| abi::encode_call(&spec.new_implementation, &artifact.abi, call);
        let migration = spec.migration.as_ref().map(encode).transpose()?;
        let calls = spec.calls.iter().map(encode).collect::<Result<Vec<_>, _>>()?;
        Ok(PreparedUpgrade {
            implementation,
            migration,
            calls,
        })
    }

    async fn execute(
        &self,
        spec: &UpgradeSpec,
        prepared: PreparedUpgrade,
        progress: &mut Progress,
    ) -> Result<ProxyState, DeployError> {
        let migration = prepared.migration.as_ref();
        let ctx = self.ctx;
        let inspector = ProxyInspector::new(ctx.client);
        let proxy = spec.proxy;

        let before = inspector
            .state(proxy)
            .await
            .map_err(|e| DeployError::chain(format!("state read of proxy {proxy}"), e))?;
        if before.implementation == Address::ZERO {
            return Err(DeployError::Configuration(format!(
                "{proxy} is not an ERC-1967 proxy: its implementation slot is empty"
            )));
        }
        if before.kind == ProxyKind::Beacon && migration.is_some() {
            return Err(DeployError::invalid_arguments(
                &spec.new_implementation,
                "beacon upgrades cannot run a migration in the same transaction",
            ));
        }

        tracing::info!(
            %proxy,
            kind = %before.kind,
            current = %before.implementation,
            new_implementation = %spec.new_implementation,
            "Upgrading proxy"
        );

        let implementation = ctx
            .submit_deployment(
                &spec.new_implementation,
                ContractRole::Implementation,
                prepared.implementation.creation_code,
                progress,
            )
            .await?
            .address;

        let (to, calldata) = upgrade_call(&before, implementation, migration)?;
        let step = match migration {
            Some(call) => format!("upgrade of proxy {proxy} to {implementation} with {}", call.display),
            None => format!("upgrade of proxy {proxy} to {implementation}"),
        };

        let receipt = match ctx.transact(&step, to, calldata).await {
            Ok(receipt) => receipt,
            Err(e @ DeployError::Cancelled { .. }) => return Err(e),
            Err(e) => {
                // The client lost track of the transaction; the proxy storage tells what happened.
                let after = self.current_implementation(proxy).await?;
                if after == before.implementation {
                    return Err(e);
                }
                if after != implementation {
                    return Err(DeployError::FatalInconsistency(format!(
                        "{step} failed ({e}) and proxy now points to unexpected implementation {after}"
                    )));
                }
                tracing::warn!(error = %e, %proxy, "Upgrade landed despite client failure");
                TxReceipt {
                    tx_hash: None,
                    success: true,
                }
            }
        };

        if !receipt.success {
            let after = self.current_implementation(proxy).await?;
            if after != before.implementation {
                return Err(DeployError::FatalInconsistency(format!(
                    "{step} reverted but the implementation changed from {} to {after}",
                    before.implementation
                )));
            }
            return Err(DeployError::UpgradeReverted {
                proxy,
                implementation,
                tx_hash: receipt.tx_hash,
            });
        }

        ctx.await_confirmations(receipt.tx_hash, spec.confirmations)
            .await?;

        let after = inspector
            .state(proxy)
            .await
            .map_err(|e| DeployError::chain(format!("state read of proxy {proxy}"), e))?;
        if after.implementation != implementation {
            return Err(DeployError::FatalInconsistency(format!(
                "{step} succeeded but the proxy points to {}",
                after.implementation
            )));
        }

        ctx.run_calls(proxy, &prepared.calls).await?;

        tracing::info!(
            %proxy,
            previous = %before.implementation,
            implementation = %after.implementation,
            tx_hash = ?receipt.tx_hash,
            "Proxy upgraded"
        );
        Ok(after)
    }

    async fn current_implementation(&self, proxy: Address) -> Result<Address, DeployError> {
        ProxyInspector::new(self.ctx.client)
            .implementation(proxy)
            .await
            .map_err(|e| DeployError::chain(format!("implementation read of proxy {proxy}"), e))
    }
}

/// Target and calldata of the upgrade transaction for the proxy's kind.
fn upgrade_call(
    state: &ProxyState,
    implementation: Address,
    migration: Option<&PreparedCall>,
) -> Result<(Address, Bytes), DeployError> {
    let data = migration.map(|m| m.calldata.clone()).unwrap_or_default();

    let (to, calldata) = match state.kind {
        ProxyKind::Transparent => {
            let admin = state.admin.ok_or_else(|| {
                DeployError::FatalInconsistency(format!(
                    "transparent proxy {} has no admin",
                    state.proxy
                ))
            })?;
            let calldata = IProxyAdmin::upgradeAndCallCall {
                proxy: state.proxy,
                implementation,
                data,
            }
            .abi_encode();
            (admin, calldata)
        }
        ProxyKind::Uups => {
            let calldata = IUUPSUpgradeable::upgradeToAndCallCall {
                newImplementation: implementation,
                data,
            }
            .abi_encode();
            (state.proxy, calldata)
        }
        ProxyKind::Beacon => {
            let beacon = state.beacon.ok_or_else(|| {
                DeployError::FatalInconsistency(format!(
                    "beacon proxy {} has no beacon",
                    state.proxy
                ))
            })?;
            let calldata = IUpgradeableBeacon::upgradeToCall {
                newImplementation: implementation,
            }
            .abi_encode();
            (beacon, calldata)
        }
    };

    Ok((to, calldata.into()))
}
