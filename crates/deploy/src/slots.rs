//! ERC-1967 storage slots and a read-through accessor for proxy state.
//!
//! Proxy, admin and implementation addresses are always read from the proxy's storage. Nothing
//! here caches: an upgrade can change them at any time.

use alloy_core::primitives::{Address, B256, Bytes, b256};
use alloy_sol_types::SolCall;
use anyhow::{Context, Result};

use crate::{
    model::{ProxyKind, ProxyState},
    solidity::IUpgradeableBeacon,
    traits::ChainClient,
};

/// `bytes32(uint256(keccak256("eip1967.proxy.implementation")) - 1)`
pub const IMPLEMENTATION_SLOT: B256 =
    b256!("360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");

/// `bytes32(uint256(keccak256("eip1967.proxy.admin")) - 1)`
pub const ADMIN_SLOT: B256 =
    b256!("b53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103");

/// `bytes32(uint256(keccak256("eip1967.proxy.beacon")) - 1)`
pub const BEACON_SLOT: B256 =
    b256!("a3f0ad74e5423aebfd80d3ef4346578335a9a72aeaee59ff6cb3582b35133d50");

/// Reads proxy state from chain storage on every call.
pub struct ProxyInspector<'a, C> {
    client: &'a C,
}

impl<'a, C: ChainClient> ProxyInspector<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    async fn slot_address(&self, proxy: Address, slot: B256) -> Result<Option<Address>> {
        let word = self
            .client
            .storage_at(proxy, slot)
            .await
            .with_context(|| format!("Failed to read storage slot {slot} of {proxy}"))?;
        Ok(non_zero(Address::from_word(word)))
    }

    pub async fn admin(&self, proxy: Address) -> Result<Option<Address>> {
        self.slot_address(proxy, ADMIN_SLOT).await
    }

    pub async fn beacon(&self, proxy: Address) -> Result<Option<Address>> {
        self.slot_address(proxy, BEACON_SLOT).await
    }

    /// Implementation the beacon currently points to.
    pub async fn beacon_implementation(&self, beacon: Address) -> Result<Address> {
        let calldata = Bytes::from(IUpgradeableBeacon::implementationCall {}.abi_encode());
        let output = self
            .client
            .call(beacon, calldata)
            .await
            .with_context(|| format!("Failed to call implementation() on beacon {beacon}"))?;
        let decoded = IUpgradeableBeacon::implementationCall::abi_decode_returns(&output, true)
            .context("Failed to decode beacon implementation() result")?;
        Ok(decoded._0)
    }

    /// Implementation the proxy currently delegates to, resolving beacons.
    pub async fn implementation(&self, proxy: Address) -> Result<Address> {
        if let Some(beacon) = self.beacon(proxy).await? {
            return self.beacon_implementation(beacon).await;
        }
        Ok(self
            .slot_address(proxy, IMPLEMENTATION_SLOT)
            .await?
            .unwrap_or(Address::ZERO))
    }

    /// Full proxy state. The kind is inferred from which slots are populated.
    pub async fn state(&self, proxy: Address) -> Result<ProxyState> {
        let beacon = self.beacon(proxy).await?;
        let admin = self.admin(proxy).await?;

        let (kind, implementation) = match beacon {
            Some(beacon) => (ProxyKind::Beacon, self.beacon_implementation(beacon).await?),
            None => {
                let implementation = self
                    .slot_address(proxy, IMPLEMENTATION_SLOT)
                    .await?
                    .unwrap_or(Address::ZERO);
                let kind = if admin.is_some() {
                    ProxyKind::Transparent
                } else {
                    ProxyKind::Uups
                };
                (kind, implementation)
            }
        };

        Ok(ProxyState {
            kind,
            proxy,
            implementation,
            admin,
            beacon,
        })
    }
}

fn non_zero(address: Address) -> Option<Address> {
    (address != Address::ZERO).then_some(address)
}
