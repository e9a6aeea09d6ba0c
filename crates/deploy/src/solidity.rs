//! Solidity interfaces of the proxy scaffolding called during deployments and upgrades.

use alloy_sol_types::sol;

sol! {
    /// OpenZeppelin v5 `ProxyAdmin`, owner of a transparent proxy.
    interface IProxyAdmin {
        function upgradeAndCall(address proxy, address implementation, bytes memory data) external payable;
    }

    /// ERC-1822 upgrade entrypoint exposed by UUPS implementations.
    interface IUUPSUpgradeable {
        function upgradeToAndCall(address newImplementation, bytes memory data) external payable;
    }

    /// OpenZeppelin v5 `UpgradeableBeacon`.
    interface IUpgradeableBeacon {
        function implementation() external view returns (address);
        function upgradeTo(address newImplementation) external;
    }
}
