//! Chain client contract.

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, B256, Bytes};
use anyhow::Result;

/// Receipt of a contract-creation transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployReceipt {
    pub address: Address,
    /// Not every client can report the hash of the creation transaction.
    pub tx_hash: Option<B256>,
    /// False when the creation transaction was mined but reverted.
    pub success: bool,
}

/// Receipt of a mined call transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: Option<B256>,
    pub success: bool,
}

/// Capabilities required from the external chain client.
///
/// Implementations own signing and transport. Every method suspends until the node has
/// answered; `deploy_contract` and `send_transaction` return once the transaction is mined.
pub trait ChainClient: Send + Sync {
    /// Account that sends transactions.
    fn sender(&self) -> Address;

    /// Submit creation code (bytecode followed by encoded constructor arguments).
    fn deploy_contract(&self, creation_code: Bytes)
    -> impl Future<Output = Result<DeployReceipt>> + Send;

    /// Submit a state-changing call.
    fn send_transaction(
        &self,
        to: Address,
        calldata: Bytes,
    ) -> impl Future<Output = Result<TxReceipt>> + Send;

    /// Execute a read-only call against the latest block.
    fn call(&self, to: Address, calldata: Bytes) -> impl Future<Output = Result<Bytes>> + Send;

    /// Wait until `tx_hash` has `confirmations` confirmations.
    ///
    /// Returns `Ok(false)` when `timeout` elapses first.
    fn wait_for_confirmations(
        &self,
        tx_hash: B256,
        confirmations: u64,
        timeout: Duration,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Read a raw storage slot.
    fn storage_at(&self, address: Address, slot: B256) -> impl Future<Output = Result<B256>> + Send;

    /// Read the runtime bytecode deployed at `address`.
    fn code_at(&self, address: Address) -> impl Future<Output = Result<Bytes>> + Send;
}
