//! In-memory chain and explorer used by the integration tests.
//!
//! Contracts are identified by a 4-byte tag at the start of their creation code. The chain
//! simulates `Hello`, `CounterV1`/`CounterV2` and the OpenZeppelin proxy scaffolding closely
//! enough to exercise initialization, upgrades, migrations and reverts.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use alloy_core::{
    json_abi::JsonAbi,
    primitives::{Address, B256, Bytes, U256},
};
use alloy_sol_types::{SolCall, SolValue, sol};
use anyhow::Result;
use hatchery_deploy::{
    CancelHandle, ChainClient, ContractArtifact, DeployReceipt, ServiceVerdict, Sleeper, TxReceipt,
    VerificationRejected, VerificationRequest, VerificationService,
    slots::{ADMIN_SLOT, BEACON_SLOT, IMPLEMENTATION_SLOT},
};

pub const DEPLOYER: Address = Address::repeat_byte(0xd0);

/// Initialize tracing for tests (idempotent).
pub fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init()
        .ok();
}

const HELLO: [u8; 4] = [0xde, 0xad, 0x00, 0x01];
const COUNTER_V1: [u8; 4] = [0xde, 0xad, 0x00, 0x02];
const COUNTER_V2: [u8; 4] = [0xde, 0xad, 0x00, 0x03];
const TRANSPARENT_PROXY: [u8; 4] = [0xde, 0xad, 0x00, 0x10];
const ERC1967_PROXY: [u8; 4] = [0xde, 0xad, 0x00, 0x11];
const BEACON: [u8; 4] = [0xde, 0xad, 0x00, 0x12];
const BEACON_PROXY: [u8; 4] = [0xde, 0xad, 0x00, 0x13];
const BROKEN: [u8; 4] = [0xde, 0xad, 0x00, 0xff];

sol! {
    interface IHello {
        function greeting() external view returns (string memory);
    }

    interface ICounter {
        function initialize(address admin, uint256 initial) external;
        function inc() external;
        function count() external view returns (uint256);
        function admin() external view returns (address);
        function upgradeToAndCall(address newImplementation, bytes memory data) external payable;
        function migrate(uint256 bonus) external;
        function countWithBonus() external view returns (uint256);
    }

    interface IProxyAdmin {
        function owner() external view returns (address);
        function upgradeAndCall(address proxy, address implementation, bytes memory data) external payable;
    }

    interface IBeacon {
        function implementation() external view returns (address);
        function upgradeTo(address newImplementation) external;
    }
}

fn artifact(identifier: &str, tag: [u8; 4], abi: &[&str]) -> (String, ContractArtifact) {
    let abi = JsonAbi::parse(abi.iter().copied()).expect("valid human-readable ABI");
    (
        identifier.to_string(),
        ContractArtifact::new(identifier, abi, Bytes::copy_from_slice(&tag)),
    )
}

const COUNTER_V1_ABI: &[&str] = &[
    "function initialize(address admin, uint256 initial)",
    "function inc()",
    "function count() view returns (uint256)",
    "function admin() view returns (address)",
    "function upgradeToAndCall(address newImplementation, bytes data) payable",
];

/// Artifacts for every contract the in-memory chain understands.
pub fn artifacts() -> HashMap<String, ContractArtifact> {
    let v2_abi: Vec<&str> = COUNTER_V1_ABI
        .iter()
        .copied()
        .chain([
            "function migrate(uint256 bonus)",
            "function countWithBonus() view returns (uint256)",
        ])
        .collect();

    HashMap::from([
        artifact(
            "Hello",
            HELLO,
            &[
                "constructor(string greeting)",
                "function greeting() view returns (string)",
            ],
        ),
        artifact("CounterV1", COUNTER_V1, COUNTER_V1_ABI),
        artifact("CounterV2", COUNTER_V2, &v2_abi),
        artifact(
            "TransparentUpgradeableProxy",
            TRANSPARENT_PROXY,
            &["constructor(address logic, address initialOwner, bytes data) payable"],
        ),
        artifact(
            "ERC1967Proxy",
            ERC1967_PROXY,
            &["constructor(address implementation, bytes data) payable"],
        ),
        artifact(
            "UpgradeableBeacon",
            BEACON,
            &[
                "constructor(address implementation, address initialOwner)",
                "function implementation() view returns (address)",
                "function upgradeTo(address newImplementation)",
            ],
        ),
        artifact(
            "BeaconProxy",
            BEACON_PROXY,
            &["constructor(address beacon, bytes data) payable"],
        ),
        artifact("Broken", BROKEN, &[]),
    ])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Logic {
    V1,
    V2,
}

#[derive(Debug, Clone, Default)]
struct CounterStorage {
    initialized: bool,
    migrated: bool,
    admin: Address,
    count: U256,
    bonus: U256,
}

#[derive(Debug, Clone)]
enum Account {
    Hello { greeting: String },
    Logic(Logic),
    Proxy {
        slots: HashMap<B256, B256>,
        storage: CounterStorage,
    },
    ProxyAdmin { owner: Address },
    Beacon { implementation: Address, owner: Address },
}

impl Account {
    fn tag(&self) -> [u8; 4] {
        match self {
            Self::Hello { .. } => HELLO,
            Self::Logic(Logic::V1) => COUNTER_V1,
            Self::Logic(Logic::V2) => COUNTER_V2,
            Self::Proxy { .. } => ERC1967_PROXY,
            Self::ProxyAdmin { .. } => TRANSPARENT_PROXY,
            Self::Beacon { .. } => BEACON,
        }
    }
}

type Revert = String;

fn decode_err(e: alloy_sol_types::Error) -> Revert {
    format!("abi decoding failed: {e}")
}

fn selector(data: &[u8]) -> Result<[u8; 4], Revert> {
    data.get(..4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| "missing selector".to_string())
}

#[derive(Debug, Clone, Default)]
struct World {
    accounts: HashMap<Address, Account>,
    nonce: u64,
}

impl World {
    fn allocate(&mut self) -> Address {
        self.nonce += 1;
        Address::left_padding_from(&(0x1000 + self.nonce).to_be_bytes())
    }

    fn logic_at(&self, address: Address) -> Result<Logic, Revert> {
        match self.accounts.get(&address) {
            Some(Account::Logic(logic)) => Ok(*logic),
            _ => Err(format!("ERC1967InvalidImplementation({address})")),
        }
    }

    fn deploy(&mut self, from: Address, code: &[u8]) -> Result<Address, Revert> {
        if code.len() < 4 {
            return Err("empty creation code".to_string());
        }
        let (tag, args) = code.split_at(4);
        let tag: [u8; 4] = tag.try_into().map_err(|_| "bad tag".to_string())?;

        let (account, init) = match tag {
            HELLO => {
                let (greeting,) = <(String,)>::abi_decode_params(args, true).map_err(decode_err)?;
                (Account::Hello { greeting }, None)
            }
            COUNTER_V1 => (Account::Logic(Logic::V1), None),
            COUNTER_V2 => (Account::Logic(Logic::V2), None),
            TRANSPARENT_PROXY => {
                let (logic, owner, data) =
                    <(Address, Address, Bytes)>::abi_decode_params(args, true).map_err(decode_err)?;
                self.logic_at(logic)?;
                let admin = self.allocate();
                self.accounts.insert(admin, Account::ProxyAdmin { owner });
                let slots = HashMap::from([
                    (IMPLEMENTATION_SLOT, logic.into_word()),
                    (ADMIN_SLOT, admin.into_word()),
                ]);
                (
                    Account::Proxy {
                        slots,
                        storage: CounterStorage::default(),
                    },
                    Some(data),
                )
            }
            ERC1967_PROXY => {
                let (logic, data) =
                    <(Address, Bytes)>::abi_decode_params(args, true).map_err(decode_err)?;
                self.logic_at(logic)?;
                let slots = HashMap::from([(IMPLEMENTATION_SLOT, logic.into_word())]);
                (
                    Account::Proxy {
                        slots,
                        storage: CounterStorage::default(),
                    },
                    Some(data),
                )
            }
            BEACON => {
                let (implementation, owner) =
                    <(Address, Address)>::abi_decode_params(args, true).map_err(decode_err)?;
                self.logic_at(implementation)?;
                (Account::Beacon { implementation, owner }, None)
            }
            BEACON_PROXY => {
                let (beacon, data) =
                    <(Address, Bytes)>::abi_decode_params(args, true).map_err(decode_err)?;
                if !matches!(self.accounts.get(&beacon), Some(Account::Beacon { .. })) {
                    return Err(format!("ERC1967InvalidBeacon({beacon})"));
                }
                let slots = HashMap::from([(BEACON_SLOT, beacon.into_word())]);
                (
                    Account::Proxy {
                        slots,
                        storage: CounterStorage::default(),
                    },
                    Some(data),
                )
            }
            _ => return Err("invalid opcode".to_string()),
        };

        let address = self.allocate();
        self.accounts.insert(address, account);
        if let Some(data) = init.filter(|d| !d.is_empty()) {
            self.call(from, address, &data)?;
        }
        Ok(address)
    }

    fn call(&mut self, sender: Address, to: Address, data: &[u8]) -> Result<Bytes, Revert> {
        let account = self
            .accounts
            .get(&to)
            .cloned()
            .ok_or_else(|| format!("call to empty account {to}"))?;
        let selector = selector(data)?;

        match account {
            Account::Hello { greeting } if selector == IHello::greetingCall::SELECTOR => {
                Ok((greeting,).abi_encode_params().into())
            }
            Account::Hello { .. } | Account::Logic(_) => Err("function not found".to_string()),
            Account::ProxyAdmin { owner } => match selector {
                IProxyAdmin::ownerCall::SELECTOR => Ok((owner,).abi_encode_params().into()),
                IProxyAdmin::upgradeAndCallCall::SELECTOR => {
                    if sender != owner {
                        return Err(format!("OwnableUnauthorizedAccount({sender})"));
                    }
                    let call =
                        IProxyAdmin::upgradeAndCallCall::abi_decode(data, true).map_err(decode_err)?;
                    let forwarded = ICounter::upgradeToAndCallCall {
                        newImplementation: call.implementation,
                        data: call.data,
                    }
                    .abi_encode();
                    self.call(to, call.proxy, &forwarded)
                }
                _ => Err("function not found".to_string()),
            },
            Account::Beacon {
                implementation,
                owner,
            } => match selector {
                IBeacon::implementationCall::SELECTOR => {
                    Ok((implementation,).abi_encode_params().into())
                }
                IBeacon::upgradeToCall::SELECTOR => {
                    if sender != owner {
                        return Err(format!("OwnableUnauthorizedAccount({sender})"));
                    }
                    let call = IBeacon::upgradeToCall::abi_decode(data, true).map_err(decode_err)?;
                    self.logic_at(call.newImplementation)?;
                    self.accounts.insert(
                        to,
                        Account::Beacon {
                            implementation: call.newImplementation,
                            owner,
                        },
                    );
                    Ok(Bytes::new())
                }
                _ => Err("function not found".to_string()),
            },
            Account::Proxy { slots, .. } => {
                if let Some(admin) = slots.get(&ADMIN_SLOT) {
                    if sender == Address::from_word(*admin) {
                        if selector != ICounter::upgradeToAndCallCall::SELECTOR {
                            return Err("ProxyDeniedAdminAccess".to_string());
                        }
                        return self.upgrade_to_and_call(to, sender, data);
                    }
                }

                let implementation = match slots.get(&BEACON_SLOT) {
                    Some(beacon) => match self.accounts.get(&Address::from_word(*beacon)) {
                        Some(Account::Beacon { implementation, .. }) => *implementation,
                        _ => return Err("beacon vanished".to_string()),
                    },
                    None => slots
                        .get(&IMPLEMENTATION_SLOT)
                        .map(|word| Address::from_word(*word))
                        .unwrap_or_default(),
                };
                let logic = self.logic_at(implementation)?;
                self.run_logic(logic, to, sender, data)
            }
        }
    }

    fn storage(&mut self, proxy: Address) -> &mut CounterStorage {
        match self.accounts.get_mut(&proxy) {
            Some(Account::Proxy { storage, .. }) => storage,
            _ => unreachable!("logic only runs behind proxies"),
        }
    }

    fn set_implementation(&mut self, proxy: Address, implementation: Address) {
        if let Some(Account::Proxy { slots, .. }) = self.accounts.get_mut(&proxy) {
            slots.insert(IMPLEMENTATION_SLOT, implementation.into_word());
        }
    }

    fn upgrade_to_and_call(
        &mut self,
        proxy: Address,
        sender: Address,
        data: &[u8],
    ) -> Result<Bytes, Revert> {
        let call = ICounter::upgradeToAndCallCall::abi_decode(data, true).map_err(decode_err)?;
        let logic = self.logic_at(call.newImplementation)?;
        self.set_implementation(proxy, call.newImplementation);
        if !call.data.is_empty() {
            self.run_logic(logic, proxy, sender, &call.data)?;
        }
        Ok(Bytes::new())
    }

    fn run_logic(
        &mut self,
        logic: Logic,
        proxy: Address,
        sender: Address,
        data: &[u8],
    ) -> Result<Bytes, Revert> {
        let selector = selector(data)?;
        match selector {
            ICounter::initializeCall::SELECTOR => {
                let call = ICounter::initializeCall::abi_decode(data, true).map_err(decode_err)?;
                let storage = self.storage(proxy);
                if storage.initialized {
                    return Err("InvalidInitialization()".to_string());
                }
                storage.initialized = true;
                storage.admin = call.admin;
                storage.count = call.initial;
                Ok(Bytes::new())
            }
            ICounter::incCall::SELECTOR => {
                let storage = self.storage(proxy);
                if sender != storage.admin {
                    return Err(format!("OwnableUnauthorizedAccount({sender})"));
                }
                storage.count += U256::from(1);
                Ok(Bytes::new())
            }
            ICounter::countCall::SELECTOR => {
                Ok((self.storage(proxy).count,).abi_encode_params().into())
            }
            ICounter::adminCall::SELECTOR => {
                Ok((self.storage(proxy).admin,).abi_encode_params().into())
            }
            ICounter::upgradeToAndCallCall::SELECTOR => {
                if sender != self.storage(proxy).admin {
                    return Err(format!("OwnableUnauthorizedAccount({sender})"));
                }
                self.upgrade_to_and_call(proxy, sender, data)
            }
            ICounter::migrateCall::SELECTOR if logic == Logic::V2 => {
                let call = ICounter::migrateCall::abi_decode(data, true).map_err(decode_err)?;
                let storage = self.storage(proxy);
                if call.bonus.is_zero() {
                    return Err("bonus must be positive".to_string());
                }
                if storage.migrated {
                    return Err("InvalidInitialization()".to_string());
                }
                storage.migrated = true;
                storage.bonus = call.bonus;
                Ok(Bytes::new())
            }
            ICounter::countWithBonusCall::SELECTOR if logic == Logic::V2 => {
                let storage = self.storage(proxy);
                Ok((storage.count + storage.bonus,).abi_encode_params().into())
            }
            _ => Err("function not found".to_string()),
        }
    }
}

/// How the chain answers confirmation waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Confirmations {
    #[default]
    Reached,
    TimedOut,
    Unavailable,
}

/// A transaction the chain received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub to: Address,
    pub selector: [u8; 4],
    pub success: bool,
}

#[derive(Default)]
struct State {
    world: World,
    tx_count: u64,
    deployments: usize,
    sent: Vec<Sent>,
    confirmations: Confirmations,
    confirmation_waits: Vec<(B256, u64)>,
    report_hashes: bool,
    /// Transactions to this selector are applied but reported as reverted.
    misreport: Option<[u8; 4]>,
    /// Transactions to this selector fail in the client; `true` applies them first.
    lose_receipt: Option<([u8; 4], bool)>,
    cancel_after: Option<(usize, CancelHandle)>,
}

impl State {
    fn next_hash(&mut self) -> Option<B256> {
        self.tx_count += 1;
        self.report_hashes
            .then(|| B256::left_padding_from(&self.tx_count.to_be_bytes()))
    }
}

/// Shared-state in-memory chain. Clones observe the same chain.
#[derive(Clone)]
pub struct MockChain {
    state: Arc<Mutex<State>>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                report_hashes: true,
                ..State::default()
            })),
        }
    }

    pub fn with_confirmations(self, confirmations: Confirmations) -> Self {
        self.state.lock().unwrap().confirmations = confirmations;
        self
    }

    pub fn without_tx_hashes(self) -> Self {
        self.state.lock().unwrap().report_hashes = false;
        self
    }

    pub fn misreporting(self, selector: [u8; 4]) -> Self {
        self.state.lock().unwrap().misreport = Some(selector);
        self
    }

    pub fn losing_receipts(self, selector: [u8; 4], applied: bool) -> Self {
        self.state.lock().unwrap().lose_receipt = Some((selector, applied));
        self
    }

    /// Trigger `handle` once `deployments` contracts have been deployed.
    pub fn cancel_after(self, deployments: usize, handle: CancelHandle) -> Self {
        self.state.lock().unwrap().cancel_after = Some((deployments, handle));
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_with(&self, selector: [u8; 4]) -> usize {
        self.sent().iter().filter(|s| s.selector == selector).count()
    }

    pub fn deployments(&self) -> usize {
        self.state.lock().unwrap().deployments
    }

    pub fn confirmation_waits(&self) -> Vec<(B256, u64)> {
        self.state.lock().unwrap().confirmation_waits.clone()
    }

    /// Read-only call from the deployer, panicking on revert.
    pub fn read(&self, to: Address, calldata: Vec<u8>) -> Bytes {
        let mut world = self.state.lock().unwrap().world.clone();
        world.call(DEPLOYER, to, &calldata).expect("read reverted")
    }

    pub fn count(&self, proxy: Address) -> U256 {
        let out = self.read(proxy, ICounter::countCall {}.abi_encode());
        U256::abi_decode(&out, true).unwrap()
    }
}

impl ChainClient for MockChain {
    fn sender(&self) -> Address {
        DEPLOYER
    }

    async fn deploy_contract(&self, creation_code: Bytes) -> Result<DeployReceipt> {
        let mut state = self.state.lock().unwrap();
        let tx_hash = state.next_hash();
        let snapshot = state.world.clone();

        let receipt = match state.world.deploy(DEPLOYER, &creation_code) {
            Ok(address) => {
                state.deployments += 1;
                DeployReceipt {
                    address,
                    tx_hash,
                    success: true,
                }
            }
            Err(_) => {
                state.world = snapshot;
                DeployReceipt {
                    address: Address::ZERO,
                    tx_hash,
                    success: false,
                }
            }
        };

        if let Some((after, handle)) = &state.cancel_after {
            if state.deployments >= *after {
                handle.cancel();
            }
        }
        Ok(receipt)
    }

    async fn send_transaction(&self, to: Address, calldata: Bytes) -> Result<TxReceipt> {
        let mut state = self.state.lock().unwrap();
        let tx_hash = state.next_hash();
        let selector: [u8; 4] = calldata
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .unwrap_or_default();

        if let Some((lost, applied)) = state.lose_receipt {
            if lost == selector {
                if applied {
                    let _ = state.world.call(DEPLOYER, to, &calldata);
                }
                anyhow::bail!("connection reset while waiting for receipt");
            }
        }

        let snapshot = state.world.clone();
        let mut success = state.world.call(DEPLOYER, to, &calldata).is_ok();
        if !success {
            state.world = snapshot;
        }
        if state.misreport == Some(selector) {
            success = false;
        }

        state.sent.push(Sent {
            to,
            selector,
            success,
        });
        Ok(TxReceipt { tx_hash, success })
    }

    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes> {
        let mut world = self.state.lock().unwrap().world.clone();
        world
            .call(DEPLOYER, to, &calldata)
            .map_err(|reason| anyhow::anyhow!("execution reverted: {reason}"))
    }

    async fn wait_for_confirmations(
        &self,
        tx_hash: B256,
        confirmations: u64,
        _timeout: Duration,
    ) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.confirmation_waits.push((tx_hash, confirmations));
        match state.confirmations {
            Confirmations::Reached => Ok(true),
            Confirmations::TimedOut => Ok(false),
            Confirmations::Unavailable => anyhow::bail!("eth_blockNumber: method not found"),
        }
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256> {
        let state = self.state.lock().unwrap();
        Ok(match state.world.accounts.get(&address) {
            Some(Account::Proxy { slots, .. }) => slots.get(&slot).copied().unwrap_or_default(),
            _ => B256::ZERO,
        })
    }

    async fn code_at(&self, address: Address) -> Result<Bytes> {
        let state = self.state.lock().unwrap();
        Ok(state
            .world
            .accounts
            .get(&address)
            .map(|account| Bytes::copy_from_slice(&account.tag()))
            .unwrap_or_default())
    }
}

/// Records requested sleeps and returns immediately.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    slept: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

/// Scripted explorer answer.
#[derive(Debug, Clone, Copy)]
pub enum ExplorerStep {
    Verified,
    AlreadyVerified,
    Fail(&'static str),
    Reject(&'static str),
}

/// Explorer answering with a script, repeating its last step.
#[derive(Clone)]
pub struct ScriptedExplorer {
    steps: Arc<Vec<ExplorerStep>>,
    requests: Arc<Mutex<Vec<VerificationRequest>>>,
}

impl ScriptedExplorer {
    pub fn new(steps: Vec<ExplorerStep>) -> Self {
        assert!(!steps.is_empty());
        Self {
            steps: Arc::new(steps),
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<VerificationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl VerificationService for ScriptedExplorer {
    async fn verify(&self, request: &VerificationRequest) -> Result<ServiceVerdict> {
        let step = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            self.steps[(requests.len() - 1).min(self.steps.len() - 1)]
        };
        match step {
            ExplorerStep::Verified => Ok(ServiceVerdict::Verified),
            ExplorerStep::AlreadyVerified => Ok(ServiceVerdict::AlreadyVerified),
            ExplorerStep::Fail(message) => anyhow::bail!("{message}"),
            ExplorerStep::Reject(reason) => Err(VerificationRejected(reason.to_string()).into()),
        }
    }
}
