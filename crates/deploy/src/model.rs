//! Deployment requests and the results they produce.

use std::{fmt, str::FromStr};

use alloy_core::primitives::{Address, B256, Bytes};
use derive_more::{Deref, Display};
use serde::{Deserialize, Deserializer, Serialize};

/// A single immutable-contract deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    /// Artifact identifier of the contract (e.g. `Hello` or `contracts/Hello.sol:Hello`).
    pub contract: String,
    /// Constructor arguments, coerced against the ABI before submission.
    #[serde(default, deserialize_with = "deserialize_args")]
    pub constructor_args: Vec<String>,
    /// Number of block confirmations to wait for after mining.
    #[serde(default)]
    pub confirmations: u64,
    /// State-changing calls executed on the new contract once it is deployed.
    #[serde(default)]
    pub calls: Vec<FunctionCall>,
}

impl DeploymentSpec {
    pub fn new(contract: impl Into<String>, constructor_args: Vec<String>) -> Self {
        Self {
            contract: contract.into(),
            constructor_args,
            confirmations: 0,
            calls: Vec::new(),
        }
    }

    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations;
        self
    }

    pub fn with_call(mut self, call: FunctionCall) -> Self {
        self.calls.push(call);
        self
    }
}

/// Result of a successful immutable-contract deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentResult {
    pub contract: String,
    pub address: Address,
    /// Deployment transaction hash, if the client was able to report it.
    pub transaction_hash: Option<B256>,
    /// Confirmations observed before returning. Zero when the wait fell back to a fixed delay.
    pub block_confirmations: u64,
    /// ABI-encoded constructor arguments, as needed by explorers for verification.
    pub constructor_args: Bytes,
}

/// Proxy patterns supported for upgradeable deployments.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ProxyKind {
    /// Transparent proxy with a separate `ProxyAdmin` holding upgrade authority.
    #[default]
    Transparent,
    /// ERC-1967 proxy whose implementation carries the upgrade logic (ERC-1822).
    Uups,
    /// Beacon proxy reading its implementation from an upgradeable beacon.
    Beacon,
}

/// An upgradeable deployment: implementation, proxy, and initializer call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyDeploymentSpec {
    /// Artifact identifier of the implementation contract.
    pub implementation: String,
    /// Name of the initializer invoked once through the proxy.
    #[serde(default = "default_initializer")]
    pub initializer: String,
    #[serde(default, deserialize_with = "deserialize_args")]
    pub initializer_args: Vec<String>,
    #[serde(default)]
    pub kind: ProxyKind,
    /// Initial owner of the `ProxyAdmin` or beacon. Defaults to the deploying account.
    #[serde(default)]
    pub owner: Option<Address>,
    #[serde(default)]
    pub confirmations: u64,
    /// State-changing calls made through the proxy after initialization.
    #[serde(default)]
    pub calls: Vec<FunctionCall>,
}

fn default_initializer() -> String {
    "initialize".to_string()
}

impl ProxyDeploymentSpec {
    pub fn new(
        implementation: impl Into<String>,
        initializer: impl Into<String>,
        initializer_args: Vec<String>,
        kind: ProxyKind,
    ) -> Self {
        Self {
            implementation: implementation.into(),
            initializer: initializer.into(),
            initializer_args,
            kind,
            owner: None,
            confirmations: 0,
            calls: Vec::new(),
        }
    }

    pub fn with_owner(mut self, owner: Address) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_call(mut self, call: FunctionCall) -> Self {
        self.calls.push(call);
        self
    }
}

/// On-chain view of a proxy, always read from its ERC-1967 storage slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProxyState {
    pub kind: ProxyKind,
    pub proxy: Address,
    pub implementation: Address,
    /// `ProxyAdmin` address; absent for proxy kinds without a separate admin.
    pub admin: Option<Address>,
    /// Beacon address for beacon proxies.
    pub beacon: Option<Address>,
}

/// A live proxy together with the contracts deployed to get it there.
#[derive(Debug, Clone, PartialEq, Eq, Deref)]
pub struct ProxyDeployment {
    #[deref]
    pub state: ProxyState,
    pub deployed: Vec<DeployedContract>,
}

/// Upgrade of an existing proxy to a new implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeSpec {
    pub proxy: Address,
    /// Artifact identifier of the new implementation.
    pub new_implementation: String,
    /// Migration executed atomically with the implementation switch.
    #[serde(default)]
    pub migration: Option<FunctionCall>,
    #[serde(default)]
    pub confirmations: u64,
    /// State-changing calls sent through the proxy once the upgrade landed.
    #[serde(default)]
    pub calls: Vec<FunctionCall>,
}

impl UpgradeSpec {
    pub fn new(proxy: Address, new_implementation: impl Into<String>) -> Self {
        Self {
            proxy,
            new_implementation: new_implementation.into(),
            migration: None,
            confirmations: 0,
            calls: Vec::new(),
        }
    }

    pub fn with_migration(mut self, migration: FunctionCall) -> Self {
        self.migration = Some(migration);
        self
    }

    pub fn with_call(mut self, call: FunctionCall) -> Self {
        self.calls.push(call);
        self
    }
}

/// A named contract function together with its (uncoerced) arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub function: String,
    #[serde(default, deserialize_with = "deserialize_args")]
    pub args: Vec<String>,
}

impl FunctionCall {
    pub fn new(function: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            function: function.into(),
            args,
        }
    }
}

impl fmt::Display for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.function, self.args.join(", "))
    }
}

/// Parses `name`, `name()` or `name(arg1, arg2)`.
///
/// Arguments are split on commas, so string arguments containing commas must be supplied
/// through a configuration file instead.
impl FromStr for FunctionCall {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, args) = match s.split_once('(') {
            None => (s, ""),
            Some((name, rest)) => {
                let inner = rest
                    .strip_suffix(')')
                    .ok_or_else(|| format!("missing closing parenthesis in `{s}`"))?;
                (name.trim(), inner)
            }
        };

        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("invalid function name in `{s}`"));
        }

        let args = if args.trim().is_empty() {
            Vec::new()
        } else {
            args.split(',').map(|a| a.trim().to_string()).collect()
        };

        Ok(Self::new(name, args))
    }
}

/// Role a deployed contract plays in a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
pub enum ContractRole {
    #[display("contract")]
    Contract,
    #[display("implementation")]
    Implementation,
    #[display("proxy")]
    Proxy,
    #[display("beacon")]
    Beacon,
}

/// A contract that is known to exist on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployedContract {
    pub role: ContractRole,
    pub identifier: String,
    pub address: Address,
    pub transaction_hash: Option<B256>,
}

/// Accepts strings, integers and booleans so configuration files can write `42` instead of `"42"`.
fn deserialize_args<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawArg {
        Str(String),
        Int(i64),
        Uint(u64),
        Bool(bool),
    }

    let raw = Vec::<RawArg>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|arg| match arg {
            RawArg::Str(s) => s,
            RawArg::Int(i) => i.to_string(),
            RawArg::Uint(u) => u.to_string(),
            RawArg::Bool(b) => b.to_string(),
        })
        .collect())
}
