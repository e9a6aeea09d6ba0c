//! hatchery-deploy - Deployment orchestration for EVM smart contracts.
//!
//! Deploys immutable contracts, deploys and upgrades proxied contracts (transparent, UUPS and
//! beacon), and verifies the deployed code on a block explorer with bounded retries.
//!
//! The [`Orchestrator`] drives one run: it dispatches to the [`DeploymentExecutor`],
//! [`ProxyDeploymentExecutor`] or [`UpgradeExecutor`], evaluates read-back probes, then hands
//! the deployed contract to the [`VerificationRetrier`]. Chain access and verification go
//! through the [`ChainClient`] and [`VerificationService`] traits.

pub mod abi;
pub mod artifacts;
mod cancel;
pub mod env;
mod error;
pub mod executor;
pub mod explorer;
pub mod ledger;
pub mod model;
pub mod orchestrator;
mod outcome;
pub mod rpc;
pub mod slots;
mod solidity;
pub mod traits;
pub mod verify;

pub use artifacts::{ArtifactDir, ArtifactStore, BuildInfo, ContractArtifact};
pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use env::{EnvSource, ProcessEnv};
pub use error::DeployError;
pub use executor::{
    ConfirmationPolicy, DeploymentExecutor, ExecutionContext, ProxyContracts,
    ProxyDeploymentExecutor, UpgradeExecutor,
};
pub use explorer::EtherscanVerifier;
pub use ledger::DeploymentLedger;
pub use model::{
    ContractRole, DeployedContract, DeploymentResult, DeploymentSpec, FunctionCall,
    ProxyDeployment, ProxyDeploymentSpec, ProxyKind, ProxyState, UpgradeSpec,
};
pub use orchestrator::{
    Deployment, DeploymentKind, ExitSignal, Orchestrator, OrchestratorSettings, OutcomeRecord,
    ReadResult, RunReport, RunRequest,
};
pub use outcome::ExecutionOutcome;
pub use rpc::JsonRpcChainClient;
pub use slots::ProxyInspector;
pub use traits::{
    ChainClient, DeployReceipt, NoVerifier, ServiceVerdict, Sleeper, TokioSleeper, TxReceipt,
    VerificationRejected, VerificationRequest, VerificationService,
};
pub use verify::{
    AttemptOutcome, BackoffPolicy, RetryPolicy, VerificationAttempt, VerificationReport,
    VerificationRetrier, VerificationStatus,
};
