//! Collaborator traits the executors are written against.
//!
//! The orchestration logic never talks to a node or an explorer directly. It goes through
//! [`ChainClient`] and [`VerificationService`], and waits through a [`Sleeper`] so tests can
//! run without real delays.
//!
//! # Example
//!
//! ```no_run
//! use hatchery_deploy::{
//!     ArtifactDir, CancelSignal, DeploymentSpec, JsonRpcChainClient, Orchestrator, RunRequest,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let client = JsonRpcChainClient::connect("http://127.0.0.1:8545".parse()?, None).await?;
//! let orchestrator = Orchestrator::new(client, ArtifactDir::new("artifacts"));
//!
//! let spec = DeploymentSpec::new("Hello", vec!["Hello, scanner!".into()]).with_confirmations(2);
//! let report = orchestrator
//!     .run(RunRequest::plain("localhost", spec), CancelSignal::never())
//!     .await;
//! println!("{}", report.exit);
//! # Ok(())
//! # }
//! ```

mod chain;
mod clock;
mod verifier;

pub use chain::{ChainClient, DeployReceipt, TxReceipt};
pub use clock::{Sleeper, TokioSleeper};
pub use verifier::{
    NoVerifier, ServiceVerdict, VerificationRejected, VerificationRequest, VerificationService,
};
