//! Tagged execution outcome that keeps partial on-chain progress alongside errors.

use crate::{DeployError, model::DeployedContract};

/// Outcome of an executor run.
///
/// A step that fails after something was already deployed yields [`ExecutionOutcome::Partial`]
/// so the caller can still report the addresses obtained so far.
#[derive(Debug)]
pub enum ExecutionOutcome<T> {
    Success(T),
    Partial {
        deployed: Vec<DeployedContract>,
        error: DeployError,
    },
    Failed(DeployError),
}

impl<T> ExecutionOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&DeployError> {
        match self {
            Self::Success(_) => None,
            Self::Partial { error, .. } | Self::Failed(error) => Some(error),
        }
    }

    /// Contracts known to be deployed when the executor gave up. Empty on success or failure.
    pub fn partial_deployments(&self) -> &[DeployedContract] {
        match self {
            Self::Partial { deployed, .. } => deployed,
            _ => &[],
        }
    }

    pub fn into_result(self) -> Result<T, DeployError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Partial { error, .. } | Self::Failed(error) => Err(error),
        }
    }
}

/// Accumulates the contracts deployed by an executor so failures can surface them.
#[derive(Debug, Default)]
pub(crate) struct Progress {
    deployed: Vec<DeployedContract>,
}

impl Progress {
    pub(crate) fn record(&mut self, contract: DeployedContract) {
        self.deployed.push(contract);
    }

    pub(crate) fn into_deployed(self) -> Vec<DeployedContract> {
        self.deployed
    }

    /// Turn an error into an outcome, `Partial` if anything reached the chain.
    pub(crate) fn fail<T>(self, error: DeployError) -> ExecutionOutcome<T> {
        if self.deployed.is_empty() {
            ExecutionOutcome::Failed(error)
        } else {
            ExecutionOutcome::Partial {
                deployed: self.deployed,
                error,
            }
        }
    }
}
