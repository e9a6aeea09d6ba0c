//! Bounded retry of explorer verification.
//!
//! Explorers usually lag behind the chain by a few seconds to tens of seconds, so the first
//! verification attempt right after a deployment often fails with "unable to locate
//! contract". The retrier waits between attempts according to a [`BackoffPolicy`] and treats
//! "already verified" answers as success.

use std::{fmt, time::Duration};

use alloy_core::primitives::{Address, Bytes};
use backon::{BackoffBuilder, ConstantBuilder, ExponentialBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    CancelSignal,
    traits::{ServiceVerdict, Sleeper, VerificationRejected, VerificationRequest, VerificationService},
};

/// Default number of verification attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Default fixed delay between verification attempts, in seconds.
pub const DEFAULT_BACKOFF_SECS: u64 = 15;

/// Explorer phrasings meaning the contract is verified already.
///
/// Matching on message text is fragile: explorers change their wording without notice. It
/// should give way to a structured status code once explorers expose one.
const ALREADY_VERIFIED_PHRASES: &[&str] = &["already verified", "already been verified"];

/// Whether an explorer message says the contract is verified already.
pub fn is_already_verified(message: &str) -> bool {
    let message = message.to_lowercase();
    ALREADY_VERIFIED_PHRASES
        .iter()
        .any(|phrase| message.contains(phrase))
}

/// Delays between verification attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BackoffPolicy {
    /// Same delay before every retry.
    Fixed { delay_secs: u64 },
    /// `initial_secs`, multiplied by `factor` after each retry, capped at `max_secs`.
    Exponential {
        initial_secs: u64,
        factor: f32,
        max_secs: u64,
    },
    /// Explicit delays; the last one repeats if there are more retries than entries.
    Schedule { delays_secs: Vec<u64> },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::Fixed {
            delay_secs: DEFAULT_BACKOFF_SECS,
        }
    }
}

impl BackoffPolicy {
    /// The first `count` delays of this policy.
    pub fn delays(&self, count: usize) -> Vec<Duration> {
        match self {
            Self::Fixed { delay_secs } => ConstantBuilder::default()
                .with_delay(Duration::from_secs(*delay_secs))
                .with_max_times(count)
                .build()
                .collect(),
            Self::Exponential {
                initial_secs,
                factor,
                max_secs,
            } => ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(*initial_secs))
                .with_factor(*factor)
                .with_max_delay(Duration::from_secs(*max_secs))
                .with_max_times(count)
                .build()
                .collect(),
            Self::Schedule { delays_secs } => (0..count)
                .map(|i| {
                    let secs = delays_secs
                        .get(i)
                        .or(delays_secs.last())
                        .copied()
                        .unwrap_or_default();
                    Duration::from_secs(secs)
                })
                .collect(),
        }
    }
}

/// How many times to try, and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Classification of a single verification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "message", rename_all = "kebab-case")]
pub enum AttemptOutcome {
    Success,
    AlreadyVerified,
    TransientFailure(String),
    FatalFailure(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationAttempt {
    pub target: Address,
    pub constructor_args: Bytes,
    /// 1-based.
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
}

/// Terminal state of a verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum VerificationStatus {
    Verified,
    AlreadyVerified,
    /// Every attempt failed. Reported, but never fails the deployment.
    Exhausted {
        attempts: u32,
        last_error: Option<String>,
    },
    /// The service refused in a way retrying cannot fix.
    Rejected { reason: String },
    Cancelled,
}

impl VerificationStatus {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified | Self::AlreadyVerified)
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verified => write!(f, "verified"),
            Self::AlreadyVerified => write!(f, "already verified"),
            Self::Exhausted {
                attempts,
                last_error: Some(error),
            } => write!(f, "exhausted after {attempts} attempt(s): {error}"),
            Self::Exhausted { attempts, .. } => write!(f, "exhausted after {attempts} attempt(s)"),
            Self::Rejected { reason } => write!(f, "rejected: {reason}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub status: VerificationStatus,
    pub attempts: Vec<VerificationAttempt>,
}

/// Drives a [`VerificationService`] through a [`RetryPolicy`].
pub struct VerificationRetrier<'a, V, S> {
    service: &'a V,
    sleeper: &'a S,
    cancel: CancelSignal,
}

impl<'a, V, S> VerificationRetrier<'a, V, S>
where
    V: VerificationService,
    S: Sleeper,
{
    pub fn new(service: &'a V, sleeper: &'a S, cancel: CancelSignal) -> Self {
        Self {
            service,
            sleeper,
            cancel,
        }
    }

    /// Verify `request`, making at most `policy.max_attempts` attempts.
    pub async fn verify_with_retry(
        &self,
        request: &VerificationRequest,
        policy: &RetryPolicy,
    ) -> VerificationReport {
        let max_attempts = policy.max_attempts;
        let delays = policy
            .backoff
            .delays(max_attempts.saturating_sub(1) as usize);
        let mut attempts = Vec::new();
        let mut last_error = None;

        for attempt_number in 1..=max_attempts {
            if attempt_number > 1 {
                let delay = delays
                    .get(attempt_number as usize - 2)
                    .copied()
                    .unwrap_or_default();
                tracing::info!(
                    address = %request.address,
                    attempt = attempt_number,
                    ?delay,
                    "Waiting before next verification attempt..."
                );
                if self
                    .cancel
                    .run("verification backoff", self.sleeper.sleep(delay))
                    .await
                    .is_err()
                {
                    return report(VerificationStatus::Cancelled, attempts);
                }
            }

            tracing::info!(
                address = %request.address,
                contract = %request.contract,
                attempt = attempt_number,
                max_attempts,
                "Submitting verification"
            );
            let outcome = match self
                .cancel
                .run("verification", self.service.verify(request))
                .await
            {
                Err(_) => return report(VerificationStatus::Cancelled, attempts),
                Ok(Ok(ServiceVerdict::Verified)) => AttemptOutcome::Success,
                Ok(Ok(ServiceVerdict::AlreadyVerified)) => AttemptOutcome::AlreadyVerified,
                Ok(Err(e)) => classify(&e),
            };

            attempts.push(VerificationAttempt {
                target: request.address,
                constructor_args: request.encoded_args.clone(),
                attempt_number,
                outcome: outcome.clone(),
            });

            match outcome {
                AttemptOutcome::Success => {
                    tracing::info!(address = %request.address, "Contract verified");
                    return report(VerificationStatus::Verified, attempts);
                }
                AttemptOutcome::AlreadyVerified => {
                    tracing::info!(address = %request.address, "Contract already verified");
                    return report(VerificationStatus::AlreadyVerified, attempts);
                }
                AttemptOutcome::FatalFailure(reason) => {
                    tracing::warn!(address = %request.address, %reason, "Verification rejected");
                    return report(VerificationStatus::Rejected { reason }, attempts);
                }
                AttemptOutcome::TransientFailure(message) => {
                    tracing::warn!(
                        address = %request.address,
                        attempt = attempt_number,
                        max_attempts,
                        error = %message,
                        "Verification attempt failed"
                    );
                    last_error = Some(message);
                }
            }
        }

        tracing::warn!(
            address = %request.address,
            attempts = max_attempts,
            "Verification attempts exhausted, deployment is unaffected"
        );
        report(
            VerificationStatus::Exhausted {
                attempts: max_attempts,
                last_error,
            },
            attempts,
        )
    }
}

fn classify(error: &anyhow::Error) -> AttemptOutcome {
    if let Some(rejected) = error.downcast_ref::<VerificationRejected>() {
        return AttemptOutcome::FatalFailure(rejected.0.clone());
    }
    let message = format!("{error:#}");
    if is_already_verified(&message) {
        AttemptOutcome::AlreadyVerified
    } else {
        AttemptOutcome::TransientFailure(message)
    }
}

fn report(status: VerificationStatus, attempts: Vec<VerificationAttempt>) -> VerificationReport {
    VerificationReport { status, attempts }
}
