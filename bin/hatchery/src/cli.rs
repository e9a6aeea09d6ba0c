use std::path::PathBuf;

use alloy_core::primitives::Address;
use clap::{Args, Parser, Subcommand};
use hatchery_deploy::{
    BackoffPolicy, DeploymentSpec, FunctionCall, ProxyDeploymentSpec, ProxyKind, RunRequest,
    UpgradeSpec,
};
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::config::{ExplorerOverrides, HatcheryConfig, Overrides, VerificationOverrides};

#[derive(Parser)]
#[command(name = "hatchery")]
#[command(
    author,
    version,
    about = "Deploy, upgrade and verify EVM smart contracts"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "HATCHERY_VERBOSITY", default_value_t = LevelFilter::INFO, global = true)]
    pub verbosity: LevelFilter,

    /// Path to a configuration file. Defaults to ./Hatchery.toml when it exists.
    #[arg(long, alias = "conf", env = "HATCHERY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Network name, used in records and as the ledger file name.
    #[arg(short, long, global = true)]
    pub network: Option<String>,

    /// JSON-RPC endpoint of the node.
    #[arg(long, alias = "rpc", global = true)]
    pub rpc_url: Option<Url>,

    /// Sending account. Must be unlocked on the node. Defaults to the node's first account.
    #[arg(long, global = true)]
    pub from: Option<Address>,

    /// Hardhat (`artifacts/`) or Foundry (`out/`) artifacts directory.
    #[arg(long, global = true)]
    pub artifacts: Option<PathBuf>,

    /// Explorer API key used for verification.
    #[arg(long, global = true)]
    pub explorer_api_key: Option<String>,

    /// Give up on the whole run after this many seconds.
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Do not append the outcome to the deployment ledger.
    #[arg(long, global = true)]
    pub no_ledger: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy an immutable contract.
    Deploy {
        /// Artifact identifier, e.g. `Hello` or `contracts/Hello.sol:Hello`.
        contract: String,

        /// Constructor argument, repeated in order. `${NAME}` reads the environment.
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,

        #[command(flatten)]
        step: StepArgs,
    },

    /// Deploy an implementation behind a new proxy and initialize it.
    DeployProxy {
        /// Artifact identifier of the implementation.
        implementation: String,

        #[arg(long, default_value_t = ProxyKind::Transparent)]
        kind: ProxyKind,

        #[arg(long, default_value = "initialize")]
        initializer: String,

        /// Initializer argument, repeated in order.
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,

        /// Initial owner of the ProxyAdmin or beacon. Defaults to the sender.
        #[arg(long)]
        owner: Option<Address>,

        #[command(flatten)]
        step: StepArgs,
    },

    /// Upgrade an existing proxy to a new implementation.
    Upgrade {
        /// Address of the proxy.
        proxy: Address,

        /// Artifact identifier of the new implementation.
        implementation: String,

        /// Migration run in the upgrade transaction, e.g. `migrate(100)`.
        #[arg(long)]
        migrate: Option<FunctionCall>,

        #[command(flatten)]
        step: StepArgs,
    },
}

/// Options shared by every deployment kind.
#[derive(Debug, Clone, Args)]
pub struct StepArgs {
    /// State-changing call made after deployment or upgrade, e.g. `inc()`. Repeatable.
    #[arg(long = "call")]
    pub calls: Vec<FunctionCall>,

    /// Read-only call evaluated after the run, e.g. `count()`. Repeatable.
    #[arg(long = "read")]
    pub reads: Vec<FunctionCall>,

    /// Block confirmations to wait for.
    #[arg(long)]
    pub confirmations: Option<u64>,

    /// Verify the deployed source on the block explorer.
    #[arg(long)]
    pub verify: bool,

    /// Verification attempts before giving up.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_verify_attempts: Option<u32>,

    /// Fixed wait between verification attempts.
    #[arg(long)]
    pub verify_backoff_secs: Option<u64>,
}

impl StepArgs {
    fn verification(&self) -> Option<VerificationOverrides> {
        if self.max_verify_attempts.is_none() && self.verify_backoff_secs.is_none() {
            return None;
        }
        Some(VerificationOverrides {
            max_attempts: self.max_verify_attempts,
            backoff: self
                .verify_backoff_secs
                .map(|delay_secs| BackoffPolicy::Fixed { delay_secs }),
        })
    }
}

impl Cli {
    /// Flags that override the configuration file and environment.
    pub fn overrides(&self) -> Overrides {
        let step = self.command.step();
        Overrides {
            network: self.network.clone(),
            rpc_url: self.rpc_url.clone(),
            from: self.from,
            artifacts: self.artifacts.clone(),
            confirmations: step.confirmations,
            verify: step.verify.then_some(true),
            run_timeout_secs: self.timeout,
            ledger: self.no_ledger.then_some(false),
            verification: step.verification(),
            explorer: self.explorer_api_key.clone().map(|api_key| ExplorerOverrides {
                api_key: Some(api_key),
            }),
        }
    }
}

impl Command {
    pub fn step(&self) -> &StepArgs {
        match self {
            Self::Deploy { step, .. } | Self::DeployProxy { step, .. } | Self::Upgrade { step, .. } => {
                step
            }
        }
    }

    /// Build the run request, taking defaults from `config`.
    pub fn request(&self, config: &HatcheryConfig) -> RunRequest {
        let step = self.step();
        let request = match self {
            Self::Deploy { contract, args, .. } => {
                let mut spec = DeploymentSpec::new(contract, args.clone())
                    .with_confirmations(config.confirmations);
                spec.calls = step.calls.clone();
                RunRequest::plain(&config.network, spec)
            }
            Self::DeployProxy {
                implementation,
                kind,
                initializer,
                args,
                owner,
                ..
            } => {
                let mut spec =
                    ProxyDeploymentSpec::new(implementation, initializer, args.clone(), *kind);
                spec.owner = *owner;
                spec.confirmations = config.confirmations;
                spec.calls = step.calls.clone();
                RunRequest::proxy(&config.network, spec)
            }
            Self::Upgrade {
                proxy,
                implementation,
                migrate,
                ..
            } => {
                let mut spec = UpgradeSpec::new(*proxy, implementation);
                spec.migration = migrate.clone();
                spec.confirmations = config.confirmations;
                spec.calls = step.calls.clone();
                RunRequest::upgrade(&config.network, spec)
            }
        };

        step.reads
            .iter()
            .cloned()
            .fold(request.with_verification(config.verify), RunRequest::with_read)
    }
}

#[cfg(test)]
mod tests {
    use hatchery_deploy::{Deployment, DeploymentKind};

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("hatchery").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_deploy_command() {
        let cli = parse(&[
            "deploy",
            "Hello",
            "--arg",
            "Hello, scanner!",
            "--read",
            "greeting()",
            "--confirmations",
            "2",
            "--verify",
        ]);
        let config = HatcheryConfig {
            confirmations: 2,
            verify: true,
            ..HatcheryConfig::default()
        };

        let request = cli.command.request(&config);
        assert_eq!(request.deployment.kind(), DeploymentKind::Plain);
        assert!(request.verify);
        assert_eq!(request.reads, vec![FunctionCall::new("greeting", vec![])]);
        let Deployment::Plain(spec) = request.deployment else {
            panic!("expected a plain deployment");
        };
        assert_eq!(spec.constructor_args, vec!["Hello, scanner!".to_string()]);
        assert_eq!(spec.confirmations, 2);
    }

    #[test]
    fn test_deploy_proxy_command() {
        let cli = parse(&[
            "deploy-proxy",
            "CounterV1",
            "--kind",
            "uups",
            "--arg",
            "${ADMIN}",
            "--arg",
            "42",
            "--call",
            "inc()",
        ]);
        let Deployment::Proxy(spec) = cli.command.request(&HatcheryConfig::default()).deployment
        else {
            panic!("expected a proxy deployment");
        };
        assert_eq!(spec.kind, ProxyKind::Uups);
        assert_eq!(spec.initializer, "initialize");
        assert_eq!(spec.initializer_args, vec!["${ADMIN}".to_string(), "42".to_string()]);
        assert_eq!(spec.calls, vec![FunctionCall::new("inc", vec![])]);
    }

    #[test]
    fn test_upgrade_command_with_migration() {
        let cli = parse(&[
            "upgrade",
            "0x0000000000000000000000000000000000001234",
            "CounterV2",
            "--migrate",
            "migrate(100)",
        ]);
        let Deployment::Upgrade(spec) = cli.command.request(&HatcheryConfig::default()).deployment
        else {
            panic!("expected an upgrade");
        };
        assert_eq!(spec.new_implementation, "CounterV2");
        assert_eq!(
            spec.migration,
            Some(FunctionCall::new("migrate", vec!["100".into()]))
        );
    }

    #[test]
    fn test_global_flags_become_overrides() {
        let cli = parse(&[
            "upgrade",
            "0x0000000000000000000000000000000000001234",
            "CounterV2",
            "--network",
            "sepolia",
            "--no-ledger",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.network.as_deref(), Some("sepolia"));
        assert_eq!(overrides.ledger, Some(false));
        assert_eq!(overrides.verify, None);
    }

    #[test]
    fn test_upgrade_command_keeps_follow_up_calls() {
        let cli = parse(&[
            "upgrade",
            "0x0000000000000000000000000000000000001234",
            "CounterV2",
            "--call",
            "inc()",
            "--call",
            "add(${BONUS})",
        ]);
        let Deployment::Upgrade(spec) = cli.command.request(&HatcheryConfig::default()).deployment
        else {
            panic!("expected an upgrade");
        };
        assert_eq!(
            spec.calls,
            vec![
                FunctionCall::new("inc", vec![]),
                FunctionCall::new("add", vec!["${BONUS}".into()]),
            ]
        );
    }

    #[test]
    fn test_verification_flags_become_overrides() {
        let cli = parse(&[
            "deploy",
            "Hello",
            "--verify",
            "--max-verify-attempts",
            "5",
            "--verify-backoff-secs",
            "20",
        ]);
        let verification = cli.overrides().verification.unwrap();
        assert_eq!(verification.max_attempts, Some(5));
        assert_eq!(
            verification.backoff,
            Some(BackoffPolicy::Fixed { delay_secs: 20 })
        );

        assert!(parse(&["deploy", "Hello"]).overrides().verification.is_none());
        assert!(
            Cli::try_parse_from(["hatchery", "deploy", "Hello", "--max-verify-attempts", "0"])
                .is_err()
        );
    }
}
