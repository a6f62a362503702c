//! CLI commands.

mod biolatency;
mod config;
mod seccomp;
mod traces;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracedeck_agent::cluster::ClusterApi;
use tracedeck_agent::KubeClient;
use tracedeck_id::Namespace;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, Credentials};
use crate::error::CliError;
use crate::output::OutputFormat;

/// tracedeck CLI - Drive Inspektor Gadget traces and seccomp policies.
#[derive(Debug, Parser)]
#[command(name = "td")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Namespace to operate on.
    #[arg(long, short = 'n', global = true, env = "TRACEDECK_NAMESPACE")]
    namespace: Option<String>,

    /// Increase log verbosity (-v, -vv).
    #[arg(long, short = 'v', global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Record syscalls and manage the generated seccomp policies.
    Seccomp(seccomp::SeccompCommand),

    /// Record block device I/O latency.
    Biolatency(biolatency::BiolatencyCommand),

    /// List and dump traceloop traces.
    Traces(traces::TracesCommand),

    /// Show or change CLI configuration.
    Config(config::ConfigCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Install a stderr subscriber. `RUST_LOG` wins over `-v`.
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .init();
    }

    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let format = OutputFormat::parse(&self.format);

        let config = Config::load()?;
        let credentials = Credentials::load()?;

        let ctx = CommandContext {
            config,
            credentials,
            format,
            namespace: self.namespace,
        };

        match self.command {
            Commands::Seccomp(cmd) => cmd.run(ctx).await,
            Commands::Biolatency(cmd) => cmd.run(ctx).await,
            Commands::Traces(cmd) => cmd.run(ctx).await,
            Commands::Config(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("td {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub config: Config,
    pub credentials: Option<Credentials>,
    pub format: OutputFormat,
    pub namespace: Option<String>,
}

impl CommandContext {
    /// Client for the configured API server.
    pub fn cluster(&self) -> Result<Arc<dyn ClusterApi>> {
        let config = self.config.cluster_config(self.credentials.as_ref());
        let client = KubeClient::new(config).map_err(CliError::from)?;
        Ok(Arc::new(client))
    }

    /// The selected namespace, preferring the flag over the saved default.
    pub fn namespace(&self) -> Result<Option<Namespace>> {
        self.namespace
            .as_deref()
            .or(self.config.namespace.as_deref())
            .map(|ns| Namespace::parse(ns).with_context(|| format!("Invalid namespace {ns:?}")))
            .transpose()
    }

    /// Require a namespace to be selected.
    pub fn require_namespace(&self) -> Result<Namespace> {
        self.namespace()?
            .ok_or_else(|| CliError::NamespaceRequired.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(flag: Option<&str>, saved: Option<&str>) -> CommandContext {
        CommandContext {
            config: Config {
                namespace: saved.map(str::to_string),
                ..Config::default()
            },
            credentials: None,
            format: OutputFormat::Table,
            namespace: flag.map(str::to_string),
        }
    }

    #[test]
    fn test_flag_namespace_wins() {
        let ctx = ctx(Some("shop"), Some("default"));
        assert_eq!(ctx.namespace().unwrap().unwrap().as_str(), "shop");
    }

    #[test]
    fn test_saved_namespace_fallback() {
        let ctx = ctx(None, Some("default"));
        assert_eq!(ctx.require_namespace().unwrap().as_str(), "default");
    }

    #[test]
    fn test_missing_namespace() {
        let ctx = ctx(None, None);
        assert!(ctx.namespace().unwrap().is_none());
        let err = ctx.require_namespace().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::NamespaceRequired)
        ));
    }

    #[test]
    fn test_invalid_namespace() {
        let ctx = ctx(Some("Not_Valid"), None);
        assert!(ctx.namespace().is_err());
    }

    #[test]
    fn test_parse_seccomp_apply() {
        let cli = Cli::try_parse_from(["td", "-n", "shop", "seccomp", "apply", "u1", "u2"]).unwrap();
        assert_eq!(cli.namespace.as_deref(), Some("shop"));
        assert!(matches!(cli.command, Commands::Seccomp(_)));
    }

    #[test]
    fn test_parse_verbosity() {
        let cli = Cli::try_parse_from(["td", "-vv", "version"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
