//! Config commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use tracedeck_id::Namespace;

use crate::config::Credentials;
use crate::output::{print_info, print_single, print_success, OutputFormat};

use super::CommandContext;

/// Config commands.
#[derive(Debug, Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Debug, Subcommand)]
enum ConfigSubcommand {
    /// Set the API server URL.
    SetUrl(SetUrlArgs),

    /// Store a bearer token. An empty token removes the stored one.
    SetToken(SetTokenArgs),

    /// Set the default namespace.
    SetNamespace(SetNamespaceArgs),

    /// Show the current configuration.
    Show,
}

#[derive(Debug, Args)]
struct SetUrlArgs {
    url: String,

    /// Skip TLS certificate verification.
    #[arg(long)]
    insecure: bool,
}

#[derive(Debug, Args)]
struct SetTokenArgs {
    /// Bearer token, read from TRACEDECK_TOKEN when omitted.
    #[arg(env = "TRACEDECK_TOKEN", hide_env_values = true)]
    token: String,
}

#[derive(Debug, Args)]
struct SetNamespaceArgs {
    namespace: String,
}

impl ConfigCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            ConfigSubcommand::SetUrl(args) => set_url(ctx, args),
            ConfigSubcommand::SetToken(args) => set_token(args),
            ConfigSubcommand::SetNamespace(args) => set_namespace(ctx, args),
            ConfigSubcommand::Show => show(ctx),
        }
    }
}

#[derive(Debug, Serialize)]
struct ConfigView {
    api_url: String,
    insecure_tls: bool,
    namespace: Option<String>,
    token: Option<String>,
}

fn set_url(mut ctx: CommandContext, args: SetUrlArgs) -> Result<()> {
    ctx.config.api_url = args.url.trim_end_matches('/').to_string();
    ctx.config.insecure_tls = args.insecure;
    ctx.config.save()?;
    print_success(&format!("API server set to {}", ctx.config.api_url));
    Ok(())
}

fn set_token(args: SetTokenArgs) -> Result<()> {
    let token = args.token.trim();
    if token.is_empty() {
        Credentials::delete()?;
        print_success("Token removed");
        return Ok(());
    }
    Credentials::new(token.to_string()).save()?;
    print_success("Token saved");
    Ok(())
}

fn set_namespace(mut ctx: CommandContext, args: SetNamespaceArgs) -> Result<()> {
    let namespace = Namespace::parse(&args.namespace)?;
    ctx.config.namespace = Some(namespace.into_string());
    ctx.config.save()?;
    print_success(&format!("Default namespace set to {}", args.namespace));
    Ok(())
}

fn show(ctx: CommandContext) -> Result<()> {
    let view = ConfigView {
        api_url: ctx.config.api_url.clone(),
        insecure_tls: ctx.config.insecure_tls,
        namespace: ctx.config.namespace.clone(),
        token: ctx.credentials.as_ref().map(Credentials::masked),
    };
    print_single(&view);
    if view.token.is_none() && ctx.format == OutputFormat::Table {
        print_info("No token stored. Run `td config set-token`.");
    }
    Ok(())
}
