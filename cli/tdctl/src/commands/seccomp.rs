//! Seccomp commands (profile recording and policy management).

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;
use tracedeck_agent::cluster::SecurityPolicy;
use tracedeck_agent::lifecycle::format_elapsed;
use tracedeck_agent::policies::count_by_namespace;
use tracedeck_agent::{JobKind, JobLifecycle, PolicyEntry, PolicyReconciler};
use tracedeck_reconcile::Bucket;

use crate::output::{print_info, print_output, print_single, print_success, print_warning, OutputFormat};

use super::CommandContext;

/// Seccomp commands.
#[derive(Debug, Args)]
pub struct SeccompCommand {
    #[command(subcommand)]
    command: SeccompSubcommand,
}

#[derive(Debug, Subcommand)]
enum SeccompSubcommand {
    /// Start recording syscalls in the selected namespace.
    Start,

    /// Stop recording and generate a profile per running pod.
    Stop,

    /// Show the recording state.
    Status,

    /// Start recording again with a fresh start timestamp.
    Restart,

    /// List generated policies by bucket.
    Policies(PoliciesArgs),

    /// Apply policies to the workloads owning their pods.
    Apply(SelectArgs),

    /// Delete policies.
    Delete(SelectArgs),

    /// Replace a policy with an edited copy.
    Update(UpdateArgs),
}

#[derive(Debug, Args)]
struct PoliciesArgs {
    /// Show policy counts for every namespace instead of buckets.
    #[arg(long, short = 'A')]
    all_namespaces: bool,
}

#[derive(Debug, Args)]
struct SelectArgs {
    /// Policy UIDs.
    #[arg(required = true)]
    uids: Vec<String>,
}

#[derive(Debug, Args)]
struct UpdateArgs {
    /// JSON file holding the full SeccompProfile object.
    #[arg(long, short = 'f')]
    file: PathBuf,
}

impl SeccompCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            SeccompSubcommand::Start => start(ctx, false).await,
            SeccompSubcommand::Stop => stop(ctx).await,
            SeccompSubcommand::Status => status(ctx).await,
            SeccompSubcommand::Restart => start(ctx, true).await,
            SeccompSubcommand::Policies(args) => policies(ctx, args).await,
            SeccompSubcommand::Apply(args) => apply(ctx, args).await,
            SeccompSubcommand::Delete(args) => delete(ctx, args).await,
            SeccompSubcommand::Update(args) => update(ctx, args).await,
        }
    }
}

/// Job status row.
#[derive(Debug, Serialize, Tabled)]
pub(super) struct JobStatusRow {
    #[tabled(rename = "Job")]
    pub job: String,

    #[tabled(rename = "State")]
    pub state: String,

    #[tabled(rename = "Elapsed")]
    pub elapsed: String,

    #[tabled(rename = "Notice")]
    pub notice: String,
}

impl JobStatusRow {
    pub(super) fn from_lifecycle(job: &JobLifecycle) -> Self {
        Self {
            job: job.kind().to_string(),
            state: job.state().to_string(),
            elapsed: job
                .elapsed(Utc::now())
                .map(format_elapsed)
                .unwrap_or_else(|| "-".to_string()),
            notice: job.notice().unwrap_or("-").to_string(),
        }
    }
}

/// Policy row.
#[derive(Debug, Serialize, Tabled)]
struct PolicyRow {
    #[tabled(rename = "UID")]
    uid: String,

    #[tabled(rename = "Namespace")]
    namespace: String,

    #[tabled(rename = "Name")]
    name: String,

    #[tabled(rename = "Bucket")]
    bucket: String,

    #[tabled(rename = "Generated For")]
    generated_for: String,

    #[tabled(rename = "Workload")]
    workload: String,
}

impl PolicyRow {
    fn new(bucket: Bucket, entry: &PolicyEntry) -> Self {
        Self {
            uid: entry.id.uid.clone(),
            namespace: entry.id.namespace.clone(),
            name: entry.id.name.clone(),
            bucket: bucket_label(bucket).to_string(),
            generated_for: entry.generated_for.clone().unwrap_or_else(|| "-".to_string()),
            workload: entry
                .root_workload
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Namespace count row.
#[derive(Debug, Serialize, Tabled)]
struct NamespaceCountRow {
    #[tabled(rename = "Namespace")]
    namespace: String,

    #[tabled(rename = "Policies")]
    policies: usize,
}

fn bucket_label(bucket: Bucket) -> &'static str {
    match bucket {
        Bucket::Available => "available",
        Bucket::Applied => "applied",
        Bucket::Dangling => "dangling",
    }
}

async fn start(ctx: CommandContext, restart: bool) -> Result<()> {
    let namespace = ctx.require_namespace()?;
    let mut job = JobLifecycle::new(ctx.cluster()?, JobKind::Seccomp);

    if restart {
        job.restart(Some(&namespace)).await?;
    } else {
        job.start(Some(&namespace)).await?;
    }

    print_success(&format!("Recording syscalls in namespace {namespace}"));
    print_info("Run `td seccomp stop` to generate profiles.");
    Ok(())
}

async fn stop(ctx: CommandContext) -> Result<()> {
    let namespace = ctx.require_namespace()?;
    let mut job = JobLifecycle::new(ctx.cluster()?, JobKind::Seccomp);
    job.refresh().await?;

    let report = job.stop(Some(&namespace)).await?;
    for failure in &report.failures {
        print_warning(&failure.to_string());
    }
    let generated = report.into_result()?;

    print_success(&format!("Stopped; requested {} profile(s)", generated.len()));
    if let Some((start, end)) = job.recorded_window() {
        print_info(&format!(
            "Recorded from {} to {}",
            start.to_rfc3339(),
            end.to_rfc3339()
        ));
    }
    Ok(())
}

async fn status(ctx: CommandContext) -> Result<()> {
    let mut job = JobLifecycle::new(ctx.cluster()?, JobKind::Seccomp);
    job.refresh().await?;

    let row = JobStatusRow::from_lifecycle(&job);
    print_output(&[row], ctx.format);
    Ok(())
}

async fn policies(ctx: CommandContext, args: PoliciesArgs) -> Result<()> {
    let cluster = ctx.cluster()?;

    if args.all_namespaces {
        let (pods, policies) =
            tokio::try_join!(cluster.list_pods(None), cluster.list_policies(None))?;
        let namespaces: BTreeSet<&str> = pods
            .iter()
            .map(|p| p.metadata.namespace_or_default())
            .collect();
        let rows: Vec<_> = count_by_namespace(namespaces, &policies)
            .into_iter()
            .map(|(namespace, policies)| NamespaceCountRow {
                namespace,
                policies,
            })
            .collect();
        print_output(&rows, ctx.format);
        return Ok(());
    }

    let mut reconciler = PolicyReconciler::new(cluster, ctx.namespace()?);
    reconciler.refresh().await?;

    let buckets = reconciler.buckets();
    let rows: Vec<_> = [Bucket::Available, Bucket::Applied, Bucket::Dangling]
        .into_iter()
        .flat_map(|b| {
            buckets
                .buckets()
                .bucket(b)
                .iter()
                .map(move |entry| PolicyRow::new(b, entry))
        })
        .collect();
    print_output(&rows, ctx.format);
    Ok(())
}

async fn apply(ctx: CommandContext, args: SelectArgs) -> Result<()> {
    let mut reconciler = PolicyReconciler::new(ctx.cluster()?, ctx.namespace()?);
    reconciler.refresh().await?;

    let report = reconciler.apply_bulk(&args.uids).await;
    for rejection in &report.rejected {
        print_warning(&format!("{} {}", rejection.policy, rejection.reason));
    }
    let applied = report.into_result()?;

    if applied.is_empty() {
        print_info("No policies applied.");
    } else {
        print_success(&format!("Applied {} policy(ies)", applied.len()));
    }
    Ok(())
}

async fn delete(ctx: CommandContext, args: SelectArgs) -> Result<()> {
    let mut reconciler = PolicyReconciler::new(ctx.cluster()?, ctx.namespace()?);
    reconciler.refresh().await?;

    let report = reconciler.delete_bulk(&args.uids).await;
    for uid in &report.missing {
        print_warning(&format!("{uid} not found"));
    }
    let deleted = report.into_result()?;

    print_success(&format!("Deleted {} policy(ies)", deleted.len()));
    Ok(())
}

async fn update(ctx: CommandContext, args: UpdateArgs) -> Result<()> {
    let contents = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {:?}", args.file))?;
    let policy: SecurityPolicy = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse policy from {:?}", args.file))?;

    let reconciler = PolicyReconciler::new(ctx.cluster()?, ctx.namespace()?);
    reconciler.update_policy(&policy).await?;

    match ctx.format {
        OutputFormat::Json => print_single(&policy),
        OutputFormat::Table => print_success(&format!("Updated policy {}", policy.id())),
    }
    Ok(())
}
