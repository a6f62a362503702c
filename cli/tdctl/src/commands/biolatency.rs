//! Biolatency commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;
use tracedeck_agent::histogram::{parse_histogram, LatencyBucket};
use tracedeck_agent::{JobKind, JobLifecycle};

use crate::output::{print_info, print_output, print_single, print_success, OutputFormat};

use super::seccomp::JobStatusRow;
use super::CommandContext;

/// Biolatency commands.
#[derive(Debug, Args)]
pub struct BiolatencyCommand {
    #[command(subcommand)]
    command: BiolatencySubcommand,
}

#[derive(Debug, Subcommand)]
enum BiolatencySubcommand {
    /// Start recording block device I/O latency.
    Start,

    /// Stop recording. The gadget publishes the histogram on completion.
    Stop,

    /// Show the recording state and the last histogram.
    Status,
}

impl BiolatencyCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            BiolatencySubcommand::Start => start(ctx).await,
            BiolatencySubcommand::Stop => stop(ctx).await,
            BiolatencySubcommand::Status => status(ctx).await,
        }
    }
}

/// Histogram row.
#[derive(Debug, Serialize, Tabled)]
struct HistogramRow {
    #[tabled(rename = "usecs")]
    usecs: String,

    #[tabled(rename = "Count")]
    count: u64,
}

impl From<&LatencyBucket> for HistogramRow {
    fn from(bucket: &LatencyBucket) -> Self {
        Self {
            usecs: bucket.usecs.clone(),
            count: bucket.count,
        }
    }
}

#[derive(Debug, Serialize)]
struct BiolatencyStatus {
    #[serde(flatten)]
    job: JobStatusRow,
    histogram: Vec<LatencyBucket>,
}

async fn start(ctx: CommandContext) -> Result<()> {
    let mut job = JobLifecycle::new(ctx.cluster()?, JobKind::Biolatency);
    job.start(None).await?;

    print_success("Recording block device I/O latency");
    Ok(())
}

async fn stop(ctx: CommandContext) -> Result<()> {
    let mut job = JobLifecycle::new(ctx.cluster()?, JobKind::Biolatency);
    job.refresh().await?;
    job.stop(None).await?;

    print_success("Stopped recording");
    print_info("Run `td biolatency status` once the gadget has published the histogram.");
    Ok(())
}

async fn status(ctx: CommandContext) -> Result<()> {
    let mut job = JobLifecycle::new(ctx.cluster()?, JobKind::Biolatency);
    job.refresh().await?;

    let row = JobStatusRow::from_lifecycle(&job);
    let histogram = job.output().map(parse_histogram).unwrap_or_default();

    match ctx.format {
        OutputFormat::Json => {
            let status = BiolatencyStatus {
                job: row,
                histogram,
            };
            print_single(&status);
        }
        OutputFormat::Table => {
            print_output(&[row], ctx.format);
            if histogram.is_empty() {
                return Ok(());
            }
            println!();
            let rows: Vec<HistogramRow> = histogram.iter().map(HistogramRow::from).collect();
            print_output(&rows, ctx.format);
        }
    }
    Ok(())
}
