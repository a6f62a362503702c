//! Trace commands (traceloop listing and log dumps).

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;
use tracedeck_agent::traces::{
    fetch_traces, log_command, log_target, sort_traces, TraceEntry, TraceFilter,
    DEFAULT_LOG_LINES, LOG_LINE_CHOICES,
};
use tracedeck_agent::LogTailSession;
use tracing::debug;

use crate::error::CliError;
use crate::output::{print_output, print_single, print_warning, OutputFormat};

use super::CommandContext;

/// Trace commands.
#[derive(Debug, Args)]
pub struct TracesCommand {
    #[command(subcommand)]
    command: TracesSubcommand,
}

#[derive(Debug, Subcommand)]
enum TracesSubcommand {
    /// List traces recorded by the gadget pods.
    List(ListTracesArgs),

    /// Dump the log of one trace.
    Logs(LogsArgs),
}

#[derive(Debug, Args)]
struct ListTracesArgs {
    /// Case-insensitive match on namespace, pod and status.
    #[arg(long, short = 's')]
    search: Option<String>,
}

#[derive(Debug, Args)]
struct LogsArgs {
    /// Trace ID.
    traceid: String,

    /// Number of trailing lines (100, 500, 1000 or 2500).
    #[arg(long, short = 'l', default_value_t = DEFAULT_LOG_LINES, value_parser = parse_lines)]
    lines: usize,
}

fn parse_lines(s: &str) -> Result<usize, String> {
    let lines: usize = s.parse().map_err(|_| format!("not a number: {s}"))?;
    if LOG_LINE_CHOICES.contains(&lines) {
        Ok(lines)
    } else {
        Err(format!("must be one of {LOG_LINE_CHOICES:?}"))
    }
}

impl TracesCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            TracesSubcommand::List(args) => list_traces(ctx, args).await,
            TracesSubcommand::Logs(args) => dump_logs(ctx, args).await,
        }
    }
}

/// Trace row.
#[derive(Debug, Serialize, Tabled)]
struct TraceRow {
    #[tabled(rename = "Trace ID")]
    traceid: String,

    #[tabled(rename = "Namespace")]
    namespace: String,

    #[tabled(rename = "Pod")]
    podname: String,

    #[tabled(rename = "Status")]
    status: String,

    #[tabled(rename = "Gadget Pod")]
    gadget_pod: String,
}

impl From<TraceEntry> for TraceRow {
    fn from(entry: TraceEntry) -> Self {
        Self {
            traceid: entry.record.traceid,
            namespace: entry.record.namespace,
            podname: entry.record.podname,
            status: entry.record.status,
            gadget_pod: entry.gadget_pod,
        }
    }
}

async fn list_traces(ctx: CommandContext, args: ListTracesArgs) -> Result<()> {
    let cluster = ctx.cluster()?;
    let filter = TraceFilter {
        namespaces: ctx
            .namespace()?
            .map(|ns| ns.into_string())
            .into_iter()
            .collect(),
        search: args.search,
    };

    let mut traces = filter.apply(fetch_traces(cluster.as_ref()).await?);
    sort_traces(&mut traces);

    let rows: Vec<TraceRow> = traces.into_iter().map(TraceRow::from).collect();
    print_output(&rows, ctx.format);
    Ok(())
}

#[derive(Debug, Serialize)]
struct LogDump {
    traceid: String,
    lines: usize,
    text: String,
}

async fn dump_logs(ctx: CommandContext, args: LogsArgs) -> Result<()> {
    let cluster = ctx.cluster()?;
    let entry = fetch_traces(cluster.as_ref())
        .await?
        .into_iter()
        .find(|t| t.record.traceid == args.traceid)
        .ok_or_else(|| CliError::NotFound(format!("trace {}", args.traceid)))?;

    let command = log_command(&entry.record.traceid, args.lines)?;
    let mut session =
        LogTailSession::open(cluster, log_target(&entry), command, args.lines).await?;

    let interrupted = tokio::select! {
        _ = session.finished() => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    let snapshot = session.snapshot();
    session.close().await;
    debug!(revision = snapshot.revision, interrupted, "Log dump complete");

    if interrupted {
        print_warning("Interrupted; output may be incomplete");
    }

    match ctx.format {
        OutputFormat::Json => print_single(&LogDump {
            traceid: args.traceid,
            lines: args.lines,
            text: snapshot.text,
        }),
        OutputFormat::Table => print!("{}", snapshot.text),
    }
    Ok(())
}
