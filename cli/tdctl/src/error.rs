//! Error handling and display for the CLI.

use colored::Colorize;
use thiserror::Error;
use tracedeck_agent::TraceError;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("No namespace selected. Pass --namespace or run `td config set-namespace`.")]
    NamespaceRequired,

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    let trace_err = err.downcast_ref::<TraceError>().or_else(|| {
        err.downcast_ref::<CliError>().and_then(|e| match e {
            CliError::Trace(inner) => Some(inner),
            _ => None,
        })
    });

    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        if matches!(cli_err, CliError::NamespaceRequired) {
            eprintln!(
                "\n{}",
                "Hint: Run `td config set-namespace <namespace>` to set a default.".yellow()
            );
        }
    }

    let Some(trace_err) = trace_err else {
        return;
    };

    for failure in trace_err.item_failures() {
        eprintln!("  {} {}", "-".red(), failure);
    }

    match trace_err {
        TraceError::LookupFailed { message, .. } | TraceError::PatchRejected { message, .. }
            if message.contains("401") =>
        {
            eprintln!(
                "\n{}",
                "Hint: Your token may be invalid. Run `td config set-token`.".yellow()
            );
        }
        TraceError::LookupFailed { message, .. } | TraceError::PatchRejected { message, .. }
            if message.contains("403") =>
        {
            eprintln!(
                "\n{}",
                "Hint: Your service account may not have permission for this operation.".yellow()
            );
        }
        TraceError::LookupFailed { message, .. } if message.contains("404") => {
            eprintln!(
                "\n{}",
                "Hint: Is Inspektor Gadget deployed in the `gadget` namespace?".yellow()
            );
        }
        TraceError::Stream(_) => {
            eprintln!(
                "\n{}",
                "Hint: Check your network connection and API endpoint.".yellow()
            );
        }
        _ => {}
    }
}
