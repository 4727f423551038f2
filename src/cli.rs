//! Command-line interface definition.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ticketflow", version, about = "Ticket-to-PR workflow orchestrator")]
pub struct Cli {
    /// Config file path; defaults to `ticketflow.yaml` in the repo dir.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Repository the workflow operates on; qualifies the data directory.
    #[arg(long, global = true, default_value = ".")]
    pub repo: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the scheduler loop until interrupted.
    Run,
    /// Create a ticket and enqueue its start trigger.
    Create {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        objective: String,
    },
    /// Submit answers for a ticket awaiting them.
    Answer {
        ticket: String,
        #[arg(long)]
        text: String,
    },
    /// Approve the ticket's suspended output.
    Approve { ticket: String },
    /// Ask for a revision that keeps the structure (not a rejection).
    Refine {
        ticket: String,
        #[arg(long)]
        feedback: String,
    },
    /// Discard the suspended output and regenerate (counted).
    Reject {
        ticket: String,
        #[arg(long)]
        reason: String,
    },
    /// Cancel the ticket.
    Cancel {
        ticket: String,
        #[arg(long, default_value = "cancelled by operator")]
        reason: String,
    },
    /// Show one ticket's state.
    Status { ticket: String },
    /// List all tickets.
    List,
    /// Process queued events once and exit.
    Tick,
}
