mod checkpoint;
mod cli;
mod clients;
mod config;
mod events;
mod failure;
mod graph;
mod orchestrator;
mod policy;
mod scheduler;
mod state_model;
mod step;
mod steps;
mod store;
mod structured_logger;
mod ticket;
mod ticket_paths;

#[cfg(test)]
mod test_support;

use crate::cli::{Cli, Command};
use crate::clients::{CommandAgentRunner, FileTracker, GitCliVcs, LocalVcs, VcsClient};
use crate::config::{OrchestratorConfig, VcsMode};
use crate::events::EventBus;
use crate::orchestrator::Orchestrator;
use crate::scheduler::Scheduler;
use crate::state_model::TicketEvent;
use crate::steps::WorkflowExecutor;
use crate::store::{EventInbox, FileTicketStore, TicketStore};
use crate::structured_logger::StructuredLogger;
use crate::ticket::{TenantId, Ticket, TicketId};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Everything a command needs, wired per the config.
struct Runtime {
    store: Arc<FileTicketStore>,
    scheduler: Scheduler,
    bus: EventBus,
    shutdown_tx: watch::Sender<bool>,
}

fn build_runtime(repo: &Path, config: &OrchestratorConfig) -> Result<Runtime> {
    let repo = repo
        .canonicalize()
        .with_context(|| format!("Invalid repo dir: {}", repo.display()))?;

    let store = Arc::new(FileTicketStore::new(ticket_paths::store_dir(&repo)?)?);
    let logger = Arc::new(StructuredLogger::new(
        &uuid::Uuid::new_v4().to_string(),
        &ticket_paths::logs_dir(&repo)?,
    )?);
    tracing::debug!("structured log at {}", logger.path().display());
    let bus = EventBus::default();

    let agent = Arc::new(CommandAgentRunner::new(
        config.agents.clone(),
        config.bindings.clone(),
        repo.clone(),
    ));
    let tracker = Arc::new(FileTracker::new(ticket_paths::tracker_dir(&repo)?));
    let vcs: Arc<dyn VcsClient> = match config.vcs.mode {
        VcsMode::Local => Arc::new(LocalVcs::new(
            ticket_paths::ticketflow_home_dir()?.join(format!(
                "vcs-{}.json",
                ticket_paths::repo_hash(&repo)
            )),
        )),
        VcsMode::Git => Arc::new(GitCliVcs::new(PathBuf::from(&config.vcs.repo_dir))),
    };
    let executor = Arc::new(WorkflowExecutor::new(
        agent,
        tracker,
        vcs,
        config.vcs.branch_prefix.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tickets: Arc<dyn TicketStore> = store.clone();
    let checkpoints: Arc<dyn crate::store::CheckpointStore> = store.clone();
    let orchestrator = Arc::new(Orchestrator::new(
        tickets,
        checkpoints,
        executor,
        bus.clone(),
        Arc::clone(&logger),
        config.retry,
        config.rejection,
        config.step_timeout(),
        shutdown_rx.clone(),
    ));
    let scheduler = Scheduler::new(
        Arc::clone(&store),
        Arc::clone(&orchestrator),
        logger,
        config.scheduler,
        shutdown_rx,
    );

    Ok(Runtime {
        store,
        scheduler,
        bus,
        shutdown_tx,
    })
}

async fn enqueue(runtime: &Runtime, ticket: &str, event: TicketEvent) -> Result<()> {
    let ticket_id = TicketId::parse(ticket)?;
    runtime.store.enqueue(&ticket_id, &event).await?;
    println!("queued {} for ticket {}", event.kind(), ticket_id);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.repo.join("ticketflow.yaml"));
    let config = OrchestratorConfig::load(&config_path)?;
    let runtime = build_runtime(&cli.repo, &config)?;

    match cli.command {
        Command::Run => {
            let shutdown_tx = runtime.shutdown_tx.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = shutdown_tx.send(true);
                }
            });
            let mut changes = runtime.bus.subscribe();
            tokio::spawn(async move {
                while let Ok(change) = changes.recv().await {
                    println!(
                        "{} {} -> {}",
                        change.ticket_id, change.previous, change.new
                    );
                }
            });
            tracing::info!("scheduler running; ctrl-c to stop");
            runtime.scheduler.run().await?;
        }
        Command::Create {
            tenant,
            title,
            objective,
        } => {
            let ticket = Ticket::new(TenantId::new(tenant), title, objective);
            runtime.store.create(&ticket).await?;
            runtime.store.enqueue(&ticket.id, &TicketEvent::Start).await?;
            println!("created ticket {}", ticket.id);
        }
        Command::Answer { ticket, text } => {
            enqueue(
                &runtime,
                &ticket,
                TicketEvent::HumanAnswered {
                    answers: serde_json::Value::String(text),
                },
            )
            .await?;
        }
        Command::Approve { ticket } => {
            enqueue(&runtime, &ticket, TicketEvent::HumanApproved).await?;
        }
        Command::Refine { ticket, feedback } => {
            enqueue(&runtime, &ticket, TicketEvent::HumanRefined { feedback }).await?;
        }
        Command::Reject { ticket, reason } => {
            enqueue(&runtime, &ticket, TicketEvent::HumanRejected { reason }).await?;
        }
        Command::Cancel { ticket, reason } => {
            enqueue(&runtime, &ticket, TicketEvent::Cancel { reason }).await?;
        }
        Command::Status { ticket } => {
            let ticket_id = TicketId::parse(&ticket)?;
            match runtime.store.load(&ticket_id).await? {
                Some(ticket) => {
                    println!("{} [{}] {}", ticket.id, ticket.state, ticket.title);
                    if let Some(failure) = &ticket.failure {
                        println!("  failed: {} ({})", failure.message, failure.kind);
                    }
                    for (phase, record) in &ticket.rejections {
                        println!("  rejections[{}]: {}", phase, record.count);
                    }
                }
                None => println!("no such ticket"),
            }
        }
        Command::List => {
            for ticket in runtime.store.list().await? {
                println!("{} [{}] {}", ticket.id, ticket.state, ticket.title);
            }
        }
        Command::Tick => {
            let processed = runtime.scheduler.tick().await?;
            println!("processed {} invocation(s)", processed);
        }
    }

    Ok(())
}
