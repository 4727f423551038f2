//! Shared test fixtures: a scripted step executor and a wired orchestrator
//! harness over a temp-dir file store.

use crate::events::EventBus;
use crate::graph::StepSpec;
use crate::orchestrator::Orchestrator;
use crate::policy::{RejectionPolicy, RetryPolicy};
use crate::step::{StepContext, StepExecutor, StepResult};
use crate::store::FileTicketStore;
use crate::structured_logger::StructuredLogger;
use crate::ticket::{TenantId, Ticket, TicketId};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

/// Replays scripted results per step id and records every call. Steps with
/// no script succeed with a canned output.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, VecDeque<StepResult>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, step_id: &str, results: Vec<StepResult>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(step_id.to_string(), results.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, step_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == step_id)
            .count()
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(&self, spec: &StepSpec, _ctx: StepContext) -> StepResult {
        self.calls.lock().unwrap().push(spec.id.to_string());
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(spec.id)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| StepResult::Success(json!(format!("{} output", spec.id))))
    }
}

/// A fully wired orchestrator over a temp-dir store and scripted executor.
pub struct Harness {
    pub store: Arc<FileTicketStore>,
    pub executor: Arc<ScriptedExecutor>,
    pub orchestrator: Arc<Orchestrator>,
    pub bus: EventBus,
    pub cancel_tx: watch::Sender<bool>,
    pub logger: Arc<StructuredLogger>,
    // Held for the lifetime of the harness.
    pub _dir: TempDir,
}

pub fn harness() -> Harness {
    harness_with(RetryPolicy::immediate(3), RejectionPolicy::default())
}

pub fn harness_with(retry: RetryPolicy, rejection: RejectionPolicy) -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let store = Arc::new(FileTicketStore::new(dir.path().join("store")).expect("store"));
    let logger = Arc::new(
        StructuredLogger::new("test-process", &dir.path().join("logs")).expect("logger"),
    );
    let executor = Arc::new(ScriptedExecutor::new());
    let bus = EventBus::default();
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let tickets: Arc<dyn crate::store::TicketStore> = store.clone();
    let checkpoints: Arc<dyn crate::store::CheckpointStore> = store.clone();
    let scripted: Arc<dyn StepExecutor> = executor.clone();
    let orchestrator = Arc::new(Orchestrator::new(
        tickets,
        checkpoints,
        scripted,
        bus.clone(),
        Arc::clone(&logger),
        retry,
        rejection,
        Duration::from_secs(5),
        cancel_rx,
    ));

    Harness {
        store,
        executor,
        orchestrator,
        bus,
        cancel_tx,
        logger,
        _dir: dir,
    }
}

impl Harness {
    pub async fn create_ticket(&self) -> TicketId {
        use crate::store::TicketStore;
        let ticket = Ticket::new(TenantId::new("acme"), "Add CSV export", "Users need CSV");
        self.store.create(&ticket).await.expect("create ticket");
        ticket.id
    }

    pub async fn ticket(&self, id: &TicketId) -> Ticket {
        use crate::store::TicketStore;
        self.store
            .load(id)
            .await
            .expect("load ticket")
            .expect("ticket exists")
    }
}
