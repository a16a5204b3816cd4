use std::sync::Arc;

use stepgate_core::admission::AdmissionGate;
use stepgate_core::auth::Authorizer;
use stepgate_core::config::{Config, RouteMode};
use stepgate_core::orchestrator::ledger::RunLedger;
use stepgate_core::orchestrator::{Orchestrator, Step};
use stepgate_core::sink::{open_sink, Sink};
use stepgate_core::task::WorkerTask;
use tracing::info;

/// Shared application state passed to all route handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AdmissionGate>,
    pub authorizer: Arc<Authorizer>,
    pub worker: Arc<WorkerTask>,
    pub orchestrator: Arc<Orchestrator>,
    pub route: RouteMode,
}

impl AppState {
    /// Wire every component from a resolved [`Config`].
    ///
    /// When a ledger path is configured, runs left `PENDING` or `RUNNING` by a
    /// previous process are failed before the first request is served.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let sink = open_sink(&config.sink, &config.bucket_identifier)?;

        let ledger = match &config.ledger_path {
            Some(path) => {
                let ledger = RunLedger::open(path)?;
                let recovered = ledger.startup_recovery()?;
                if recovered > 0 {
                    info!(recovered, "failed runs interrupted by a previous shutdown");
                }
                ledger
            }
            None => RunLedger::in_memory()?,
        };

        Ok(Self::with_components(config, sink, Arc::new(ledger)))
    }

    /// Wire components around an existing sink and ledger.
    pub fn with_components(config: &Config, sink: Arc<dyn Sink>, ledger: Arc<RunLedger>) -> Self {
        let role = config.role.resolve();
        info!(
            role = role.label(),
            grants_bucket_access = role.grants_bucket_access(),
            bucket = %config.bucket_identifier,
            route = config.route.as_str(),
            "execution role resolved"
        );

        let worker = Arc::new(WorkerTask::new(sink, config.task_timeout));
        let steps = vec![worker.clone() as Arc<dyn Step>];
        let orchestrator = Orchestrator::new(steps, config.retry, role, ledger);

        Self {
            gate: Arc::new(AdmissionGate::new(config.admission)),
            authorizer: Arc::new(Authorizer::new(config.credential.clone())),
            worker,
            orchestrator: Arc::new(orchestrator),
            route: config.route,
        }
    }
}
