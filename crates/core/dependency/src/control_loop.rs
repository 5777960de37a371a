use crate::context::InputSnapshot;
use crate::graph::{check_acyclic, direct_dependents, topological_order, transitive_dependents};
use crate::report::{EngineState, ManifoldReport, Report, WorkerState};
use crate::{worst_error, Context, EngineConfig, EngineError, Manifold, Severity, Worker};
use eyre::eyre;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Requests from `Engine` handles.
pub(crate) enum Request {
    Install { name: String, manifold: Manifold, reply: oneshot::Sender<Result<(), EngineError>> },
    Uninstall { name: String, reply: oneshot::Sender<Result<(), EngineError>> },
}

/// Notifications from the tasks that start and watch workers.
enum Event {
    Started { name: String, attempt: u64, result: Result<Arc<dyn Worker>, EngineError> },
    StartAborted { name: String, attempt: u64 },
    Exited { name: String, attempt: u64, result: Result<(), EngineError> },
}

impl Event {
    fn target(&self) -> (&str, u64) {
        match self {
            Event::Started { name, attempt, .. } | Event::StartAborted { name, attempt } | Event::Exited { name, attempt, .. } => {
                (name.as_str(), *attempt)
            }
        }
    }
}

#[derive(Default)]
struct WorkerInfo {
    state: WorkerState,
    worker: Option<Arc<dyn Worker>>,
    abort: Option<CancellationToken>,
    attempt: u64,
    version: u64,
    input_versions: HashMap<String, u64>,
    started_at: Option<Instant>,
    last_error: Option<EngineError>,
    failures: u32,
    delay: Duration,
    // waiting for an input to change before starting again
    parked: bool,
    stop_requested: bool,
    uninstalling: bool,
}

/// Owns the dependency graph and every worker. All mutation happens here, one request or event at a time.
pub(crate) struct ControlLoop {
    config: EngineConfig,
    manifolds: HashMap<String, Manifold>,
    workers: HashMap<String, WorkerInfo>,
    request_rx: mpsc::UnboundedReceiver<Request>,
    requests_closed: bool,
    event_tx: mpsc::UnboundedSender<Event>,
    event_rx: mpsc::UnboundedReceiver<Event>,
    kill: CancellationToken,
    report_tx: watch::Sender<Report>,
    next_attempt: u64,
    dying: bool,
    fatal: Option<EngineError>,
}

impl ControlLoop {
    pub(crate) fn new(
        config: EngineConfig,
        request_rx: mpsc::UnboundedReceiver<Request>,
        kill: CancellationToken,
        report_tx: watch::Sender<Report>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            config,
            manifolds: HashMap::new(),
            workers: HashMap::new(),
            request_rx,
            requests_closed: false,
            event_tx,
            event_rx,
            kill,
            report_tx,
            next_attempt: 0,
            dying: false,
            fatal: None,
        }
    }

    pub(crate) async fn run(mut self) -> Result<(), EngineError> {
        info!("Dependency engine started");
        loop {
            if self.dying && self.all_stopped() {
                break;
            }
            // requests and events are each FIFO, but not ordered against each other
            tokio::select! {
                _ = self.kill.cancelled(), if !self.dying => {
                    self.begin_shutdown(None);
                }
                request = self.request_rx.recv(), if !self.requests_closed => match request {
                    Some(request) => self.handle_request(request),
                    None => {
                        debug!("All engine handles dropped");
                        self.requests_closed = true;
                        self.begin_shutdown(None);
                    }
                },
                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event);
                }
            }
            self.process_stops();
            self.start_ready();
            self.publish_report();
        }

        let result = match self.fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        };
        self.publish_report();
        self.report_tx.send_modify(|report| {
            report.state = EngineState::Stopped;
            report.error = result.as_ref().err().map(|err| err.to_string());
        });
        match &result {
            Ok(()) => info!("Dependency engine stopped"),
            Err(err) => error!(error = %err, "Dependency engine stopped with fatal error"),
        }
        result
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Install { name, manifold, reply } => {
                let result = self.install(name, manifold);
                let _ = reply.send(result);
            }
            Request::Uninstall { name, reply } => {
                let result = self.uninstall(name);
                let _ = reply.send(result);
            }
        }
    }

    fn install(&mut self, name: String, manifold: Manifold) -> Result<(), EngineError> {
        if self.dying {
            return Err(EngineError::Dying);
        }
        if self.manifolds.contains_key(&name) {
            return Err(EngineError::AlreadyInstalled(name));
        }
        check_acyclic(&self.manifolds, &name, &manifold)?;
        self.check_input_types(&name, &manifold)?;

        info!(name = %name, inputs = ?manifold.input_names().collect::<Vec<_>>(), "Installing manifold");
        self.manifolds.insert(name.clone(), manifold);
        self.workers.insert(name.clone(), WorkerInfo::default());
        self.unpark_dependents(&name);
        Ok(())
    }

    // Typed edges are checked whenever both ends are installed.
    fn check_input_types(&self, name: &str, manifold: &Manifold) -> Result<(), EngineError> {
        for input in manifold.inputs() {
            if let (Some(expected), Some(producer)) = (input.kind, self.manifolds.get(&input.name)) {
                if producer.output_kind() != Some(expected) {
                    return Err(EngineError::TypeMismatch {
                        name: input.name.clone(),
                        expected: expected.type_name(),
                        actual: producer.output_kind().map_or("no output", |kind| kind.type_name()),
                    });
                }
            }
        }
        for dependent in self.manifolds.values() {
            for input in dependent.inputs().iter().filter(|input| input.name == name) {
                if let Some(expected) = input.kind {
                    if manifold.output_kind() != Some(expected) {
                        return Err(EngineError::TypeMismatch {
                            name: name.to_string(),
                            expected: expected.type_name(),
                            actual: manifold.output_kind().map_or("no output", |kind| kind.type_name()),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn uninstall(&mut self, name: String) -> Result<(), EngineError> {
        if self.dying {
            return Err(EngineError::Dying);
        }
        if !self.manifolds.contains_key(&name) {
            return Err(EngineError::NotInstalled(name));
        }
        let dependents = direct_dependents(&self.manifolds, &name);
        if !dependents.is_empty() {
            return Err(EngineError::StillDepended { name, dependents });
        }

        info!(name = %name, "Uninstalling manifold");
        if let Some(info) = self.workers.get_mut(&name) {
            info.uninstalling = true;
            if info.state != WorkerState::Stopped {
                info.stop_requested = true;
            }
        }
        self.sweep_uninstalled();
        Ok(())
    }

    fn handle_event(&mut self, event: Event) {
        let (name, attempt) = event.target();
        let current = self.workers.get(name).map(|info| info.attempt);
        if current != Some(attempt) {
            warn!(name, attempt, "Dropping event for stale worker");
            if let Event::Started { result: Ok(worker), .. } = event {
                worker.kill();
            }
            return;
        }

        match event {
            Event::Started { name, attempt, result: Ok(worker) } => self.on_started(name, attempt, worker),
            Event::Started { name, result: Err(err), .. } => self.on_exit(name, Err(err)),
            Event::StartAborted { name, .. } => {
                trace!(name = %name, "Start aborted");
                if let Some(info) = self.workers.get_mut(&name) {
                    info.state = WorkerState::Stopped;
                    info.abort = None;
                    info.stop_requested = false;
                }
                self.sweep_uninstalled();
            }
            Event::Exited { name, result, .. } => self.on_exit(name, result),
        }
    }

    fn on_started(&mut self, name: String, attempt: u64, worker: Arc<dyn Worker>) {
        let Some(info) = self.workers.get_mut(&name) else {
            worker.kill();
            return;
        };
        let Some(abort) = info.abort.clone() else {
            worker.kill();
            return;
        };

        info.version += 1;
        info.started_at = Some(Instant::now());
        info.worker = Some(worker.clone());
        info.delay = Duration::ZERO;
        if abort.is_cancelled() {
            debug!(name = %name, "Worker started after stop was requested");
            info.state = WorkerState::Stopping;
        } else {
            info!(name = %name, version = info.version, "Worker started");
            info.state = WorkerState::Started;
        }
        let version = info.version;

        let event_tx = self.event_tx.clone();
        let grace = self.config.stop_grace_timeout;
        let task_name = name.clone();
        tokio::spawn(async move {
            let result = watch_worker(&task_name, worker, abort, grace).await;
            let _ = event_tx.send(Event::Exited { name: task_name, attempt, result });
        });

        self.unpark_dependents(&name);
        // Dependents built against an older version of this worker must not keep running.
        for dependent in direct_dependents(&self.manifolds, &name) {
            let stale = self.workers.get(&dependent).is_some_and(|info| {
                matches!(info.state, WorkerState::Starting | WorkerState::Started)
                    && info.input_versions.get(&name).is_some_and(|seen| *seen != version)
            });
            if stale {
                debug!(name = %dependent, input = %name, "Bouncing dependent of restarted worker");
                self.request_stop(&dependent);
            }
        }
    }

    fn on_exit(&mut self, name: String, result: Result<(), EngineError>) {
        let Some(manifold) = self.manifolds.get(&name).cloned() else {
            return;
        };
        let Some(info) = self.workers.get_mut(&name) else {
            return;
        };
        let ran_for = info.started_at.take().map(|started_at| started_at.elapsed()).unwrap_or_default();
        let was_stopping = info.stop_requested || info.state == WorkerState::Stopping;
        info.state = WorkerState::Stopped;
        info.worker = None;
        info.abort = None;
        info.stop_requested = false;

        let err = match result {
            Ok(()) => None,
            Err(err @ EngineError::StopTimeout { .. }) => Some(err),
            Err(err) => Some(manifold.filter(err)),
        };
        let severity = err.as_ref().map(|err| err.severity());

        if let Some(err) = err.as_ref().filter(|err| err.is_fatal()) {
            error!(name = %name, error = %err, "Worker returned fatal error");
            info.last_error = Some(err.clone());
            self.begin_shutdown(Some(err.clone()));
            return;
        }

        if self.dying {
            debug!(name = %name, "Worker stopped during shutdown");
            info.last_error = err;
            return;
        }

        if info.uninstalling {
            info.last_error = Some(EngineError::Uninstalled);
            self.stop_dependents(&name);
            self.sweep_uninstalled();
            return;
        }

        if was_stopping {
            debug!(name = %name, "Worker stopped on request");
            info.last_error = err.clone();
            info.failures = 0;
            info.delay = Duration::ZERO;
        } else {
            match severity {
                None | Some(Severity::Bounce) => {
                    info!(name = %name, "Worker exited, restarting");
                    info.failures = 0;
                    info.delay = self.config.bounce_delay;
                }
                Some(Severity::Missing) => {
                    debug!(name = %name, reason = ?err, "Worker waiting for inputs");
                    info.parked = true;
                }
                Some(Severity::Retryable) | Some(Severity::Fatal) => {
                    if ran_for >= self.config.backoff_reset_time {
                        info.failures = 0;
                    }
                    info.failures = info.failures.saturating_add(1);
                    info.delay = self.config.restart_delay(info.failures);
                    if let Some(err) = err.as_ref() {
                        error!(name = %name, error = %err, failures = info.failures, delay = ?info.delay, "Worker failed");
                    }
                }
            }
            info.last_error = err.clone();
        }

        self.stop_dependents(&name);
        if matches!(err, Some(EngineError::Uninstalled)) && !was_stopping {
            self.uninstall_stopped(&name);
        }
    }

    // A worker exiting with `Uninstalled` asks for its own removal.
    fn uninstall_stopped(&mut self, name: &str) {
        let dependents = direct_dependents(&self.manifolds, name);
        if dependents.is_empty() {
            info!(name = %name, "Worker asked to be uninstalled");
            if let Some(info) = self.workers.get_mut(name) {
                info.uninstalling = true;
            }
            self.sweep_uninstalled();
        } else {
            warn!(name = %name, dependents = ?dependents, "Worker asked to be uninstalled but is still depended on");
        }
    }

    fn begin_shutdown(&mut self, cause: Option<EngineError>) {
        // ties keep the first error
        if let Some(cause) = cause {
            self.fatal = Some(match self.fatal.take() {
                Some(first) => worst_error(first, cause),
                None => cause,
            });
        }
        if self.dying {
            return;
        }
        info!("Dependency engine stopping");
        self.dying = true;
        for info in self.workers.values_mut() {
            if info.state != WorkerState::Stopped {
                info.stop_requested = true;
            }
        }
    }

    /// Marks `name` and everything running on top of it for stopping.
    fn request_stop(&mut self, name: &str) {
        let mut names = vec![name.to_string()];
        names.extend(transitive_dependents(&self.manifolds, name));
        for name in names {
            if let Some(info) = self.workers.get_mut(&name) {
                if info.state != WorkerState::Stopped {
                    info.stop_requested = true;
                }
            }
        }
    }

    fn stop_dependents(&mut self, name: &str) {
        for dependent in direct_dependents(&self.manifolds, name) {
            self.request_stop(&dependent);
        }
    }

    /// Stops marked workers, dependents before their dependencies.
    fn process_stops(&mut self) {
        for name in topological_order(&self.manifolds).iter().rev() {
            let Some(info) = self.workers.get(name) else {
                continue;
            };
            if !info.stop_requested || info.state == WorkerState::Stopping {
                continue;
            }
            if info.state == WorkerState::Stopped {
                if let Some(info) = self.workers.get_mut(name) {
                    info.stop_requested = false;
                }
                continue;
            }
            let live_dependents: Vec<String> = direct_dependents(&self.manifolds, name)
                .into_iter()
                .filter(|dependent| self.workers.get(dependent).is_some_and(|info| info.state != WorkerState::Stopped))
                .collect();
            if !live_dependents.is_empty() {
                trace!(name = %name, dependents = ?live_dependents, "Waiting for dependents to stop");
                for dependent in live_dependents {
                    self.request_stop(&dependent);
                }
                continue;
            }

            if let Some(info) = self.workers.get_mut(name) {
                debug!(name = %name, "Stopping worker");
                if let Some(abort) = info.abort.as_ref() {
                    abort.cancel();
                }
                if info.state == WorkerState::Started {
                    info.state = WorkerState::Stopping;
                }
            }
        }
        self.sweep_uninstalled();
    }

    /// Starts every stopped worker whose inputs are all running, dependencies first.
    fn start_ready(&mut self) {
        if self.dying {
            return;
        }
        for name in topological_order(&self.manifolds) {
            let Some(info) = self.workers.get(&name) else {
                continue;
            };
            if info.state != WorkerState::Stopped || info.parked || info.uninstalling || info.stop_requested {
                continue;
            }
            let Some(manifold) = self.manifolds.get(&name) else {
                continue;
            };
            let ready = manifold.input_names().all(|input| {
                self.workers.get(input).is_some_and(|info| info.state == WorkerState::Started && !info.stop_requested && !info.uninstalling)
            });
            // a dependent still winding down must not see this worker come back
            let dependents_stopped = direct_dependents(&self.manifolds, &name)
                .iter()
                .all(|dependent| self.workers.get(dependent).is_none_or(|info| info.state == WorkerState::Stopped));
            if ready && dependents_stopped {
                self.schedule_start(&name);
            }
        }
    }

    fn schedule_start(&mut self, name: &str) {
        let Some(manifold) = self.manifolds.get(name).cloned() else {
            return;
        };

        let mut snapshots = HashMap::new();
        let mut input_versions = HashMap::new();
        for input in manifold.input_names() {
            let snapshot = match (self.workers.get(input), self.manifolds.get(input)) {
                (Some(info), Some(producer)) if info.state == WorkerState::Started => {
                    let output = match info.worker.as_ref().and_then(|worker| producer.output(worker.as_ref())) {
                        Some(Ok(output)) => Some(output),
                        Some(Err(err)) => {
                            warn!(name = %input, error = %err, "Cannot extract output");
                            None
                        }
                        None => None,
                    };
                    input_versions.insert(input.to_string(), info.version);
                    Some(InputSnapshot { version: info.version, output })
                }
                _ => None,
            };
            snapshots.insert(input.to_string(), snapshot);
        }

        self.next_attempt += 1;
        let attempt = self.next_attempt;
        let abort = CancellationToken::new();
        let Some(info) = self.workers.get_mut(name) else {
            return;
        };
        info.state = WorkerState::Starting;
        info.attempt = attempt;
        info.abort = Some(abort.clone());
        info.input_versions = input_versions;
        let delay = info.delay;
        debug!(name = %name, delay = ?delay, "Starting worker");

        let ctx = Context::new(name.to_string(), snapshots, abort.clone());
        let event_tx = self.event_tx.clone();
        let grace = self.config.stop_grace_timeout;
        let task_name = name.to_string();
        tokio::spawn(async move {
            let event = match start_worker(&task_name, &manifold, ctx, delay, abort, grace).await {
                Some(result) => Event::Started { name: task_name, attempt, result },
                None => Event::StartAborted { name: task_name, attempt },
            };
            let _ = event_tx.send(event);
        });
    }

    fn unpark_dependents(&mut self, name: &str) {
        for dependent in direct_dependents(&self.manifolds, name) {
            if let Some(info) = self.workers.get_mut(&dependent) {
                info.parked = false;
            }
        }
    }

    fn sweep_uninstalled(&mut self) {
        let removable: Vec<String> = self
            .workers
            .iter()
            .filter(|(_, info)| info.uninstalling && info.state == WorkerState::Stopped)
            .map(|(name, _)| name.clone())
            .collect();
        for name in removable {
            info!(name = %name, "Manifold uninstalled");
            self.workers.remove(&name);
            self.manifolds.remove(&name);
        }
    }

    fn all_stopped(&self) -> bool {
        self.workers.values().all(|info| info.state == WorkerState::Stopped)
    }

    fn publish_report(&self) {
        let manifolds = self
            .workers
            .iter()
            .map(|(name, info)| {
                let manifold = self.manifolds.get(name);
                let report = ManifoldReport {
                    state: info.state,
                    inputs: manifold.map(|manifold| manifold.input_names().map(str::to_string).collect()).unwrap_or_default(),
                    output_type: manifold.and_then(|manifold| manifold.output_kind()).map(|kind| kind.type_name()),
                    error: info.last_error.as_ref().map(|err| err.to_string()),
                    version: info.version,
                    failures: info.failures,
                };
                (name.clone(), report)
            })
            .collect();
        let report = Report {
            state: if self.dying { EngineState::Stopping } else { EngineState::Started },
            error: self.fatal.as_ref().map(|err| err.to_string()),
            manifolds,
        };
        self.report_tx.send_replace(report);
    }
}

/// Waits out the restart delay and runs the start function. `None` means the start was aborted before
/// the start function ran.
async fn start_worker(
    name: &str,
    manifold: &Manifold,
    ctx: Context,
    delay: Duration,
    abort: CancellationToken,
    grace: Duration,
) -> Option<Result<Arc<dyn Worker>, EngineError>> {
    tokio::select! {
        _ = abort.cancelled() => return None,
        _ = tokio::time::sleep(delay) => {}
    }
    trace!(name, "Calling start function");
    let start = async move {
        match panic::catch_unwind(AssertUnwindSafe(|| manifold.start(ctx))) {
            Ok(start) => AssertUnwindSafe(start).catch_unwind().await,
            Err(panic) => Err(panic),
        }
    };
    tokio::pin!(start);
    let result = tokio::select! {
        biased;
        result = &mut start => unwind_start(name, result),
        _ = abort.cancelled() => match tokio::time::timeout(grace, &mut start).await {
            Ok(result) => unwind_start(name, result),
            Err(_) => Err(EngineError::StopTimeout { name: name.to_string(), timeout: grace }),
        },
    };
    Some(result)
}

// A panicking start function fails the start like any other error.
fn unwind_start(
    name: &str,
    result: Result<Result<Arc<dyn Worker>, EngineError>, Box<dyn Any + Send>>,
) -> Result<Arc<dyn Worker>, EngineError> {
    result.unwrap_or_else(|_| {
        error!(name, "Start function panicked");
        Err(EngineError::failed(eyre!("{name} start function panicked")))
    })
}

/// Waits for the worker to finish. Once `abort` fires the worker is killed and given `grace` to stop.
async fn watch_worker(name: &str, worker: Arc<dyn Worker>, abort: CancellationToken, grace: Duration) -> Result<(), EngineError> {
    tokio::select! {
        biased;
        result = worker.wait() => return result,
        _ = abort.cancelled() => {}
    }
    worker.kill();
    match tokio::time::timeout(grace, worker.wait()).await {
        Ok(result) => result,
        Err(_) => {
            error!(name, timeout = ?grace, "Worker did not stop in time");
            Err(EngineError::StopTimeout { name: name.to_string(), timeout: grace })
        }
    }
}
