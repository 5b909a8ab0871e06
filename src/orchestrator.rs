//! The migration engine: a bounded worker pool plus a polling control loop.
//!
//! [`MigrateEngine::submit`] wraps each workflow id in a [`Job`] and hands it
//! to the pool. Workers run the job's steps synchronously on blocking
//! threads. A single control task wakes up every poll interval, picks up the
//! tasks that have finished and closes their jobs.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::EngineSettings;
use crate::error::{EngineError, MigrateError};
use crate::resolve::Resolver;
use crate::script::Script;
use crate::source::{SourceConnector, SourceInstance, WorkflowId};
use crate::state_machine::{Job, JobStatus, JobSummary, MigrationContext, Transition};
use crate::target::{TargetRuntime, create_unique_job};
use crate::translate::{TranslatorRegistry, build_parameters, synthesize, target_job_name};

/// Collaborators every worker needs.
struct Workers {
    settings: EngineSettings,
    connector: Arc<dyn SourceConnector>,
    target: Arc<dyn TargetRuntime>,
    registry: TranslatorRegistry,
}

type Tracked = (JoinHandle<()>, Arc<Job>);

struct EngineInner {
    workers: Arc<Workers>,
    runtime: Handle,
    /// Sized by the first submission.
    pool: Mutex<Option<Arc<Semaphore>>>,
    accepting: AtomicBool,
    /// Jobs whose task the control loop has not yet seen finish.
    active: Mutex<Vec<Tracked>>,
    /// Every job ever submitted, for readers. Replaced, never mutated.
    listing: RwLock<Arc<Vec<Arc<Job>>>>,
    shutdown: watch::Sender<bool>,
    terminated: watch::Sender<bool>,
}

/// Handle to a running engine. Cheap to clone.
#[derive(Clone)]
pub struct MigrateEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for MigrateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrateEngine")
            .field("accepting", &self.inner.accepting.load(Ordering::Acquire))
            .field("active", &self.inner.active.lock().len())
            .field("jobs", &self.inner.listing.read().len())
            .finish()
    }
}

impl MigrateEngine {
    /// Start an engine and its control loop on the current tokio runtime.
    pub fn start(
        settings: EngineSettings,
        connector: Arc<dyn SourceConnector>,
        target: Arc<dyn TargetRuntime>,
        registry: TranslatorRegistry,
    ) -> Result<Self, EngineError> {
        let runtime = Handle::try_current().map_err(|e| EngineError::NoRuntime(e.to_string()))?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (terminated, _) = watch::channel(false);

        let inner = Arc::new(EngineInner {
            workers: Arc::new(Workers {
                settings,
                connector,
                target,
                registry,
            }),
            runtime,
            pool: Mutex::new(None),
            accepting: AtomicBool::new(true),
            active: Mutex::new(Vec::new()),
            listing: RwLock::new(Arc::new(Vec::new())),
            shutdown,
            terminated,
        });

        inner
            .runtime
            .spawn(control_loop(Arc::clone(&inner), shutdown_rx));
        info!(
            poll_ms = inner.workers.settings.poll_interval.as_millis() as u64,
            "migration engine started"
        );
        Ok(Self { inner })
    }

    /// Queue one job per id. Never fails: bad ids, unreachable sources and
    /// submissions after shutdown are logged and skipped.
    ///
    /// The first call fixes the pool size; later values of
    /// `suggested_pool_size` are ignored.
    pub fn submit<I, S>(&self, instance: &SourceInstance, ids: I, suggested_pool_size: usize)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pool = self.pool(suggested_pool_size);

        for raw in ids {
            let raw = raw.as_ref();
            if !self.inner.accepting.load(Ordering::Acquire) {
                warn!(workflow_id = raw, err = %EngineError::ShuttingDown, "dropping submission");
                continue;
            }

            let id = match raw.parse::<WorkflowId>() {
                Ok(id) => id,
                Err(err) => {
                    warn!(workflow_id = raw, %err, "skipping malformed workflow id");
                    continue;
                }
            };

            let source = match self.inner.workers.connector.connect(instance) {
                Ok(source) => source,
                Err(err) => {
                    warn!(workflow_id = %id, %err, "could not connect to source, skipping");
                    continue;
                }
            };

            let settings = &self.inner.workers.settings;
            let job = Arc::new(Job::new(
                id,
                source,
                MigrationContext {
                    script: Script::with_indent_width(settings.indent_width),
                    resolver: Resolver::default().with_limits(settings.limits),
                },
            ));
            self.dispatch(&pool, job);
        }
    }

    fn pool(&self, suggested: usize) -> Arc<Semaphore> {
        let mut pool = self.inner.pool.lock();
        let pool = pool.get_or_insert_with(|| {
            let size = suggested.max(1);
            info!(size, "creating worker pool");
            Arc::new(Semaphore::new(size))
        });
        Arc::clone(pool)
    }

    fn dispatch(&self, pool: &Arc<Semaphore>, job: Arc<Job>) {
        // Checked under the lock that shutdown takes to flip the flag, so a
        // job is either tracked before the final drain or never spawned.
        let mut active = self.inner.active.lock();
        if !self.inner.accepting.load(Ordering::Acquire) {
            let err = MigrateError::from(EngineError::ShuttingDown);
            warn!(workflow_id = %job.workflow_id(), %err, "dropping submission");
            job.release();
            return;
        }

        let permits = Arc::clone(pool);
        let workers = Arc::clone(&self.inner.workers);
        let worker_job = Arc::clone(&job);
        let handle = self.inner.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                debug!(job = %worker_job.key(), "pool closed before the job got a worker");
                return;
            };
            let result =
                tokio::task::spawn_blocking(move || run_job(&worker_job, &workers)).await;
            if let Err(err) = result
                && err.is_panic()
            {
                std::panic::resume_unwind(err.into_panic());
            }
        });

        info!(job = %job.key(), workflow_id = %job.workflow_id(), "job queued");
        active.push((handle, Arc::clone(&job)));
        drop(active);

        let mut listing = self.inner.listing.write();
        let mut next = Vec::clone(&listing);
        next.push(job);
        *listing = Arc::new(next);
    }

    /// Snapshot of every job submitted so far. Empty once the engine has
    /// shut down.
    pub fn jobs(&self) -> Arc<Vec<Arc<Job>>> {
        Arc::clone(&self.inner.listing.read())
    }

    pub fn list_jobs(&self) -> Vec<JobSummary> {
        self.jobs().iter().map(|job| job.summary()).collect()
    }

    /// True once every submitted job is `Closed`.
    pub fn all_closed(&self) -> bool {
        self.jobs()
            .iter()
            .all(|job| job.status() == JobStatus::Closed)
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting work, let running jobs finish (up to the shutdown
    /// timeout), then force-close whatever is left and drop all tracking.
    /// Idempotent; every caller returns once the engine has terminated.
    pub async fn shutdown(&self) {
        {
            let _active = self.inner.active.lock();
            if self.inner.accepting.swap(false, Ordering::AcqRel) {
                info!("engine shutdown requested");
            }
        }
        self.inner.shutdown.send_replace(true);

        let mut terminated = self.inner.terminated.subscribe();
        let _ = terminated.wait_for(|done| *done).await;
    }
}

async fn control_loop(inner: Arc<EngineInner>, mut shutdown: watch::Receiver<bool>) {
    let interval = inner.workers.settings.poll_interval;
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        // Sleeping even when idle keeps a just-submitted job from racing
        // the loop's exit.
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {}
        }
        inner.poll_once().await;
    }

    inner.terminate().await;
    inner.terminated.send_replace(true);
    info!("migration engine terminated");
}

impl EngineInner {
    /// Close every job whose task has finished. Never waits on a running one.
    async fn poll_once(&self) {
        let finished: Vec<Tracked> = {
            let mut active = self.active.lock();
            let (done, pending): (Vec<_>, Vec<_>) =
                active.drain(..).partition(|(handle, _)| handle.is_finished());
            *active = pending;
            done
        };

        for (handle, job) in finished {
            let result = handle.await;
            finalize(&job, result);
        }
    }

    async fn terminate(&self) {
        let tracked: Vec<Tracked> = std::mem::take(&mut *self.active.lock());
        let deadline = Instant::now() + self.workers.settings.shutdown_timeout;
        let mut remaining = tracked.into_iter();

        while let Some((mut handle, job)) = remaining.next() {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(result) => finalize(&job, result),
                Err(_) => {
                    warn!("shutdown timed out, aborting remaining jobs");
                    // Close the pool first so no waiting job grabs a freed slot.
                    if let Some(pool) = self.pool.lock().as_ref() {
                        pool.close();
                    }
                    let rest: Vec<Tracked> = std::iter::once((handle, job))
                        .chain(remaining.by_ref())
                        .collect();
                    for (handle, _) in &rest {
                        handle.abort();
                    }
                    for (handle, job) in rest {
                        finalize(&job, handle.await);
                    }
                }
            }
        }

        let listing = std::mem::take(&mut *self.listing.write());
        for job in listing.iter() {
            if job.status() != JobStatus::Closed {
                warn!(job = %job.key(), status = %job.status(), "force-closing job");
                job.close();
            }
        }
        debug!(jobs = listing.len(), "tracking cleared");
    }
}

/// Record how a job's task ended and close the job.
fn finalize(job: &Job, result: Result<(), JoinError>) {
    match result {
        Ok(()) => {
            if job.status() == JobStatus::Running {
                job.apply(Transition::Succeed);
            }
        }
        Err(err) if err.is_cancelled() => {
            warn!(job = %job.key(), "job interrupted before it finished");
            if !job.status().is_terminal() {
                job.fail(EngineError::Interrupted.into());
            }
        }
        Err(err) => {
            let message = panic_message(err);
            error!(job = %job.key(), %message, "worker panicked");
            job.fail(EngineError::WorkerPanicked(message).into());
        }
    }

    job.close();
    match job.error() {
        Some(err) => info!(job = %job.key(), kind = %err.kind(), %err, "job closed with error"),
        None => info!(job = %job.key(), "job closed"),
    }
}

fn panic_message(err: JoinError) -> String {
    let Ok(payload) = err.try_into_panic() else {
        return "task failed".to_string();
    };
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Worker body. Runs on a blocking thread.
fn run_job(job: &Job, workers: &Workers) {
    if !job.apply(Transition::Start) {
        return;
    }
    info!(job = %job.key(), workflow_id = %job.workflow_id(), "job started");

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| migrate(job, workers)));
    job.release();
    match outcome {
        Ok(Ok(())) => {
            job.apply(Transition::Succeed);
        }
        Ok(Err(err)) => {
            warn!(job = %job.key(), kind = %err.kind(), %err, "job failed");
            job.fail(err);
        }
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

fn migrate(job: &Job, workers: &Workers) -> Result<(), MigrateError> {
    let settings = &workers.settings;
    let workflow = job.with_source(|source| source.load_workflow(job.workflow_id()))?;
    job.set_display_name(workflow.display_name());

    let mut cx = job.context();
    let MigrationContext { script, resolver } = &mut *cx;
    resolver.load_scopes(workflow.scopes.clone());

    synthesize(
        &workflow,
        &workers.registry,
        &settings.synthesis,
        script,
        resolver,
        &mut |percent| job.set_progress(percent),
    )?;

    let target = workers.target.as_ref();
    let handle = create_unique_job(
        target,
        &target_job_name(&settings.synthesis.job_prefix, &workflow),
    )?;

    let stored = target
        .set_script(&handle, &script.render(), settings.sandbox)
        .and_then(|()| {
            target.set_parameters(
                &handle,
                &build_parameters(&settings.synthesis.node_parameter, resolver),
            )
        })
        .and_then(|()| target.save(&handle));
    if let Err(err) = stored {
        target.discard(&handle);
        return Err(err);
    }
    job.set_target_name(handle.name().to_string());

    job.set_progress(100);
    info!(job = %job.key(), target = %handle.name(), "pipeline job created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::{Property, ScopeKind, ScopeSet};
    use crate::source::{
        Catalog, CatalogConnector, SearchResults, SourceJob, SourceStep, SourceSystem,
        WorkflowDefinition,
    };
    use crate::state_machine::StateMachine;
    use crate::target::{CreateJobError, MemoryTarget, ParameterDefinition, TargetJob};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn settings() -> EngineSettings {
        EngineSettings {
            poll_interval: Duration::from_millis(10),
            ..EngineSettings::default()
        }
    }

    fn instance() -> SourceInstance {
        SourceInstance::new(Some("ahp.example.com"), Some("8443"), Some("ahp-user"), None)
    }

    fn workflow(id: u64, project: &str, name: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            id: WorkflowId(id),
            name: name.into(),
            project: project.into(),
            jobs: vec![SourceJob {
                name: "Build".into(),
                steps: vec![
                    SourceStep::new("shell", "Compile").with("command", "make ${property:BRANCH}"),
                    SourceStep::new("cleanup", "Wipe"),
                ],
            }],
            scopes: ScopeSet::new().with(ScopeKind::Workflow, "BRANCH", Property::new("main")),
        }
    }

    fn catalog() -> Catalog {
        Catalog::new()
            .with_workflow(workflow(17, "Payments", "Build"))
            .with_workflow(workflow(18, "Payments", "Release"))
    }

    fn start(connector: impl SourceConnector + 'static, target: Arc<MemoryTarget>) -> MigrateEngine {
        MigrateEngine::start(
            settings(),
            Arc::new(connector),
            target,
            TranslatorRegistry::with_defaults(),
        )
        .unwrap()
    }

    async fn wait_all_closed(engine: &MigrateEngine) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !engine.all_closed() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("jobs did not close in time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn migrates_a_workflow_end_to_end() {
        let target = Arc::new(MemoryTarget::new());
        let engine = start(CatalogConnector::new(catalog()), Arc::clone(&target));

        engine.submit(&instance(), ["17"], 2);
        wait_all_closed(&engine).await;

        let jobs = engine.jobs();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.status(), JobStatus::Closed);
        assert!(job.error().is_none(), "unexpected error: {:?}", job.error());
        assert!(job.script_text().contains("make main"));
        assert_eq!(job.needed_properties(), vec!["BRANCH".to_string()]);
        assert!(StateMachine::is_valid_history(&job.history()));
        assert_eq!(
            job.history(),
            vec![
                JobStatus::Pending,
                JobStatus::Running,
                JobStatus::Success,
                JobStatus::Closed
            ]
        );

        let summary = &engine.list_jobs()[0];
        assert_eq!(summary.display_name, "Payments / Build (17)");
        assert_eq!(summary.stage_label, "A2J-Payments-Build");
        assert_eq!(summary.status_text, "Success");

        let stored = target.job("A2J-Payments-Build").unwrap();
        assert!(stored.saved);
        assert!(stored.sandboxed);
        assert_eq!(stored.parameters[0].name, "A2J_NODE");
        assert_eq!(stored.parameters[1].name, "BRANCH");

        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn malformed_ids_are_skipped() {
        let target = Arc::new(MemoryTarget::new());
        let engine = start(CatalogConnector::new(catalog()), Arc::clone(&target));

        engine.submit(&instance(), ["not-a-number"], 2);
        assert!(engine.jobs().is_empty());
        assert!(engine.is_accepting());

        engine.submit(&instance(), ["18"], 2);
        wait_all_closed(&engine).await;
        assert_eq!(engine.list_jobs()[0].status_text, "Success");
        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invalid_instance_skips_every_id() {
        let engine = start(CatalogConnector::new(catalog()), Arc::new(MemoryTarget::new()));
        engine.submit(&SourceInstance::default(), ["17", "18"], 2);
        assert!(engine.jobs().is_empty());
        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn same_target_name_gets_a_suffix() {
        let catalog = Catalog::new()
            .with_workflow(workflow(1, "Payments", "Build"))
            .with_workflow(workflow(2, "Payments", "Build"));
        let target = Arc::new(MemoryTarget::new());
        let engine = start(CatalogConnector::new(catalog), Arc::clone(&target));

        engine.submit(&instance(), ["1", "2"], 2);
        wait_all_closed(&engine).await;

        assert_eq!(
            target.names(),
            vec!["A2J-Payments-Build".to_string(), "A2J-Payments-Build-1".to_string()]
        );
        let mut labels: Vec<_> = engine.list_jobs().into_iter().map(|s| s.stage_label).collect();
        labels.sort();
        assert_eq!(labels, target.names());
        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_workflow_fails_only_its_job() {
        let engine = start(CatalogConnector::new(catalog()), Arc::new(MemoryTarget::new()));
        engine.submit(&instance(), ["99", "17"], 2);
        wait_all_closed(&engine).await;

        let summaries = engine.list_jobs();
        assert_eq!(
            summaries[0].status_text,
            "Error: Validation error: No workflow with id 99"
        );
        assert_eq!(summaries[0].display_name, "Workflow Not Loaded (99)");
        assert_eq!(summaries[0].stage_label, "Target job not created yet");
        assert_eq!(summaries[1].status_text, "Success");
        engine.shutdown().await;
    }

    /// Source whose `load_workflow` blocks until released.
    struct GatedConnector {
        inner: CatalogConnector,
        gate: Arc<(std::sync::Mutex<bool>, std::sync::Condvar)>,
        loads: Arc<AtomicUsize>,
    }

    struct GatedSource {
        inner: Box<dyn SourceSystem>,
        gate: Arc<(std::sync::Mutex<bool>, std::sync::Condvar)>,
        loads: Arc<AtomicUsize>,
    }

    impl SourceConnector for GatedConnector {
        fn connect(&self, instance: &SourceInstance) -> Result<Box<dyn SourceSystem>, MigrateError> {
            Ok(Box::new(GatedSource {
                inner: self.inner.connect(instance)?,
                gate: Arc::clone(&self.gate),
                loads: Arc::clone(&self.loads),
            }))
        }
    }

    impl SourceSystem for GatedSource {
        fn search(&self, query: &str) -> Result<SearchResults, MigrateError> {
            self.inner.search(query)
        }

        fn load_workflow(&self, id: WorkflowId) -> Result<WorkflowDefinition, MigrateError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let (lock, cvar) = &*self.gate;
            let mut open = lock.lock().unwrap();
            while !*open {
                open = cvar.wait(open).unwrap();
            }
            drop(open);
            self.inner.load_workflow(id)
        }
    }

    fn gated() -> (
        GatedConnector,
        Arc<(std::sync::Mutex<bool>, std::sync::Condvar)>,
        Arc<AtomicUsize>,
    ) {
        let gate = Arc::new((std::sync::Mutex::new(false), std::sync::Condvar::new()));
        let loads = Arc::new(AtomicUsize::new(0));
        (
            GatedConnector {
                inner: CatalogConnector::new(catalog()),
                gate: Arc::clone(&gate),
                loads: Arc::clone(&loads),
            },
            gate,
            loads,
        )
    }

    fn open_gate(gate: &(std::sync::Mutex<bool>, std::sync::Condvar)) {
        *gate.0.lock().unwrap() = true;
        gate.1.notify_all();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_waits_for_running_jobs() {
        let (connector, gate, loads) = gated();
        let engine = start(connector, Arc::new(MemoryTarget::new()));
        engine.submit(&instance(), ["17"], 1);

        tokio::time::timeout(Duration::from_secs(5), async {
            while loads.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(engine.list_jobs()[0].status_text, "Running: 0%");

        let shutting_down = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.shutdown().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!shutting_down.is_finished());
        assert!(!engine.is_accepting());

        let jobs = engine.jobs();
        open_gate(&gate);
        shutting_down.await.unwrap();

        let job = &jobs[0];
        assert_eq!(job.status(), JobStatus::Closed);
        assert!(job.error().is_none());
        assert!(engine.all_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_clears_tracking() {
        let engine = start(CatalogConnector::new(catalog()), Arc::new(MemoryTarget::new()));
        engine.submit(&instance(), ["17"], 2);
        let jobs = engine.jobs();
        assert_eq!(jobs.len(), 1);

        engine.shutdown().await;
        assert!(engine.jobs().is_empty());
        assert!(engine.list_jobs().is_empty());
        assert!(engine.inner.active.lock().is_empty());
        assert_eq!(jobs[0].status(), JobStatus::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn first_submit_fixes_the_pool_size() {
        let (connector, gate, loads) = gated();
        let engine = start(connector, Arc::new(MemoryTarget::new()));

        engine.submit(&instance(), ["17"], 1);
        engine.submit(&instance(), ["18", "17", "18"], 4);
        assert_eq!(engine.jobs().len(), 4);

        tokio::time::timeout(Duration::from_secs(5), async {
            while loads.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        // Give the other jobs every chance to take a slot.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        let running = engine
            .jobs()
            .iter()
            .filter(|job| job.status() == JobStatus::Running)
            .count();
        assert_eq!(running, 1);

        open_gate(&gate);
        wait_all_closed(&engine).await;
        assert_eq!(loads.load(Ordering::SeqCst), 4);
        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn submissions_after_shutdown_are_dropped() {
        let target = Arc::new(MemoryTarget::new());
        let engine = start(CatalogConnector::new(catalog()), Arc::clone(&target));
        engine.shutdown().await;
        engine.shutdown().await;

        engine.submit(&instance(), ["17"], 2);
        assert!(engine.jobs().is_empty());
        assert!(target.names().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn forced_shutdown_interrupts_waiting_jobs() {
        let (connector, gate, loads) = gated();
        let engine = MigrateEngine::start(
            EngineSettings {
                shutdown_timeout: Duration::from_millis(100),
                ..settings()
            },
            Arc::new(connector),
            Arc::new(MemoryTarget::new()),
            TranslatorRegistry::with_defaults(),
        )
        .unwrap();

        // One worker: the second job never gets a slot.
        engine.submit(&instance(), ["17", "18"], 1);
        tokio::time::timeout(Duration::from_secs(5), async {
            while loads.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let jobs = engine.jobs();
        engine.shutdown().await;
        open_gate(&gate);

        assert!(engine.jobs().is_empty());
        assert!(jobs.iter().all(|job| job.status() == JobStatus::Closed));
        assert!(jobs.iter().all(|job| StateMachine::is_valid_history(&job.history())));
        let waiting = &jobs[1];
        assert!(matches!(
            waiting.error(),
            Some(MigrateError::Engine(EngineError::Interrupted))
        ));
        assert_eq!(
            waiting.history(),
            vec![JobStatus::Pending, JobStatus::Failed, JobStatus::Closed]
        );
    }

    /// Target that refuses every save.
    struct ReadOnlyTarget(MemoryTarget);

    impl TargetRuntime for ReadOnlyTarget {
        fn create_job(&self, name: &str) -> Result<TargetJob, CreateJobError> {
            self.0.create_job(name)
        }

        fn set_script(&self, job: &TargetJob, script: &str, sandboxed: bool) -> Result<(), MigrateError> {
            self.0.set_script(job, script, sandboxed)
        }

        fn set_parameters(
            &self,
            job: &TargetJob,
            parameters: &[ParameterDefinition],
        ) -> Result<(), MigrateError> {
            self.0.set_parameters(job, parameters)
        }

        fn save(&self, _: &TargetJob) -> Result<(), MigrateError> {
            Err(MigrateError::Connection("target is read-only".into()))
        }

        fn discard(&self, job: &TargetJob) {
            self.0.discard(job)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_save_discards_the_target_job() {
        let target = Arc::new(ReadOnlyTarget(MemoryTarget::new()));
        let engine = MigrateEngine::start(
            settings(),
            Arc::new(CatalogConnector::new(catalog())),
            Arc::clone(&target) as Arc<dyn TargetRuntime>,
            TranslatorRegistry::with_defaults(),
        )
        .unwrap();
        engine.submit(&instance(), ["17"], 1);
        wait_all_closed(&engine).await;

        let summary = &engine.list_jobs()[0];
        assert_eq!(summary.status_text, "Error: Connection error: target is read-only");
        assert_eq!(summary.stage_label, "Target job not created yet");
        assert!(target.0.names().is_empty());
        engine.shutdown().await;
    }

    struct PanickingConnector;

    struct PanickingSource;

    impl SourceConnector for PanickingConnector {
        fn connect(&self, _: &SourceInstance) -> Result<Box<dyn SourceSystem>, MigrateError> {
            Ok(Box::new(PanickingSource))
        }
    }

    impl SourceSystem for PanickingSource {
        fn search(&self, _: &str) -> Result<SearchResults, MigrateError> {
            Ok(SearchResults::new())
        }

        fn load_workflow(&self, _: WorkflowId) -> Result<WorkflowDefinition, MigrateError> {
            panic!("source client bug");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn worker_panics_fail_only_their_job() {
        let engine = start(PanickingConnector, Arc::new(MemoryTarget::new()));
        engine.submit(&instance(), ["1"], 1);
        wait_all_closed(&engine).await;

        let job = &engine.jobs()[0];
        assert!(matches!(
            job.error(),
            Some(MigrateError::Engine(EngineError::WorkerPanicked(msg))) if msg == "source client bug"
        ));
        assert!(engine.is_accepting());
        engine.shutdown().await;
    }

    #[test]
    fn start_outside_a_runtime_is_an_error() {
        let result = MigrateEngine::start(
            settings(),
            Arc::new(CatalogConnector::new(catalog())),
            Arc::new(MemoryTarget::new()),
            TranslatorRegistry::with_defaults(),
        );
        assert!(matches!(result, Err(EngineError::NoRuntime(_))));
    }
}
