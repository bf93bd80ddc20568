//! The search loop: submit every grid point, run the new ones with bounded
//! concurrency, then summarize.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use gt_optimizer::{
    ExperimentStatus, GpuPool, HostResources, LocalController, ParameterSet, ResourceRequest,
    Submission, Trial, TrialHandle, TrialResult, TuneConfig, TuneController,
};
use gt_types::{internal_error, GtResult, MetricRecord};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cleanup::cleanup_trial;
use crate::config::{PathsSection, TuneFile};
use crate::extract::extract_metrics;
use crate::materialize::materialize;
use crate::plan::TrialPlan;
use crate::report::write_timestamped_report;
use crate::runner::{ShellRunner, TrainingRunner};

/// Outcome of a whole search.
#[derive(Debug, Clone)]
pub struct TuneSummary {
    pub status: ExperimentStatus,
    pub best: Option<TrialResult>,
    pub trials: Vec<Trial>,
    pub report_path: PathBuf,
}

/// Shared, read-only state handed to every trial task.
struct TrialContext {
    controller: Arc<dyn TuneController>,
    runner: Arc<dyn TrainingRunner>,
    plan: TrialPlan,
    paths: PathsSection,
    request: ResourceRequest,
    gpus: Arc<GpuPool>,
}

pub struct Tuner {
    config: TuneConfig,
    controller: Arc<dyn TuneController>,
    runner: Arc<dyn TrainingRunner>,
    plan: TrialPlan,
    paths: PathsSection,
    host: HostResources,
}

impl Tuner {
    /// Open (or resume) the experiment described by `file`.
    pub fn open(file: &TuneFile) -> GtResult<Self> {
        file.validate()?;
        let controller = LocalController::open(
            file.experiment_dir(),
            file.tune_config(),
            &file.plan.trial_prefix,
        )?;
        let config = controller.config().clone();
        Ok(Self {
            config,
            controller: Arc::new(controller),
            runner: Arc::new(ShellRunner),
            plan: file.plan.clone(),
            paths: file.paths.clone(),
            host: HostResources::detect(),
        })
    }

    pub fn with_runner(mut self, runner: Arc<dyn TrainingRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_host(mut self, host: HostResources) -> Self {
        self.host = host;
        self
    }

    pub fn config(&self) -> &TuneConfig {
        &self.config
    }

    pub fn controller(&self) -> Arc<dyn TuneController> {
        Arc::clone(&self.controller)
    }

    /// Every parameter assignment of the search, in trial-number order.
    pub fn suggestions(&self) -> Vec<ParameterSet> {
        let mut strategy = self.config.strategy();
        let count = strategy.remaining().unwrap_or(self.config.num_samples);
        strategy.suggest(count)
    }

    pub async fn run(&self) -> GtResult<TuneSummary> {
        let suggestions = self.suggestions();
        info!(
            "Search '{}' over {} configurations, optimizing {} ({:?})",
            self.config.name,
            suggestions.len(),
            self.config.metric,
            self.config.mode
        );

        let mut pending = Vec::new();
        for (trial_number, params) in suggestions.into_iter().enumerate() {
            match self.controller.submit(trial_number, params) {
                Ok(Submission::Run(handle)) => pending.push(handle),
                Ok(Submission::Resumed(_)) => {}
                Err(e) => {
                    error!("Aborting search: {}", e);
                    self.controller.finish(Some(e.to_string()))?;
                    return Err(e);
                }
            }
        }

        let request = self
            .config
            .resources
            .clone()
            .unwrap_or_else(|| ResourceRequest::for_host(&self.host));
        let slots = request.parallel_slots(&self.host, self.config.max_concurrent);
        info!(
            "{} trials to run, {} at a time ({} cpus, {} gpus each)",
            pending.len(),
            slots,
            request.cpus,
            request.gpus
        );

        let ctx = Arc::new(TrialContext {
            controller: Arc::clone(&self.controller),
            runner: Arc::clone(&self.runner),
            plan: self.plan.clone(),
            paths: self.paths.clone(),
            request,
            gpus: GpuPool::new(self.host.gpu_ids.clone()),
        });
        let semaphore = Arc::new(Semaphore::new(slots));
        let mut tasks = JoinSet::new();

        for handle in pending {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| internal_error!("trial scheduler closed: {}", e))?;
            let ctx = Arc::clone(&ctx);
            tasks.spawn(async move {
                let _permit = permit;
                run_trial(&ctx, handle).await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Trial task did not finish: {}", e);
            }
        }

        self.summarize()
    }

    fn summarize(&self) -> GtResult<TuneSummary> {
        let trials = self.controller.trials();
        let names: Vec<String> = self.config.search_space.names().map(String::from).collect();
        let report_path = match write_timestamped_report(
            &self.paths.results_dir,
            &self.plan.report_prefix,
            &names,
            &trials,
        ) {
            Ok(path) => path,
            Err(e) => {
                self.controller.finish(Some(e.to_string()))?;
                return Err(e);
            }
        };

        let best = self.controller.best(&self.config.metric, self.config.mode);
        match &best {
            Some(best) => info!(
                "Best config (trial {}, {} = {}): {:?}",
                best.trial_number, self.config.metric, best.objective, best.parameters
            ),
            None => warn!("No trial reported {}", self.config.metric),
        }

        let status = self.controller.finish(None)?;
        info!(
            "Search '{}' finished: {} completed, {} failed, {} resumed",
            status.name, status.trials_completed, status.trials_failed, status.trials_resumed
        );
        Ok(TuneSummary {
            status,
            best,
            trials,
            report_path,
        })
    }
}

/// Run one trial end to end. Failures are recorded with the controller and
/// never propagate to sibling trials.
async fn run_trial(ctx: &TrialContext, handle: TrialHandle) {
    let lease = if ctx.request.gpus > 0 {
        let lease = ctx.gpus.lease(ctx.request.gpus);
        if lease.is_none() {
            warn!(
                "Trial {} wants {} gpus but only {} are free",
                handle.trial_number,
                ctx.request.gpus,
                ctx.gpus.available()
            );
        }
        lease
    } else {
        None
    };

    let mut env = BTreeMap::new();
    let gpu_ids = match &lease {
        Some(lease) => {
            env.insert("CUDA_VISIBLE_DEVICES".to_string(), lease.visible_devices());
            lease.ids().to_vec()
        }
        None => Vec::new(),
    };
    if ctx.request.cpus > 0 {
        env.insert("OMP_NUM_THREADS".to_string(), ctx.request.cpus.to_string());
    }

    if let Err(e) = ctx.controller.start(&handle, gpu_ids) {
        error!("Cannot start trial {}: {}", handle.trial_number, e);
        return;
    }
    info!(
        "Trial {} started: {:?}",
        handle.trial_number, handle.parameters
    );

    let outcome = execute(ctx, &handle, &env).await;

    let cleanup = {
        let work_dir = handle.work_dir.clone();
        let patterns = ctx.plan.cleanup.clone();
        tokio::task::spawn_blocking(move || cleanup_trial(&work_dir, &patterns))
            .await
            .map_err(|e| internal_error!("cleanup task failed: {}", e))
            .and_then(|r| r)
    };
    match cleanup {
        Ok(report) => debug!(
            "Trial {} cleanup removed {} entries",
            handle.trial_number,
            report.removed.len()
        ),
        Err(e) => warn!("Trial {} cleanup skipped: {}", handle.trial_number, e),
    }
    drop(lease);

    let recorded = match outcome {
        Ok(metrics) => ctx.controller.report(&handle, metrics).map(|_| ()),
        Err(e) => ctx.controller.fail(&handle, &e.to_string()),
    };
    if let Err(e) = recorded {
        error!("Trial {}: {}", handle.trial_number, e);
    }
}

async fn execute(
    ctx: &TrialContext,
    handle: &TrialHandle,
    env: &BTreeMap<String, String>,
) -> GtResult<MetricRecord> {
    {
        let plan = ctx.plan.clone();
        let paths = ctx.paths.clone();
        let handle = handle.clone();
        tokio::task::spawn_blocking(move || materialize(&plan, &paths, &handle))
            .await
            .map_err(|e| internal_error!("materialization task failed: {}", e))??;
    }

    ctx.runner
        .run(
            &handle.work_dir,
            &ctx.plan.command,
            &ctx.plan.stdout_file,
            env,
        )
        .await?;

    extract_metrics(&handle.work_dir, &ctx.plan.metric)
}
