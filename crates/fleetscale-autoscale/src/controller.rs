//! Fleet controller — the scaling control loop.
//!
//! One `run_cycle` walks the pool in a fixed order:
//!
//! ```text
//! reconcile → collect → score/aggregate → complete drains
//!           → scale up → scale down → publish route table
//! ```
//!
//! Collaborator failures are logged and never abort the loop. A failed
//! mutation is simply attempted again on a later cycle.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use fleet_core::config::{FleetConfig, PoolConfig, ThresholdConfig};
use fleet_core::{WorkerId, WorkerRecord};
use fleetscale_backend::{BackendError, PortMapping, WorkerPoolBackend, WorkerSpec};
use fleetscale_metrics::{MetricsSource, SamplePoller};
use fleetscale_proxy::{RouteSync, RouteTableWriter};

use crate::score::{ScoringEngine, inverse_weights};

/// What a single control cycle observed and did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Active workers with a sample that took part in the decision.
    pub scored: u32,
    pub scale_up_flags: u32,
    pub scale_down_flags: u32,
    pub mean_score: Option<f64>,
    /// Workers whose sample timed out; their previous metrics were reused.
    pub stale: Vec<WorkerId>,
    /// Workers whose instance disappeared from the backend.
    pub lost: Vec<WorkerId>,
    /// Draining workers whose instance was destroyed.
    pub removed: Vec<WorkerId>,
    pub created: Option<WorkerId>,
    /// Worker moved to Draining this cycle.
    pub drained: Option<WorkerId>,
    /// Whether a new route table went live.
    pub published: bool,
}

/// Aggregate over the scored active workers of one cycle.
#[derive(Debug, Clone, Default)]
struct FleetSummary {
    scored: u32,
    up: u32,
    down: u32,
    mean_score: Option<f64>,
    /// Largest weight among active workers, used to seed a new worker.
    highest_weight: f64,
    /// First worker with the minimum score.
    lowest: Option<WorkerId>,
}

impl FleetSummary {
    fn wants_scale_up(&self, thresholds: &ThresholdConfig) -> bool {
        self.scored > 0
            && (self.up * 2 > self.scored
                || self.mean_score.is_some_and(|m| m > thresholds.scale_up_average))
    }

    fn wants_scale_down(&self) -> bool {
        self.scored > 0 && self.down * 2 > self.scored
    }
}

/// Worker id for pool index `index`.
pub fn worker_id(pool: &PoolConfig, index: u32) -> WorkerId {
    format!("{}{}", pool.name_prefix, index)
}

/// Route port for pool index `index`, `None` if it does not fit a port.
pub fn route_port(pool: &PoolConfig, index: u32) -> Option<u16> {
    u16::try_from(index)
        .ok()
        .and_then(|i| pool.base_port.checked_add(i))
}

/// The records `bootstrap` would create on an empty backend.
pub fn initial_pool(pool: &PoolConfig) -> Vec<WorkerRecord> {
    let count = pool.initial_workers.max(1);
    let weight = 100.0 / f64::from(count);
    (1..=count)
        .filter_map(|index| {
            route_port(pool, index).map(|port| WorkerRecord::new(worker_id(pool, index), port, weight))
        })
        .collect()
}

/// Owns the worker records and drives the collaborators.
pub struct FleetController<M, B, W> {
    pool: PoolConfig,
    thresholds: ThresholdConfig,
    cycle_interval: Duration,
    engine: ScoringEngine,
    poller: SamplePoller,
    source: M,
    backend: B,
    routes: RouteSync<W>,
    workers: Vec<WorkerRecord>,
    next_index: u32,
}

impl<M, B, W> FleetController<M, B, W>
where
    M: MetricsSource,
    B: WorkerPoolBackend,
    W: RouteTableWriter,
{
    pub fn new(config: &FleetConfig, source: M, backend: B, routes: RouteSync<W>) -> Self {
        Self {
            pool: config.pool.clone(),
            thresholds: config.thresholds.clone(),
            cycle_interval: config.controller.cycle_interval(),
            engine: ScoringEngine::from_config(config),
            poller: SamplePoller::from_config(&config.metrics),
            source,
            backend,
            routes,
            workers: Vec::new(),
            next_index: 1,
        }
    }

    /// Current records in creation order. Removed records are never kept.
    pub fn workers(&self) -> &[WorkerRecord] {
        &self.workers
    }

    pub fn source(&self) -> &M {
        &self.source
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn routes(&self) -> &RouteSync<W> {
        &self.routes
    }

    /// Index the next created worker will get.
    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    pub fn active_count(&self) -> usize {
        self.workers.iter().filter(|r| r.is_active()).count()
    }

    /// Pool index of an instance name, only if the name is exactly what
    /// `worker_id` produces for it (`app01` and `app+1` are not `app1`).
    fn index_of(&self, name: &str) -> Option<u32> {
        let index: u32 = name
            .strip_prefix(self.pool.name_prefix.as_str())?
            .parse()
            .ok()?;
        (worker_id(&self.pool, index) == name).then_some(index)
    }

    /// Start the initial pool and publish the first route table.
    ///
    /// Running instances named after the pool are adopted. Workers are
    /// created until `initial_workers` are active, all with equal weight.
    pub async fn bootstrap(&mut self) -> Vec<WorkerId> {
        let existing = match self.backend.list_active().await {
            Ok(instances) => instances,
            Err(e) => {
                warn!(error = %e, "cannot list backend instances, starting an empty pool");
                Vec::new()
            }
        };

        let mut adopted: Vec<u32> = existing
            .iter()
            .filter_map(|i| self.index_of(&i.name))
            .collect();
        adopted.sort_unstable();
        adopted.dedup();

        let wanted = self.pool.initial_workers.max(1) as usize;
        let weight = 100.0 / adopted.len().max(wanted) as f64;

        for index in adopted {
            let id = worker_id(&self.pool, index);
            let Some(port) = route_port(&self.pool, index) else {
                warn!(worker = %id, "adopted instance has no usable route port, ignoring it");
                continue;
            };
            info!(worker = %id, port, "adopting running instance");
            self.workers.push(WorkerRecord::new(id, port, weight));
            self.next_index = self.next_index.max(index.saturating_add(1));
        }

        for _ in self.active_count()..wanted {
            self.scale_up(weight).await;
        }

        self.routes.sync_or_log(&self.workers).await;
        info!(workers = self.workers.len(), "pool bootstrapped");
        self.workers.iter().map(|r| r.id.clone()).collect()
    }

    /// Align the records with what the backend actually runs.
    ///
    /// Returns the workers dropped because their instance is gone.
    pub async fn reconcile(&mut self) -> Vec<WorkerId> {
        let instances = match self.backend.list_active().await {
            Ok(instances) => instances,
            Err(e) => {
                warn!(error = %e, "backend listing failed, skipping reconciliation");
                return Vec::new();
            }
        };
        let running: HashSet<&str> = instances.iter().map(|i| i.name.as_str()).collect();

        let mut lost = Vec::new();
        for record in self.workers.iter_mut().filter(|r| !r.is_removed()) {
            if !running.contains(record.id.as_str()) {
                warn!(worker = %record.id, phase = ?record.phase, "instance vanished from backend, dropping worker");
                record.mark_removed();
                lost.push(record.id.clone());
            }
        }

        for instance in &instances {
            let Some(index) = self.index_of(&instance.name) else {
                continue;
            };
            if !self.workers.iter().any(|r| r.id == instance.name) {
                warn!(instance = %instance.name, "orphan instance carries the pool prefix, leaving it alone");
                self.next_index = self.next_index.max(index.saturating_add(1));
            }
        }

        self.purge_removed();
        lost
    }

    /// Poll a fresh sample for every worker, in order.
    ///
    /// Returns the workers that timed out. They keep their previous sample.
    async fn collect(&mut self) -> Vec<WorkerId> {
        let mut stale = Vec::new();
        for record in self.workers.iter_mut().filter(|r| !r.is_removed()) {
            match self.poller.collect(&self.source, &record.id).await {
                Ok(metrics) => record.metrics = Some(metrics),
                Err(e) => {
                    warn!(
                        worker = %record.id,
                        error = %e,
                        has_previous = record.metrics.is_some(),
                        "no fresh sample, keeping previous metrics"
                    );
                    stale.push(record.id.clone());
                }
            }
        }
        stale
    }

    /// Score every live worker and recompute active weights.
    ///
    /// Workers that never reported keep their weight and are left out of
    /// the summary.
    fn score_and_aggregate(&mut self) -> FleetSummary {
        for record in self.workers.iter_mut().filter(|r| !r.is_removed()) {
            self.engine.apply(record);
        }

        let scored: Vec<usize> = self
            .workers
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_active() && r.metrics.is_some())
            .map(|(i, _)| i)
            .collect();
        let scores: Vec<f64> = scored.iter().map(|&i| self.workers[i].score).collect();
        let weights = inverse_weights(&scores, self.engine.min_score());

        let mut summary = FleetSummary::default();
        let mut total = 0.0;
        let mut lowest: Option<(usize, f64)> = None;

        for (&i, weight) in scored.iter().zip(weights) {
            let record = &mut self.workers[i];
            if self.engine.is_degenerate(record.score) {
                debug!(worker = %record.id, score = record.score, "score clamped before inversion");
            }
            record.weight = weight;

            summary.scored += 1;
            if record.scale_up_flag() {
                summary.up += 1;
            } else if record.scale_down_flag() {
                summary.down += 1;
            }
            total += record.score;
            if lowest.is_none_or(|(_, s)| record.score < s) {
                lowest = Some((i, record.score));
            }
            debug!(worker = %record.id, score = record.score, weight, flag = ?record.flag, "worker scored");
        }

        if summary.scored > 0 {
            summary.mean_score = Some(total / f64::from(summary.scored));
        }
        summary.lowest = lowest.map(|(i, _)| self.workers[i].id.clone());
        summary.highest_weight = self
            .workers
            .iter()
            .filter(|r| r.is_active())
            .map(|r| r.weight)
            .fold(0.0, f64::max);
        summary
    }

    /// Destroy draining workers that have gone quiet.
    async fn complete_drains(&mut self) -> Vec<WorkerId> {
        let drain_safe = self.thresholds.drain_safe;
        let ready: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|r| r.is_draining())
            .filter(|r| r.metrics.is_some_and(|m| m.busy_worker_threads < drain_safe))
            .map(|r| r.id.clone())
            .collect();

        let mut removed = Vec::new();
        for id in ready {
            match self.backend.remove(&id).await {
                Ok(()) => info!(worker = %id, "drained worker removed"),
                Err(BackendError::NotFound(_)) => {
                    warn!(worker = %id, "drained worker already gone from backend");
                }
                Err(e) => {
                    warn!(worker = %id, error = %e, "drained worker removal failed, retrying next cycle");
                    continue;
                }
            }
            if let Some(record) = self.workers.iter_mut().find(|r| r.id == id) {
                record.mark_removed();
            }
            removed.push(id);
        }

        self.purge_removed();
        removed
    }

    fn worker_spec(&self, name: &str, port: u16) -> WorkerSpec {
        let command = self.pool.command.trim();
        WorkerSpec {
            template: self.pool.template.clone(),
            name: name.to_string(),
            memory_limit_bytes: self.pool.memory_limit_bytes(),
            command: (!command.is_empty()).then(|| command.to_string()),
            ports: vec![PortMapping {
                host: port,
                container: self.pool.container_port,
            }],
        }
    }

    /// Create one worker with the given weight.
    ///
    /// The index is consumed even when creation fails, so ids are never reused.
    async fn scale_up(&mut self, weight: f64) -> Option<WorkerId> {
        let index = self.next_index;
        self.next_index = self.next_index.saturating_add(1);

        let id = worker_id(&self.pool, index);
        let Some(port) = route_port(&self.pool, index) else {
            warn!(worker = %id, base_port = self.pool.base_port, "no route port left for new worker");
            return None;
        };

        let spec = self.worker_spec(&id, port);
        match self.backend.create(&spec).await {
            Ok(instance) => {
                info!(worker = %id, port, weight, instance = %instance.id, "worker created");
                self.workers.push(WorkerRecord::new(id.clone(), port, weight));
                Some(id)
            }
            Err(e) => {
                warn!(worker = %id, error = %e, "worker creation failed");
                None
            }
        }
    }

    /// Move `id` to Draining. It stops receiving traffic once the table is
    /// published and is destroyed when its busy threads drop.
    ///
    /// The caller passes the *least* loaded worker. Draining the lowest
    /// score is most likely a policy bug (it sheds the worker with the
    /// most spare capacity) but is the current behavior.
    fn scale_down(&mut self, id: &str) -> bool {
        let Some(record) = self.workers.iter_mut().find(|r| r.id == id) else {
            return false;
        };
        let started = record.start_draining();
        if started {
            info!(worker = %id, score = record.score, "worker draining");
        }
        started
    }

    fn purge_removed(&mut self) {
        self.workers.retain(|r| !r.is_removed());
    }

    /// One full control iteration.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        if self.pool.reconcile {
            report.lost = self.reconcile().await;
        }
        report.stale = self.collect().await;

        let summary = self.score_and_aggregate();
        report.scored = summary.scored;
        report.scale_up_flags = summary.up;
        report.scale_down_flags = summary.down;
        report.mean_score = summary.mean_score;

        report.removed = self.complete_drains().await;

        if self.active_count() == 0 {
            info!("no active workers left, adding one");
            report.created = self.scale_up(100.0).await;
        } else if summary.wants_scale_up(&self.thresholds) {
            debug!(
                up = summary.up,
                scored = summary.scored,
                mean_score = ?summary.mean_score,
                "scaling up"
            );
            report.created = self.scale_up(summary.highest_weight).await;
        }

        if summary.wants_scale_down()
            && self.active_count() > 1
            && let Some(id) = &summary.lowest
            && self.scale_down(id)
        {
            report.drained = Some(id.clone());
        }

        report.published = self.routes.sync_or_log(&self.workers).await;
        report
    }

    /// Run cycles until `shutdown` flips to true or its sender is dropped.
    ///
    /// Running instances are left alone on exit.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.cycle_interval.as_millis() as u64,
            workers = self.workers.len(),
            "fleet controller started"
        );

        while !*shutdown.borrow() {
            let report = self.run_cycle().await;
            info!(
                scored = report.scored,
                up = report.scale_up_flags,
                down = report.scale_down_flags,
                mean_score = ?report.mean_score,
                created = ?report.created,
                drained = ?report.drained,
                removed = ?report.removed,
                lost = ?report.lost,
                stale = ?report.stale,
                published = report.published,
                "cycle complete"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.cycle_interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("fleet controller shutting down");
    }
}
