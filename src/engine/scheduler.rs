use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::defs::{PipelineError, RunConfig};
use crate::engine::combinators::{self, BarrierResult};
use crate::engine::graph::{Graph, Operator};
use crate::engine::record::{Artifact, RecordKey, StageRecord};
use crate::engine::stage::{ResourceClass, StageExecutor, StageNode, StageSpec};


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFailure {
    pub stage: String,
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinMismatch {
    pub join: String,
    pub left_only: Vec<String>,
    pub right_only: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierOutcome {
    pub barrier: String,
    pub key: String,
    pub expected: Option<usize>,
    pub received: usize,
    pub fired: bool,
    pub mandatory: bool,
}

/// Run-wide result accumulator, threaded explicitly through every scheduler task.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub completed: BTreeMap<String, usize>,
    pub failures: Vec<KeyFailure>,
    pub join_mismatches: Vec<JoinMismatch>,
    pub barriers: Vec<BarrierOutcome>,
    pub mandatory_barriers: Vec<String>,
    pub cancelled: bool,
}

impl RunReport {
    /// Success requires no failed key, no cancellation and every mandatory barrier fired with its expected
    /// cardinality.
    pub fn is_success(&self) -> bool {
        !self.cancelled
            && self.failures.is_empty()
            && self.mandatory_barriers.iter().all(|name| {
                let outcomes: Vec<&BarrierOutcome> = self.barriers.iter().filter(|b| &b.barrier == name).collect();
                !outcomes.is_empty() && outcomes.iter().all(|b| b.fired)
            })
    }

    pub fn completed(&self, stage: &str) -> usize {
        self.completed.get(stage).copied().unwrap_or(0)
    }

    pub fn barrier(&self, name: &str) -> Vec<&BarrierOutcome> {
        self.barriers.iter().filter(|b| b.barrier == name).collect()
    }

    pub fn starved(&self) -> Vec<&BarrierOutcome> {
        self.barriers.iter().filter(|b| !b.fired).collect()
    }

    /// Total keys dropped by joins.
    pub fn join_drops(&self) -> usize {
        self.join_mismatches
            .iter()
            .map(|m| m.left_only.len() + m.right_only.len())
            .sum()
    }

    pub fn log_summary(&self) {
        for (stage, count) in &self.completed {
            info!("Stage {}: {} execution(s) completed", stage, count);
        }
        for failure in &self.failures {
            error!("Stage {} failed for {}: {}", failure.stage, failure.key, failure.error);
        }
        for mismatch in &self.join_mismatches {
            warn!(
                "Join {} dropped keys (left only: {:?}, right only: {:?})",
                mismatch.join, mismatch.left_only, mismatch.right_only
            );
        }
        for barrier in self.starved() {
            warn!(
                "Barrier {} [{}] never fired: expected {:?} records, received {}",
                barrier.barrier, barrier.key, barrier.expected, barrier.received
            );
        }
    }
}

type Ledger = Arc<Mutex<RunReport>>;

fn record_in<F: FnOnce(&mut RunReport)>(ledger: &Ledger, f: F) {
    let mut guard = ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard);
}


#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_forks: usize,
    pub heavy_forks: usize,
    pub fail_fast: bool,
    pub work_root: PathBuf,
}

impl From<&RunConfig> for SchedulerSettings {
    fn from(config: &RunConfig) -> Self {
        SchedulerSettings {
            max_forks: config.max_forks,
            heavy_forks: config.heavy_forks,
            fail_fast: config.fail_fast(),
            work_root: config.out_dir.clone(),
        }
    }
}

struct Slots {
    global: Semaphore,
    heavy: Semaphore,
}


/// Drives a built graph: every combinator and stage node runs as its own task, stage executions are
/// dispatched per ready record within the concurrency bounds.
pub struct Scheduler {
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        Scheduler { settings }
    }

    /// Executes the graph to completion.
    ///
    /// # Arguments
    ///
    /// * `graph` - Graph from the topology builder; consumed.
    /// * `executor` - Runs the external computation of each stage.
    ///
    /// # Returns
    /// RunReport. Under fail-fast the first per-key failure aborts the run and is returned as the error.
    pub async fn run(&self, graph: Graph, executor: Arc<dyn StageExecutor>) -> Result<RunReport, PipelineError> {
        let Graph { sources, nodes, operators } = graph;
        drop(sources);

        let ledger: Ledger = Arc::new(Mutex::new(RunReport::default()));
        record_in(&ledger, |r| {
            r.mandatory_barriers = operators
                .iter()
                .filter_map(|op| match op {
                    Operator::Collect { name, mandatory: true, .. } | Operator::GroupBy { name, .. } => Some(name.clone()),
                    _ => None,
                })
                .collect();
        });

        let slots = Arc::new(Slots {
            global: Semaphore::new(self.settings.max_forks.max(1)),
            heavy: Semaphore::new(self.settings.heavy_forks.max(1)),
        });

        let mut tasks: JoinSet<Result<(), PipelineError>> = JoinSet::new();
        for operator in operators {
            tasks.spawn(run_operator(operator, ledger.clone()));
        }
        for node in nodes {
            debug!("Scheduling stage {}", node.name());
            tasks.spawn(drive_node(
                node,
                executor.clone(),
                slots.clone(),
                ledger.clone(),
                self.settings.work_root.clone(),
                self.settings.fail_fast,
            ));
        }

        let mut first_error: Option<PipelineError> = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Ok(()),
                Err(e) => Err(PipelineError::Other(anyhow::anyhow!("scheduler task panicked: {}", e))),
            };
            if let Err(e) = outcome {
                if first_error.is_none() {
                    error!("Tearing down run: {}", e);
                    tasks.abort_all();
                    record_in(&ledger, |r| r.cancelled = true);
                    first_error = Some(e);
                }
            }
        }

        let report = ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone();
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}


async fn run_operator(operator: Operator, ledger: Ledger) -> Result<(), PipelineError> {
    match operator {
        Operator::Each { name, input, values, slots, output } => {
            let emitted = combinators::each(input, values, output, |rec: &StageRecord, value: &StageRecord| {
                rec.clone().absorb(value, &slots)
            })
                .await;
            debug!("{}: emitted {} record(s)", name, emitted);
        }
        Operator::Join { name, left, right, output } => {
            let stats = combinators::join(left, right, output, StageRecord::merge).await;
            debug!("{}: joined {} record(s)", name, stats.matched);
            if stats.mismatches() > 0 {
                warn!(
                    "{}: {} key(s) present on one side only (left: {:?}, right: {:?})",
                    name,
                    stats.mismatches(),
                    stats.left_only,
                    stats.right_only
                );
                record_in(&ledger, |r| {
                    r.join_mismatches.push(JoinMismatch {
                        join: name.clone(),
                        left_only: stats.left_only.iter().map(|k| k.to_string()).collect(),
                        right_only: stats.right_only.iter().map(|k| k.to_string()).collect(),
                    })
                });
            }
        }
        Operator::Collect { name, input, key, expected, mandatory, output } => {
            let (received, fired) = match combinators::collect(input, expected).await {
                BarrierResult::Fired(members) => {
                    let count = members.len();
                    info!("Barrier {} fired with {} record(s)", name, count);
                    output.emit(StageRecord::collected(key.clone(), members));
                    (count, true)
                }
                BarrierResult::Starved { expected, received } => {
                    warn!(
                        "Barrier {} starved: expected {} record(s), upstream closed after {}",
                        name,
                        expected,
                        received.len()
                    );
                    (received.len(), false)
                }
            };
            record_in(&ledger, |r| {
                r.barriers.push(BarrierOutcome {
                    barrier: name.clone(),
                    key: key.to_string(),
                    expected,
                    received,
                    fired,
                    mandatory,
                })
            });
        }
        Operator::GroupBy { name, input, groups, output } => {
            let outcomes = combinators::group_by(
                input,
                groups,
                |rec: &StageRecord| rec.sample().map(|s| s.group.clone()),
                output,
                |group: &String, members: Vec<StageRecord>| {
                    StageRecord::collected(RecordKey::Group(group.clone()), members)
                },
            )
                .await;
            for outcome in outcomes {
                if outcome.surplus > 0 {
                    warn!(
                        "Barrier {} over-delivered for group {}: expected {} record(s), dropped {} extra",
                        name, outcome.group, outcome.expected, outcome.surplus
                    );
                }
                if !outcome.fired {
                    warn!(
                        "Barrier {} starved for group {}: expected {} record(s), received {}",
                        name, outcome.group, outcome.expected, outcome.received
                    );
                }
                record_in(&ledger, |r| {
                    r.barriers.push(BarrierOutcome {
                        barrier: name.clone(),
                        key: RecordKey::Group(outcome.group.clone()).to_string(),
                        expected: Some(outcome.expected),
                        received: outcome.received,
                        fired: outcome.fired,
                        mandatory: true,
                    })
                });
            }
        }
    }
    Ok(())
}


type Execution = (StageRecord, anyhow::Result<Vec<(&'static str, Artifact)>>);

async fn drive_node(
    node: StageNode,
    executor: Arc<dyn StageExecutor>,
    slots: Arc<Slots>,
    ledger: Ledger,
    work_root: PathBuf,
    fail_fast: bool,
) -> Result<(), PipelineError> {
    let StageNode { spec, mut input, outputs } = node;
    let spec = Arc::new(spec);
    let work_dir = work_root.join(spec.name);
    let mut in_flight: JoinSet<Execution> = JoinSet::new();
    let mut input_open = true;

    while input_open || !in_flight.is_empty() {
        tokio::select! {
            next = input.recv(), if input_open => match next {
                Some(record) => {
                    if let Err(e) = spec.check_ready(&record) {
                        handle_failure(&spec, &record, e, &ledger, fail_fast)?;
                        continue;
                    }
                    in_flight.spawn(execute_one(
                        spec.clone(),
                        record,
                        executor.clone(),
                        slots.clone(),
                        work_dir.clone(),
                    ));
                }
                None => input_open = false,
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                let (record, result) = joined
                    .map_err(|e| PipelineError::Other(anyhow::anyhow!("{} execution task failed: {}", spec.name, e)))?;
                let result = result.and_then(|outs| spec.attach_outputs(record.clone(), outs));
                match result {
                    Ok(done) => {
                        debug!("{} completed for {}", spec.name, done.key());
                        record_in(&ledger, |r| *r.completed.entry(spec.name.to_string()).or_insert(0) += 1);
                        for output in &outputs {
                            output.emit(done.clone());
                        }
                    }
                    Err(e) => handle_failure(&spec, &record, e, &ledger, fail_fast)?,
                }
            }
        }
    }
    Ok(())
}

async fn execute_one(
    spec: Arc<StageSpec>,
    record: StageRecord,
    executor: Arc<dyn StageExecutor>,
    slots: Arc<Slots>,
    work_dir: PathBuf,
) -> Execution {
    let _heavy = match spec.class {
        ResourceClass::Heavy => match slots.heavy.acquire().await {
            Ok(permit) => Some(permit),
            Err(e) => return (record, Err(anyhow::anyhow!("heavy slot pool closed: {}", e))),
        },
        ResourceClass::Light => None,
    };
    let _global = match slots.global.acquire().await {
        Ok(permit) => permit,
        Err(e) => return (record, Err(anyhow::anyhow!("slot pool closed: {}", e))),
    };
    let result = executor.execute(&spec, &record, &work_dir).await;
    (record, result)
}

fn handle_failure(
    spec: &StageSpec,
    record: &StageRecord,
    e: anyhow::Error,
    ledger: &Ledger,
    fail_fast: bool,
) -> Result<(), PipelineError> {
    let key = record.key().to_string();
    error!("Stage {} failed for {}: {:#}", spec.name, key, e);
    record_in(ledger, |r| {
        r.failures.push(KeyFailure {
            stage: spec.name.to_string(),
            key: key.clone(),
            error: format!("{:#}", e),
        })
    });
    if fail_fast {
        return Err(PipelineError::StageFailed {
            stage: spec.name.to_string(),
            key,
            error: format!("{:#}", e),
        });
    }
    Ok(())
}
