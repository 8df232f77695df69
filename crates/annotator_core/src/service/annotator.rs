//! Parallel annotation runner.
//!
//! # Responsibility
//! - Load the split's candidates per class and fan them out to a worker pool.
//! - Drain worker output on the calling thread, the only writer to the key
//!   registry and annotation store during a run.
//! - Own the clear / replace lifecycle and hand back matrix handles.
//!
//! # Invariants
//! - Every dispatched candidate is acknowledged exactly once unless the run
//!   is cancelled.
//! - One class is drained inside one transaction; a store failure rolls it
//!   back so no row references a key that was never persisted.
//! - A worker announces a key before the first row that uses it, and the
//!   output channel is FIFO per worker.

use crate::extract::function::SharedExtractor;
use crate::extract::worker::{Worker, WorkerMessage};
use crate::matrix::loader::{MatrixHandle, MatrixLoader};
use crate::matrix::sparse::SparseMatrix;
use crate::model::annotation::{AnnotationKind, Feature, GoldLabel, Label, WriteMode};
use crate::model::candidate::{Candidate, CandidateId, Split};
use crate::repo::annotation_repo::{
    AnnotationStore, ClearSummary, SqliteAnnotationStore, UpsertOutcome,
};
use crate::repo::candidate_repo::{CandidateSource, SqliteCandidateRepository};
use crate::repo::key_repo::{KeyRegistry, SqliteKeyRegistry};
use crate::repo::{StoreError, StoreResult};
use crate::service::cancel::CancellationToken;
use crate::service::config::{AnnotatorConfig, ConfigError};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::collections::{BTreeMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use std::thread;
use std::time::Instant;
use uuid::Uuid;

pub type RunResult<T> = Result<T, RunError>;

/// Fatal run errors. Per-candidate extraction failures are not here; they
/// are counted in `ClassRunSummary::failed`.
#[derive(Debug)]
pub enum RunError {
    /// Key registry or annotation store write/read failed.
    Store(StoreError),
    InvalidConfig(ConfigError),
    /// A feeder or worker thread died outside an extraction function.
    WorkerPanicked(String),
    /// The pool exited before acknowledging every dispatched candidate.
    Incomplete {
        class_name: String,
        dispatched: usize,
        acknowledged: usize,
    },
}

impl Display for RunError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "annotation store failure: {err}"),
            Self::InvalidConfig(err) => write!(f, "{err}"),
            Self::WorkerPanicked(thread_name) => {
                write!(f, "annotation thread `{thread_name}` panicked")
            }
            Self::Incomplete {
                class_name,
                dispatched,
                acknowledged,
            } => write!(
                f,
                "class `{class_name}`: {acknowledged} of {dispatched} dispatched candidates acknowledged"
            ),
        }
    }
}

impl Error for RunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::InvalidConfig(err) => Some(err),
            Self::WorkerPanicked(_) => None,
            Self::Incomplete { .. } => None,
        }
    }
}

impl From<StoreError> for RunError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<rusqlite::Error> for RunError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(StoreError::from(value))
    }
}

impl From<ConfigError> for RunError {
    fn from(value: ConfigError) -> Self {
        Self::InvalidConfig(value)
    }
}

/// Runner lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Dispatching,
    Draining,
    Reducing,
    Done,
}

impl RunnerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Dispatching => "dispatching",
            Self::Draining => "draining",
            Self::Reducing => "reducing",
            Self::Done => "done",
        }
    }
}

/// Per-run options.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub split: Split,
    /// Passed to the pre-run clear; also lets the run create new keys.
    pub replace_key_set: bool,
    /// Lets the run create new keys when the key set is not replaced.
    pub update_keys: bool,
    /// Overwrite differing existing rows when not clearing.
    pub update_values: bool,
    /// Clear the split (or the whole kind) before processing.
    pub clear: bool,
    pub cancel: CancellationToken,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            split: 0,
            replace_key_set: true,
            update_keys: false,
            update_values: false,
            clear: true,
            cancel: CancellationToken::new(),
        }
    }
}

impl ApplyOptions {
    pub fn for_split(split: Split) -> Self {
        Self {
            split,
            ..Self::default()
        }
    }

    /// Incremental run: keep existing rows, add new keys, skip identical rows.
    pub fn incremental(split: Split) -> Self {
        Self {
            split,
            replace_key_set: false,
            update_keys: true,
            update_values: false,
            clear: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn write_mode(&self) -> WriteMode {
        if self.clear || self.update_values {
            WriteMode::Replace
        } else {
            WriteMode::AppendIfAbsent
        }
    }

    pub fn allows_new_keys(&self) -> bool {
        self.replace_key_set || self.update_keys
    }
}

/// Counters for one candidate class in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassRunSummary {
    pub class_name: String,
    pub dispatched: usize,
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub kept_existing: usize,
    pub failed: usize,
    pub keys_created: usize,
    pub dropped_pairs: usize,
    pub cancelled: bool,
}

impl ClassRunSummary {
    fn new(class_name: &str) -> Self {
        Self {
            class_name: class_name.to_string(),
            ..Self::default()
        }
    }

    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Replaced => self.replaced += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
            UpsertOutcome::KeptExisting => self.kept_existing += 1,
        }
    }
}

/// Result of `Annotator::apply`.
#[derive(Debug)]
pub struct ApplyOutcome<K> {
    pub run_id: Uuid,
    /// Set when the run cleared before processing.
    pub cleared: Option<ClearSummary>,
    /// One entry per class that had candidates in the split.
    pub classes: Vec<ClassRunSummary>,
    /// One lazy matrix per registered class.
    pub matrices: Vec<MatrixHandle<K>>,
}

impl<K> ApplyOutcome<K> {
    pub fn class(&self, class_name: &str) -> Option<&ClassRunSummary> {
        self.classes
            .iter()
            .find(|summary| summary.class_name == class_name)
    }
}

/// Applies extraction functions of kind `K` to candidate classes.
pub struct Annotator<'conn, K: AnnotationKind> {
    conn: &'conn Connection,
    candidate_classes: Vec<String>,
    functions: Vec<SharedExtractor<K::Value>>,
    config: AnnotatorConfig,
    state: RunnerState,
    kind: PhantomData<K>,
}

pub type FeatureAnnotator<'conn> = Annotator<'conn, Feature>;
pub type LabelAnnotator<'conn> = Annotator<'conn, Label>;
pub type GoldLabelAnnotator<'conn> = Annotator<'conn, GoldLabel>;

impl<'conn, K: AnnotationKind> Annotator<'conn, K> {
    /// Creates an annotator over a migrated connection.
    ///
    /// Duplicate class names are ignored; order is kept.
    pub fn new<I, S>(
        conn: &'conn Connection,
        candidate_classes: I,
        functions: Vec<SharedExtractor<K::Value>>,
        config: AnnotatorConfig,
    ) -> RunResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        config.validate()?;
        SqliteAnnotationStore::<K>::try_new(conn)?;
        SqliteCandidateRepository::try_new(conn)?;

        let mut classes: Vec<String> = Vec::new();
        for class_name in candidate_classes {
            let class_name = class_name.into();
            if !classes.contains(&class_name) {
                classes.push(class_name);
            }
        }

        Ok(Self {
            conn,
            candidate_classes: classes,
            functions,
            config,
            state: RunnerState::Idle,
            kind: PhantomData,
        })
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn config(&self) -> &AnnotatorConfig {
        &self.config
    }

    pub fn candidate_classes(&self) -> &[String] {
        &self.candidate_classes
    }

    /// Runs every applicable function over the split's candidates and
    /// persists the results.
    ///
    /// # Errors
    /// - `RunError::Store` when a key or row write fails; the failing class is
    ///   rolled back and the run stops.
    /// - `RunError::WorkerPanicked` / `RunError::Incomplete` when the pool
    ///   dies outside extraction functions.
    pub fn apply(&mut self, options: &ApplyOptions) -> RunResult<ApplyOutcome<K>> {
        let run_id = Uuid::new_v4();
        let started_at = Instant::now();
        info!(
            "event=annotate_apply module=service status=start run_id={run_id} kind={} split={} clear={} replace_key_set={} update_keys={} update_values={} workers={}",
            K::NAME,
            options.split,
            options.clear,
            options.replace_key_set,
            options.update_keys,
            options.update_values,
            self.config.worker_count
        );

        match self.apply_classes(run_id, options) {
            Ok(outcome) => {
                info!(
                    "event=annotate_apply module=service status=ok run_id={run_id} kind={} split={} classes={} duration_ms={}",
                    K::NAME,
                    options.split,
                    outcome.classes.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(outcome)
            }
            Err(err) => {
                self.transition(run_id, RunnerState::Idle);
                error!(
                    "event=annotate_apply module=service status=error run_id={run_id} kind={} split={} duration_ms={} error={err}",
                    K::NAME,
                    options.split,
                    started_at.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }

    /// Deletes annotations for `split`, or every annotation and key of the
    /// kind when `replace_key_set` is set.
    pub fn clear(&self, split: Split, replace_key_set: bool) -> StoreResult<ClearSummary> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let summary = SqliteAnnotationStore::<K>::try_new(&tx)?.clear(
            split,
            &self.candidate_classes,
            replace_key_set,
        )?;
        tx.commit()?;
        Ok(summary)
    }

    /// Deletes every annotation of the kind regardless of split. Keys stay.
    pub fn clear_all(&self) -> StoreResult<usize> {
        let deleted = SqliteAnnotationStore::<K>::try_new(self.conn)?.clear_all()?;
        info!(
            "event=annotations_clear module=service status=ok kind={} scope=all rows_deleted={deleted}",
            K::NAME
        );
        Ok(deleted)
    }

    /// Loads one sparse matrix per registered class for `split`.
    pub fn load_matrices(&self, split: Split) -> StoreResult<BTreeMap<String, SparseMatrix<K::Value>>> {
        let loader = MatrixLoader::<K>::new(self.conn);
        let mut matrices = BTreeMap::new();
        for class_name in &self.candidate_classes {
            let matrix = loader.load(class_name, split, self.config.key_group)?;
            matrices.insert(class_name.clone(), matrix);
        }
        Ok(matrices)
    }

    fn apply_classes(&mut self, run_id: Uuid, options: &ApplyOptions) -> RunResult<ApplyOutcome<K>> {
        let cleared = if options.clear {
            Some(self.clear(options.split, options.replace_key_set)?)
        } else {
            None
        };

        let mut classes = Vec::new();
        for class_name in self.candidate_classes.clone() {
            self.transition(run_id, RunnerState::Dispatching);
            let candidates = SqliteCandidateRepository::try_new(self.conn)?
                .candidates(&class_name, options.split)?;
            if candidates.is_empty() {
                warn!(
                    "event=annotate_class module=service status=skip run_id={run_id} kind={} class={class_name} split={} reason=empty_split",
                    K::NAME,
                    options.split
                );
                continue;
            }
            classes.push(self.run_class(run_id, &class_name, candidates, options)?);
        }

        self.transition(run_id, RunnerState::Reducing);
        let matrices = self
            .candidate_classes
            .iter()
            .map(|class_name| MatrixHandle::new(class_name.as_str(), options.split, self.config.key_group))
            .collect();
        self.transition(run_id, RunnerState::Done);

        Ok(ApplyOutcome {
            run_id,
            cleared,
            classes,
            matrices,
        })
    }

    fn run_class(
        &mut self,
        run_id: Uuid,
        class_name: &str,
        candidates: Vec<Candidate>,
        options: &ApplyOptions,
    ) -> RunResult<ClassRunSummary> {
        let started_at = Instant::now();
        let group = self.config.key_group;
        let mode = options.write_mode();
        let allow_new_keys = options.allows_new_keys();

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let registry = SqliteKeyRegistry::<K>::try_new(&tx)?;
        let store = SqliteAnnotationStore::<K>::try_new(&tx)?;
        let known_keys = registry.names(group)?;
        let mut summary = ClassRunSummary::new(class_name);

        self.transition(run_id, RunnerState::Draining);
        let functions = self.functions.as_slice();
        let config = &self.config;
        let cancel = &options.cancel;

        let pool = thread::scope(|scope| -> RunResult<(usize, usize)> {
            let (job_tx, job_rx) = crossbeam_channel::bounded::<Candidate>(config.queue_capacity);
            let (out_tx, out_rx) =
                crossbeam_channel::bounded::<WorkerMessage<K::Value>>(config.queue_capacity);

            let batch_size = config.batch_size;
            let feeder = scope.spawn(move || feed(candidates, job_tx, batch_size, cancel));
            let workers: Vec<_> = (0..config.worker_count)
                .map(|id| {
                    let worker = Worker::<K>::new(
                        run_id,
                        id,
                        functions,
                        group,
                        known_keys.clone(),
                        allow_new_keys,
                    );
                    let jobs = job_rx.clone();
                    let out = out_tx.clone();
                    scope.spawn(move || worker.run(jobs, out, cancel))
                })
                .collect();
            drop(job_rx);
            drop(out_tx);

            let drained = drain::<K>(out_rx, &registry, &store, mode, &mut summary);

            let dispatched = feeder.join();
            let mut panicked = None;
            for (id, handle) in workers.into_iter().enumerate() {
                match handle.join() {
                    Ok(stats) => summary.dropped_pairs += stats.dropped_pairs,
                    Err(_) => panicked = Some(format!("worker-{id}")),
                }
            }

            let acknowledged = drained?;
            let dispatched =
                dispatched.map_err(|_| RunError::WorkerPanicked("feeder".to_string()))?;
            if let Some(thread_name) = panicked {
                return Err(RunError::WorkerPanicked(thread_name));
            }
            Ok((dispatched, acknowledged))
        });

        let (dispatched, acknowledged) = pool?;
        summary.dispatched = dispatched;
        summary.cancelled = options.cancel.is_cancelled();
        if !summary.cancelled && acknowledged != dispatched {
            return Err(RunError::Incomplete {
                class_name: class_name.to_string(),
                dispatched,
                acknowledged,
            });
        }
        tx.commit()?;

        info!(
            "event=annotate_class module=service status=ok run_id={run_id} kind={} class={class_name} dispatched={} inserted={} replaced={} unchanged={} kept_existing={} failed={} keys_created={} cancelled={} duration_ms={}",
            K::NAME,
            summary.dispatched,
            summary.inserted,
            summary.replaced,
            summary.unchanged,
            summary.kept_existing,
            summary.failed,
            summary.keys_created,
            summary.cancelled,
            started_at.elapsed().as_millis()
        );
        Ok(summary)
    }

    fn transition(&mut self, run_id: Uuid, next: RunnerState) {
        debug!(
            "event=runner_state module=service status=ok run_id={run_id} from={} to={}",
            self.state.as_str(),
            next.as_str()
        );
        self.state = next;
    }
}

/// Pushes candidates into the work queue, checking for cancellation between
/// batches. Returns how many were enqueued.
fn feed(
    candidates: Vec<Candidate>,
    jobs: Sender<Candidate>,
    batch_size: usize,
    cancel: &CancellationToken,
) -> usize {
    let mut dispatched = 0;
    let mut pending = candidates.into_iter().peekable();
    while pending.peek().is_some() {
        if cancel.is_cancelled() {
            break;
        }
        for candidate in pending.by_ref().take(batch_size) {
            if jobs.send(candidate).is_err() {
                return dispatched;
            }
            dispatched += 1;
        }
    }
    dispatched
}

/// Single serialized consumer of worker output. Returns the number of
/// acknowledged candidates once every worker has hung up.
fn drain<K: AnnotationKind>(
    messages: Receiver<WorkerMessage<K::Value>>,
    registry: &impl KeyRegistry,
    store: &impl AnnotationStore<K>,
    mode: WriteMode,
    summary: &mut ClassRunSummary,
) -> StoreResult<usize> {
    let mut acknowledged: HashSet<CandidateId> = HashSet::new();

    for message in messages.iter() {
        if let Some(candidate_id) = message.acknowledged() {
            if !acknowledged.insert(candidate_id) {
                warn!(
                    "event=annotate_drain module=service status=skip candidate_id={candidate_id} reason=duplicate_ack"
                );
                continue;
            }
        }

        match message {
            WorkerMessage::KeyCreate { name, group } => {
                if registry.get_or_create(&name, group)?.created {
                    summary.keys_created += 1;
                }
            }
            WorkerMessage::AnnotationWrite(row) => {
                let outcome = store.upsert(&row, mode)?;
                summary.record(outcome);
            }
            WorkerMessage::Failed(_) => summary.failed += 1,
        }
    }

    Ok(acknowledged.len())
}
