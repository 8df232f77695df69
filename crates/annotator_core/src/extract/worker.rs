//! Extraction worker.
//!
//! A worker pulls candidates from the shared work queue, runs every
//! applicable extraction function and pushes its results to the runner's
//! single output channel.

use crate::extract::function::{ExtractionError, SharedExtractor};
use crate::model::annotation::{AnnotationKind, AnnotationRow, KeyGroup};
use crate::model::candidate::{Candidate, CandidateId};
use crate::service::cancel::CancellationToken;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, warn};
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use uuid::Uuid;

/// Message sent from a worker to the runner's drain loop.
#[derive(Debug)]
pub(crate) enum WorkerMessage<V> {
    /// A key name this worker has not seen before.
    KeyCreate { name: String, group: KeyGroup },
    /// The candidate's combined sparse row. Acknowledges the candidate.
    AnnotationWrite(AnnotationRow<V>),
    /// The candidate was skipped. Acknowledges the candidate.
    Failed(ExtractionError),
}

impl<V> WorkerMessage<V> {
    /// Candidate acknowledged by this message, if any.
    pub(crate) fn acknowledged(&self) -> Option<CandidateId>
    where
        V: Copy + PartialEq,
    {
        match self {
            Self::KeyCreate { .. } => None,
            Self::AnnotationWrite(row) => Some(row.candidate_id()),
            Self::Failed(err) => Some(err.candidate_id()),
        }
    }
}

/// Counters reported by a worker when it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct WorkerStats {
    pub processed: usize,
    pub failed: usize,
    /// Pairs dropped because their key is outside a frozen vocabulary.
    pub dropped_pairs: usize,
}

/// Result of extracting one candidate.
#[derive(Debug)]
pub(crate) struct Extraction<V> {
    /// Keys to create before the row is written, in first-seen order.
    pub new_keys: Vec<String>,
    pub row: AnnotationRow<V>,
    pub dropped_pairs: usize,
}

pub(crate) struct Worker<'f, K: AnnotationKind> {
    run_id: Uuid,
    id: usize,
    functions: &'f [SharedExtractor<K::Value>],
    group: KeyGroup,
    known_keys: HashSet<String>,
    allow_new_keys: bool,
}

impl<'f, K: AnnotationKind> Worker<'f, K> {
    /// `known_keys` seeds the local key cache; keys in it never produce
    /// `KeyCreate` messages. With `allow_new_keys = false` the cache is also
    /// the full vocabulary and other keys are dropped.
    pub(crate) fn new(
        run_id: Uuid,
        id: usize,
        functions: &'f [SharedExtractor<K::Value>],
        group: KeyGroup,
        known_keys: HashSet<String>,
        allow_new_keys: bool,
    ) -> Self {
        Self {
            run_id,
            id,
            functions,
            group,
            known_keys,
            allow_new_keys,
        }
    }

    /// Runs every applicable function on `candidate` and builds its row.
    ///
    /// The local key cache is only updated once the whole candidate
    /// succeeded, so a failure never hides a key from later candidates.
    pub(crate) fn extract(
        &mut self,
        candidate: &Candidate,
    ) -> Result<Extraction<K::Value>, ExtractionError> {
        let mut pairs: Vec<(String, K::Value)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut dropped_pairs = 0;

        for function in self
            .functions
            .iter()
            .filter(|function| function.applies_to(&candidate.class_name))
        {
            let output = match panic::catch_unwind(AssertUnwindSafe(|| function.extract(candidate))) {
                Ok(Ok(output)) => output,
                Ok(Err(err)) => {
                    return Err(ExtractionError::Failed {
                        candidate_id: candidate.id,
                        function: function.name().to_string(),
                        message: err.to_string(),
                    });
                }
                Err(payload) => {
                    return Err(ExtractionError::Panicked {
                        candidate_id: candidate.id,
                        function: function.name().to_string(),
                        message: panic_message(payload.as_ref()),
                    });
                }
            };

            for (key, value) in output {
                let malformed = |reason: String| ExtractionError::Malformed {
                    candidate_id: candidate.id,
                    function: function.name().to_string(),
                    reason,
                };
                if key.trim().is_empty() {
                    return Err(malformed("empty key name".to_string()));
                }
                if !K::is_well_formed(&value) {
                    return Err(malformed(format!(
                        "value {value:?} for key `{key}` cannot be stored"
                    )));
                }
                if K::is_absent(&value) {
                    continue;
                }
                if !seen.insert(key.clone()) {
                    return Err(malformed(format!("key `{key}` emitted more than once")));
                }
                if !self.allow_new_keys && !self.known_keys.contains(&key) {
                    dropped_pairs += 1;
                    continue;
                }
                if let Some(max) = K::MAX_PAIRS.filter(|max| pairs.len() >= *max) {
                    return Err(malformed(format!(
                        "key `{key}` exceeds {max} {} pair(s) per candidate",
                        K::NAME
                    )));
                }
                pairs.push((key, value));
            }
        }

        let row = AnnotationRow::sparse::<K>(candidate.id, pairs);
        let mut new_keys = Vec::new();
        for key in row.keys() {
            if self.known_keys.insert(key.to_string()) {
                new_keys.push(key.to_string());
            }
        }

        Ok(Extraction {
            new_keys,
            row,
            dropped_pairs,
        })
    }

    /// Consumes candidates until the queue closes, the output channel closes
    /// or the run is cancelled.
    pub(crate) fn run(
        mut self,
        jobs: Receiver<Candidate>,
        out: Sender<WorkerMessage<K::Value>>,
        cancel: &CancellationToken,
    ) -> WorkerStats {
        let mut stats = WorkerStats::default();

        while !cancel.is_cancelled() {
            let Ok(candidate) = jobs.recv() else {
                break;
            };
            if cancel.is_cancelled() {
                break;
            }

            let messages = match self.extract(&candidate) {
                Ok(extraction) => {
                    stats.processed += 1;
                    stats.dropped_pairs += extraction.dropped_pairs;
                    let group = self.group;
                    let mut messages: Vec<WorkerMessage<K::Value>> = extraction
                        .new_keys
                        .into_iter()
                        .map(|name| WorkerMessage::KeyCreate { name, group })
                        .collect();
                    messages.push(WorkerMessage::AnnotationWrite(extraction.row));
                    messages
                }
                Err(err) => {
                    stats.failed += 1;
                    warn!(
                        "event=candidate_extract module=extract status=error run_id={} worker={} kind={} candidate_id={} function={} error_code={} error={}",
                        self.run_id,
                        self.id,
                        K::NAME,
                        err.candidate_id(),
                        err.function(),
                        err.code(),
                        err
                    );
                    vec![WorkerMessage::Failed(err)]
                }
            };

            for message in messages {
                if out.send(message).is_err() {
                    debug!(
                        "event=worker_stop module=extract status=skip run_id={} worker={} reason=output_closed",
                        self.run_id, self.id
                    );
                    return stats;
                }
            }
        }

        debug!(
            "event=worker_stop module=extract status=ok run_id={} worker={} processed={} failed={}",
            self.run_id, self.id, stats.processed, stats.failed
        );
        stats
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{Worker, WorkerMessage};
    use crate::extract::function::{ExtractOutput, ExtractionError, FnExtractor, SharedExtractor};
    use crate::model::annotation::{Feature, GoldLabel};
    use crate::model::candidate::Candidate;
    use crate::service::cancel::CancellationToken;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;
    use uuid::Uuid;

    fn extractor(
        name: &str,
        func: impl Fn(&Candidate) -> ExtractOutput<f64> + Send + Sync + 'static,
    ) -> SharedExtractor<f64> {
        Arc::new(FnExtractor::new(name, func))
    }

    fn candidate(id: i64) -> Candidate {
        Candidate::new(id, "PartTemp", 0, json!({}))
    }

    #[test]
    fn extract_concatenates_functions_and_reports_new_keys_once() {
        let functions = vec![
            extractor("f1", |_| Ok(vec![("a".to_string(), 1.0), ("b".to_string(), 0.0)])),
            extractor("f2", |_| Ok(vec![("c".to_string(), 2.5)])),
        ];
        let mut worker = Worker::<Feature>::new(Uuid::nil(), 0, &functions, 0, HashSet::new(), true);

        let first = worker.extract(&candidate(1)).unwrap();
        assert_eq!(first.new_keys, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(first.row.keys(), vec!["a", "c"]);
        assert_eq!(first.row.values(), vec![1.0, 2.5]);

        let second = worker.extract(&candidate(2)).unwrap();
        assert!(second.new_keys.is_empty());
    }

    #[test]
    fn frozen_vocabulary_drops_unknown_keys() {
        let functions = vec![extractor("f", |_| {
            Ok(vec![("known".to_string(), 1.0), ("new".to_string(), 2.0)])
        })];
        let known = HashSet::from(["known".to_string()]);
        let mut worker = Worker::<Feature>::new(Uuid::nil(), 0, &functions, 0, known, false);

        let extraction = worker.extract(&candidate(1)).unwrap();
        assert!(extraction.new_keys.is_empty());
        assert_eq!(extraction.row.keys(), vec!["known"]);
        assert_eq!(extraction.dropped_pairs, 1);
    }

    #[test]
    fn malformed_and_failing_output_is_reported() {
        let nan = vec![extractor("nan", |_| Ok(vec![("x".to_string(), f64::NAN)]))];
        let mut worker = Worker::<Feature>::new(Uuid::nil(), 0, &nan, 0, HashSet::new(), true);
        assert!(matches!(
            worker.extract(&candidate(1)),
            Err(ExtractionError::Malformed { .. })
        ));

        let duplicate = vec![
            extractor("d1", |_| Ok(vec![("x".to_string(), 1.0)])),
            extractor("d2", |_| Ok(vec![("x".to_string(), 2.0)])),
        ];
        let mut worker = Worker::<Feature>::new(Uuid::nil(), 0, &duplicate, 0, HashSet::new(), true);
        let err = worker.extract(&candidate(2)).unwrap_err();
        assert_eq!(err.function(), "d2");

        let failing = vec![extractor("boom", |_| Err("no mention".into()))];
        let mut worker = Worker::<Feature>::new(Uuid::nil(), 0, &failing, 0, HashSet::new(), true);
        let err = worker.extract(&candidate(3)).unwrap_err();
        assert_eq!(err.candidate_id(), 3);
        assert!(err.to_string().contains("no mention"));
    }

    #[test]
    fn gold_labels_allow_a_single_pair_per_candidate() {
        let annotators: Vec<SharedExtractor<i64>> = vec![
            Arc::new(FnExtractor::new("alice", |_: &Candidate| -> ExtractOutput<i64> {
                Ok(vec![("alice".to_string(), 1)])
            })),
            Arc::new(FnExtractor::new("bob", |_: &Candidate| -> ExtractOutput<i64> {
                Ok(vec![("bob".to_string(), -1), ("carol".to_string(), 0)])
            })),
        ];

        let mut single = Worker::<GoldLabel>::new(Uuid::nil(), 0, &annotators[..1], 0, HashSet::new(), true);
        assert_eq!(single.extract(&candidate(1)).unwrap().row.len(), 1);

        let mut both = Worker::<GoldLabel>::new(Uuid::nil(), 0, &annotators, 0, HashSet::new(), true);
        match both.extract(&candidate(2)) {
            Err(ExtractionError::Malformed { function, reason, .. }) => {
                assert_eq!(function, "bob");
                assert!(reason.contains("gold_label"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn panicking_function_is_contained() {
        let functions = vec![extractor("panics", |_| panic!("bad span"))];
        let mut worker = Worker::<Feature>::new(Uuid::nil(), 0, &functions, 0, HashSet::new(), true);
        match worker.extract(&candidate(4)) {
            Err(ExtractionError::Panicked { message, .. }) => assert_eq!(message, "bad span"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn run_emits_key_creates_before_the_row() {
        let functions = vec![extractor("f", |_| Ok(vec![("a".to_string(), 1.0)]))];
        let worker = Worker::<Feature>::new(Uuid::nil(), 0, &functions, 3, HashSet::new(), true);
        let (job_tx, job_rx) = crossbeam_channel::unbounded();
        let (out_tx, out_rx) = crossbeam_channel::unbounded();
        job_tx.send(candidate(1)).unwrap();
        job_tx.send(candidate(2)).unwrap();
        drop(job_tx);

        let stats = worker.run(job_rx, out_tx, &CancellationToken::new());
        assert_eq!(stats.processed, 2);

        let messages: Vec<_> = out_rx.iter().collect();
        assert_eq!(messages.len(), 3);
        assert!(matches!(
            &messages[0],
            WorkerMessage::KeyCreate { name, group: 3 } if name == "a"
        ));
        assert_eq!(messages[1].acknowledged(), Some(1));
        assert_eq!(messages[2].acknowledged(), Some(2));
    }
}
