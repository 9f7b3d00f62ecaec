//! The linearizability experiment: rounds of concurrent clients hammering one
//! key of a map, each round's history handed to an oracle.

use std::time::{Duration, Instant};

use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::checker::{Counterexample, Oracle, Verdict, WglChecker};
use super::history::{ExperimentContext, History, Operation, Recorder};
use super::model::{MapInput, MapOutput, Model, SingleKeyModel};
use super::reporter::ViolationReporter;
use super::visualize::{HtmlVisualizer, Visualizer};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::structures::ConcurrentMap;

/// The key every client operates on.
pub const EXPERIMENT_KEY: &str = "k";

/// Which operations the clients issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMix {
    /// `Delete` on every third operation, `Insert` otherwise.
    InsertDelete,
    /// `Insert`, `Delete`, `Load` and `Store` in turn.
    Full,
}

impl Default for OperationMix {
    fn default() -> Self {
        OperationMix::InsertDelete
    }
}

impl OperationMix {
    /// The input for operation `i` of `client`. Values are unique per
    /// client and operation so the checker can tell writers apart.
    pub fn input(&self, client: usize, i: usize) -> MapInput<u64> {
        let value = (client * 1000 + i) as u64;
        match *self {
            OperationMix::InsertDelete => {
                if i % 3 == 0 {
                    MapInput::Delete
                } else {
                    MapInput::Insert(value)
                }
            }
            OperationMix::Full => match i % 4 {
                0 => MapInput::Insert(value),
                1 => MapInput::Delete,
                2 => MapInput::Load,
                _ => MapInput::Store(value),
            },
        }
    }
}

/// Perform one input against the map and translate the result into the
/// model's vocabulary.
pub fn apply<M>(map: &M, input: MapInput<u64>) -> (MapInput<u64>, MapOutput<u64>)
where
    M: ConcurrentMap<&'static str, u64> + ?Sized,
{
    let output = match input {
        MapInput::Insert(value) => match map.insert_if_absent(EXPERIMENT_KEY, value) {
            None => MapOutput::inserted(),
            Some(existing) => MapOutput::existing(existing),
        },
        MapInput::Delete => match map.take_and_remove(&EXPERIMENT_KEY) {
            Some(value) => MapOutput::found(value),
            None => MapOutput::missing(),
        },
        MapInput::Load => match map.load(&EXPERIMENT_KEY) {
            Some(value) => MapOutput::found(value),
            None => MapOutput::missing(),
        },
        MapInput::Store(value) => {
            map.store(EXPERIMENT_KEY, value);
            MapOutput::stored()
        }
    };
    (input, output)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentSummary {
    pub rounds: usize,
    pub legal: usize,
    /// Rounds where the oracle ran out of time.
    pub inconclusive: usize,
    pub elapsed: Duration,
}

pub type MapOperation = Operation<MapInput<u64>, MapOutput<u64>>;

pub struct LinearizabilityExperiment<F, O = WglChecker, V = HtmlVisualizer> {
    config: HarnessConfig,
    factory: F,
    oracle: O,
    reporter: ViolationReporter<V>,
    model: SingleKeyModel<u64>,
}

impl<F> LinearizabilityExperiment<F> {
    /// An experiment checked by [`WglChecker`] that writes HTML artifacts to
    /// the configured directory.
    pub fn new(config: HarnessConfig, factory: F) -> Self {
        let reporter = ViolationReporter::new(config.artifact_dir.clone(), config.artifact_prefix.clone());
        Self {
            config,
            factory,
            oracle: WglChecker::new(),
            reporter,
            model: SingleKeyModel::new(),
        }
    }
}

impl<F, O, V> LinearizabilityExperiment<F, O, V>
where
    O: Oracle,
    V: Visualizer,
{
    pub fn with_oracle<P: Oracle>(self, oracle: P) -> LinearizabilityExperiment<F, P, V> {
        LinearizabilityExperiment {
            config: self.config,
            factory: self.factory,
            oracle,
            reporter: self.reporter,
            model: self.model,
        }
    }

    pub fn with_reporter<W: Visualizer>(self, reporter: ViolationReporter<W>) -> LinearizabilityExperiment<F, O, W> {
        LinearizabilityExperiment {
            config: self.config,
            factory: self.factory,
            oracle: self.oracle,
            reporter,
            model: self.model,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run every round. Stops at the first violation, or the first
    /// inconclusive round when timeouts are strict.
    #[instrument(skip(self), fields(rounds = self.config.rounds, workers = self.config.workers))]
    pub fn run<M>(&self) -> Result<ExperimentSummary>
    where
        F: Fn() -> M,
        M: ConcurrentMap<&'static str, u64>,
    {
        let started = Instant::now();
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .thread_name(|i| format!("mapcheck-client-{}", i))
            .build()
            .map_err(|e| HarnessError::Config(e.to_string()))?;

        info!(
            ops_per_client = self.config.ops_per_client,
            timeout_ms = self.config.timeout_ms,
            clock = ?self.config.clock,
            mix = ?self.config.mix,
            shared_map = self.config.shared_map,
            "starting linearizability experiment"
        );

        let shared = if self.config.shared_map { Some((self.factory)()) } else { None };
        let mut summary = ExperimentSummary {
            rounds: 0,
            legal: 0,
            inconclusive: 0,
            elapsed: Duration::default(),
        };

        for round in 0..self.config.rounds {
            let fresh;
            let map = match shared {
                Some(ref map) => {
                    // Every round starts from an absent key
                    map.take_and_remove(&EXPERIMENT_KEY);
                    map
                }
                None => {
                    fresh = (self.factory)();
                    &fresh
                }
            };

            match self.run_round(round, map, &pool)? {
                Verdict::Legal => summary.legal += 1,
                Verdict::Unknown => summary.inconclusive += 1,
                Verdict::Illegal => {}
            }
            summary.rounds += 1;
        }

        summary.elapsed = started.elapsed();
        info!(
            rounds = summary.rounds,
            legal = summary.legal,
            inconclusive = summary.inconclusive,
            elapsed_ms = u64::try_from(summary.elapsed.as_millis()).unwrap_or(u64::MAX),
            "linearizability experiment finished"
        );
        Ok(summary)
    }

    /// Record one round against `map` and check it.
    pub fn run_round<M>(&self, round: usize, map: &M, pool: &ThreadPool) -> Result<Verdict>
    where
        M: ConcurrentMap<&'static str, u64>,
    {
        let operations = self.record(map, pool);
        let timeout = self.config.timeout();
        let outcome = self.oracle.check(&self.model, &operations, timeout);
        debug!(round, explored = outcome.explored, verdict = ?outcome.verdict, "checked round");

        match outcome.verdict {
            Verdict::Legal => Ok(Verdict::Legal),
            Verdict::Illegal => {
                let counterexample = outcome.counterexample.unwrap_or_else(|| Counterexample {
                    operations,
                    linearized: Vec::new(),
                    states: vec![self.model.init()],
                    stuck: Vec::new(),
                });
                Err(self.reporter.report_linearizability(round, &self.model, &counterexample))
            }
            Verdict::Unknown => {
                if self.config.strict_timeouts {
                    return Err(HarnessError::InconclusiveTimeout {
                        round,
                        timeout_ms: timeout.as_millis(),
                    });
                }
                warn!(round, timeout_ms = self.config.timeout_ms, "checker timed out, round inconclusive");
                Ok(Verdict::Unknown)
            }
        }
    }

    fn record<M>(&self, map: &M, pool: &ThreadPool) -> Vec<MapOperation>
    where
        M: ConcurrentMap<&'static str, u64>,
    {
        let workers = self.config.workers;
        let ops = self.config.ops_per_client;
        let mix = self.config.mix;
        let context = ExperimentContext::new(self.config.clock);
        let history = History::with_capacity(workers * ops);

        pool.scope(|s| {
            for client in 0..workers {
                let context = &context;
                let history = &history;
                s.spawn(move |_| {
                    let recorder = Recorder::new(client, context, history);
                    for i in 0..ops {
                        let input = mix.input(client, i);
                        recorder.record(|| apply(map, input));
                    }
                });
            }
        });

        history.into_operations()
    }
}
