//! Store-buffer litmus tests around a single map operation.
//!
//! Every trial runs the classic store-buffering pattern with a map call in
//! the middle:
//!
//! ```text
//! x = 0, y = 0
//! task A: x = 1; probe(); r1 = y
//! task B: y = 1; probe(); r2 = x
//! ```
//!
//! Under sequential consistency at least one of the tasks must see the other's
//! write, so `r1 == 0 && r2 == 0` means the CPU let a plain store sit in its
//! store buffer across the probe. That can only happen when the probe did
//! nothing but loads. The flags are `AtomicI64` accessed with `Relaxed`
//! ordering: plain loads and stores in the generated code, without the
//! undefined behavior of a data race.
//!
//! The outcome is statistical. A suite that sees no anomaly has shown nothing
//! more than that it did not see one on this machine.

use std::fmt;
use std::hint::black_box;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ScopedJoinHandle};

use crossbeam::utils::{Backoff, CachePadded};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::reporter::ViolationReporter;
use super::visualize::Visualizer;
use crate::config::env_override;
use crate::error::{HarnessError, Result};
use crate::structures::ConcurrentMap;

/// Key touched by the delete and load probes.
pub const PROBE_KEY: &str = "k";
/// Keys written by tasks A and B in the store probe.
pub const STORE_KEYS: [&str; 2] = ["k1", "k2"];
/// Value stored under [`PROBE_KEY`] before each delete-present trial.
pub const PRESENT_VALUE: u64 = 888;

const TRIALS_VAR: &str = "MAPCHECK_TRIALS";

/// Which map call sits between each task's write and read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Probe {
    /// Both tasks remove a key that is never present. Maps that serve a miss
    /// with loads alone can show the anomaly.
    DeleteAbsent,
    /// The key is stored before the trial and both tasks remove it, so at
    /// least one removal writes.
    DeletePresent,
    /// Each task stores its own key.
    Store,
    /// Both tasks load a key that is never present.
    Load,
}

impl Probe {
    pub const ALL: [Probe; 4] = [Probe::DeleteAbsent, Probe::DeletePresent, Probe::Store, Probe::Load];

    /// Whether the probe is expected to be able to show the anomaly on a map
    /// whose read path is load-only.
    pub fn may_reorder(&self) -> bool {
        match *self {
            Probe::DeleteAbsent | Probe::Load => true,
            Probe::DeletePresent | Probe::Store => false,
        }
    }

    /// Per-trial setup, run by the coordinating thread before the tasks start.
    pub fn prepare<M>(&self, map: &M)
    where
        M: ConcurrentMap<&'static str, u64> + ?Sized,
    {
        if let Probe::DeletePresent = *self {
            map.store(PROBE_KEY, PRESENT_VALUE);
        }
    }

    #[inline]
    pub fn call<M>(&self, map: &M, side: Side, trial: usize)
    where
        M: ConcurrentMap<&'static str, u64> + ?Sized,
    {
        match *self {
            Probe::DeleteAbsent | Probe::DeletePresent => {
                black_box(map.take_and_remove(&PROBE_KEY));
            }
            Probe::Store => map.store(STORE_KEYS[side as usize], trial as u64),
            Probe::Load => {
                black_box(map.load(&PROBE_KEY));
            }
        }
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            Probe::DeleteAbsent => "delete-absent",
            Probe::DeletePresent => "delete-present",
            Probe::Store => "store",
            Probe::Load => "load",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A = 0,
    B = 1,
}

/// Whether trials share one map instance.
///
/// This matters: a fresh map per trial has been observed to hide
/// the load anomaly, plausibly because every probe then misses in the cache
/// and the reordering window closes. Both policies are kept so that either
/// can be chosen per experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapReuse {
    Shared,
    FreshPerTrial,
}

impl fmt::Display for MapReuse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            MapReuse::Shared => f.write_str("shared"),
            MapReuse::FreshPerTrial => f.write_str("fresh-per-trial"),
        }
    }
}

/// How the two tasks of a trial are put on threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialScheduler {
    /// The calling thread runs task A and one helper thread, alive for the
    /// whole suite, runs task B. Trials are separated by a spinning
    /// two-party barrier.
    Paired,
    /// Two new threads per trial, joined before the result is read.
    SpawnPerTrial,
}

impl fmt::Display for TrialScheduler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            TrialScheduler::Paired => f.write_str("paired"),
            TrialScheduler::SpawnPerTrial => f.write_str("spawn-per-trial"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicy {
    /// Abort on the first anomalous trial.
    FirstAnomaly,
    /// Run the whole budget and count every anomaly.
    Exhaust,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LitmusConfig {
    pub trials: usize,
    pub probe: Probe,
    pub reuse: MapReuse,
    pub scheduler: TrialScheduler,
    pub stop: StopPolicy,
}

impl Default for LitmusConfig {
    fn default() -> Self {
        Self {
            trials: 5_000_000,
            probe: Probe::DeleteAbsent,
            reuse: MapReuse::Shared,
            scheduler: TrialScheduler::Paired,
            stop: StopPolicy::FirstAnomaly,
        }
    }
}

impl LitmusConfig {
    pub fn new(probe: Probe) -> Self {
        Self { probe, ..Self::default() }
    }

    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| HarnessError::Config(e.to_string()))
    }

    /// Apply `MAPCHECK_TRIALS` if it is set.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(trials) = env_override(TRIALS_VAR)? {
            self.trials = trials;
        }
        Ok(self)
    }

    pub fn with_trials(mut self, trials: usize) -> Self {
        self.trials = trials;
        self
    }

    pub fn with_reuse(mut self, reuse: MapReuse) -> Self {
        self.reuse = reuse;
        self
    }

    pub fn with_scheduler(mut self, scheduler: TrialScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_stop(mut self, stop: StopPolicy) -> Self {
        self.stop = stop;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LitmusOutcome {
    /// The configuration the trials ran under.
    pub config: LitmusConfig,
    pub trials_run: usize,
    pub anomalies: usize,
    pub first_anomaly: Option<usize>,
}

impl LitmusOutcome {
    pub fn observed(&self) -> bool {
        self.anomalies > 0
    }

    /// Turn an observed anomaly into the error that fails the run.
    pub fn check<V: Visualizer>(self, reporter: &ViolationReporter<V>) -> Result<Self> {
        match self.first_anomaly {
            Some(trial) => Err(reporter.report_anomaly(trial, &self.config)),
            None => Ok(self),
        }
    }
}

/// Runs the trials of one probe against maps built by `factory`.
pub struct LitmusSuite<F> {
    config: LitmusConfig,
    factory: F,
}

impl<F> LitmusSuite<F> {
    pub fn new(config: LitmusConfig, factory: F) -> Self {
        Self { config, factory }
    }

    pub fn config(&self) -> &LitmusConfig {
        &self.config
    }

    #[instrument(skip(self), fields(probe = %self.config.probe, trials = self.config.trials))]
    pub fn run<M>(&self) -> LitmusOutcome
    where
        F: Fn() -> M,
        M: ConcurrentMap<&'static str, u64>,
    {
        info!(reuse = ?self.config.reuse, scheduler = ?self.config.scheduler, "starting litmus suite");

        let outcome = match self.config.scheduler {
            TrialScheduler::Paired => self.run_paired(),
            TrialScheduler::SpawnPerTrial => self.run_spawned(),
        };

        match outcome.first_anomaly {
            Some(trial) => info!(
                trial,
                anomalies = outcome.anomalies,
                trials_run = outcome.trials_run,
                "observed r1=0 && r2=0"
            ),
            None => info!(trials = outcome.trials_run, "did not observe r1=0 && r2=0"),
        }
        outcome
    }

    /// Run the suite and fail on the first anomaly.
    pub fn run_checked<M, V>(&self, reporter: &ViolationReporter<V>) -> Result<LitmusOutcome>
    where
        F: Fn() -> M,
        M: ConcurrentMap<&'static str, u64>,
        V: Visualizer,
    {
        self.run().check(reporter)
    }

    fn run_spawned<M>(&self) -> LitmusOutcome
    where
        F: Fn() -> M,
        M: ConcurrentMap<&'static str, u64>,
    {
        let probe = self.config.probe;
        let shared = match self.config.reuse {
            MapReuse::Shared => Some((self.factory)()),
            MapReuse::FreshPerTrial => None,
        };
        let mut tally = Tally::new(&self.config);

        for trial in 0..self.config.trials {
            let fresh;
            let map = match shared {
                Some(ref map) => map,
                None => {
                    fresh = (self.factory)();
                    &fresh
                }
            };
            probe.prepare(map);
            let flags = Flags::new();

            let (r1, r2) = thread::scope(|s| {
                let a = s.spawn(|| flags.task(Side::A, probe, map, trial));
                let b = s.spawn(|| flags.task(Side::B, probe, map, trial));
                (join(a), join(b))
            });

            if !tally.observe(trial, r1, r2) {
                break;
            }
        }

        tally.finish()
    }

    fn run_paired<M>(&self) -> LitmusOutcome
    where
        F: Fn() -> M,
        M: ConcurrentMap<&'static str, u64>,
    {
        let probe = self.config.probe;
        let fresh = self.config.reuse == MapReuse::FreshPerTrial;
        let shared = if fresh { None } else { Some(Arc::new((self.factory)())) };
        let control = Control::new(shared.clone());
        let mut tally = Tally::new(&self.config);

        thread::scope(|s| {
            s.spawn(|| {
                let _guard = AbortOnUnwind(&control.aborted);
                control.helper(probe, fresh);
            });

            let _guard = AbortOnUnwind(&control.aborted);
            for trial in 0..self.config.trials {
                let map = match shared {
                    Some(ref map) => map.clone(),
                    None => Arc::new((self.factory)()),
                };
                probe.prepare(&*map);
                control.flags.reset();
                control.trial.store(trial, Ordering::Relaxed);

                if fresh {
                    *control.handoff_map.lock() = Some(map.clone());
                    if !control.handoff.wait(&control.aborted) {
                        break;
                    }
                }
                if !control.start.wait(&control.aborted) {
                    break;
                }
                let r1 = control.flags.task(Side::A, probe, &*map, trial);
                if !control.finish.wait(&control.aborted) {
                    break;
                }
                let r2 = control.r2.load(Ordering::Relaxed);

                if !tally.observe(trial, r1, r2) {
                    break;
                }
            }

            control.shutdown(fresh);
        });

        tally.finish()
    }
}

/// Run `trials` trials of `probe` on one shared map and return how many were
/// anomalous. Stops at the first anomaly, so the count is 0 or 1.
pub fn run_litmus_suite<M, F>(trials: usize, probe: Probe, factory: F) -> usize
where
    F: Fn() -> M,
    M: ConcurrentMap<&'static str, u64>,
{
    LitmusSuite::new(LitmusConfig::new(probe).with_trials(trials), factory)
        .run()
        .anomalies
}

/// The two flags of a trial, on separate cache lines.
struct Flags {
    x: CachePadded<AtomicI64>,
    y: CachePadded<AtomicI64>,
}

impl Flags {
    fn new() -> Self {
        Self {
            x: CachePadded::new(AtomicI64::new(0)),
            y: CachePadded::new(AtomicI64::new(0)),
        }
    }

    fn reset(&self) {
        self.x.store(0, Ordering::Relaxed);
        self.y.store(0, Ordering::Relaxed);
    }

    /// Write own flag, call the probe, read the other flag.
    #[inline]
    fn task<M>(&self, side: Side, probe: Probe, map: &M, trial: usize) -> i64
    where
        M: ConcurrentMap<&'static str, u64> + ?Sized,
    {
        let (mine, theirs) = match side {
            Side::A => (&self.x, &self.y),
            Side::B => (&self.y, &self.x),
        };
        mine.store(1, Ordering::Relaxed);
        probe.call(map, side, trial);
        theirs.load(Ordering::Relaxed)
    }
}

/// State shared between the coordinating thread and the helper in
/// [`TrialScheduler::Paired`] mode.
struct Control<M> {
    flags: Flags,
    r2: CachePadded<AtomicI64>,
    trial: AtomicUsize,
    stop: AtomicBool,
    aborted: AtomicBool,
    handoff: Rendezvous,
    start: Rendezvous,
    finish: Rendezvous,
    handoff_map: Mutex<Option<Arc<M>>>,
}

impl<M> Control<M>
where
    M: ConcurrentMap<&'static str, u64>,
{
    /// `shared` is handed to the helper up front. Without it the helper
    /// takes a map from every trial's handoff instead.
    fn new(shared: Option<Arc<M>>) -> Self {
        Self {
            flags: Flags::new(),
            r2: CachePadded::new(AtomicI64::new(0)),
            trial: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            handoff: Rendezvous::new(),
            start: Rendezvous::new(),
            finish: Rendezvous::new(),
            handoff_map: Mutex::new(shared),
        }
    }

    /// Task B's side of every trial, until told to stop.
    fn helper(&self, probe: Probe, fresh: bool) {
        let mut current = if fresh { None } else { self.handoff_map.lock().take() };

        loop {
            if fresh {
                if !self.handoff.wait(&self.aborted) || self.stop.load(Ordering::Acquire) {
                    return;
                }
                current = self.handoff_map.lock().take();
            }
            if !self.start.wait(&self.aborted) || self.stop.load(Ordering::Acquire) {
                return;
            }

            let Some(ref map) = current else {
                // Nothing to run against; release the coordinator
                self.aborted.store(true, Ordering::Relaxed);
                return;
            };
            let trial = self.trial.load(Ordering::Relaxed);
            let r2 = self.flags.task(Side::B, probe, &**map, trial);
            self.r2.store(r2, Ordering::Relaxed);

            if !self.finish.wait(&self.aborted) {
                return;
            }
        }
    }

    /// Release the helper from whichever barrier it is parked at.
    fn shutdown(&self, fresh: bool) {
        self.stop.store(true, Ordering::Release);
        if fresh {
            self.handoff.wait(&self.aborted);
        } else {
            self.start.wait(&self.aborted);
        }
    }
}

/// A reusable spinning barrier for exactly two threads.
struct Rendezvous {
    arrived: CachePadded<AtomicUsize>,
    generation: CachePadded<AtomicUsize>,
}

impl Rendezvous {
    fn new() -> Self {
        Self {
            arrived: CachePadded::new(AtomicUsize::new(0)),
            generation: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Block until the other party arrives. Returns false if `aborted` was
    /// raised while waiting.
    fn wait(&self, aborted: &AtomicBool) -> bool {
        let generation = self.generation.load(Ordering::Acquire);
        if self.arrived.fetch_add(1, Ordering::AcqRel) == 1 {
            self.arrived.store(0, Ordering::Relaxed);
            self.generation.fetch_add(1, Ordering::Release);
            return true;
        }

        let backoff = Backoff::new();
        while self.generation.load(Ordering::Acquire) == generation {
            if aborted.load(Ordering::Relaxed) {
                return false;
            }
            backoff.snooze();
        }
        true
    }
}

/// Raises the flag if the owning thread unwinds, so the other side of a
/// [`Rendezvous`] stops waiting for it.
struct AbortOnUnwind<'a>(&'a AtomicBool);

impl<'a> Drop for AbortOnUnwind<'a> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.store(true, Ordering::Relaxed);
        }
    }
}

struct Tally {
    config: LitmusConfig,
    trials_run: usize,
    anomalies: usize,
    first_anomaly: Option<usize>,
}

impl Tally {
    fn new(config: &LitmusConfig) -> Self {
        Self {
            config: config.clone(),
            trials_run: 0,
            anomalies: 0,
            first_anomaly: None,
        }
    }

    /// Record one trial. Returns whether to keep going.
    fn observe(&mut self, trial: usize, r1: i64, r2: i64) -> bool {
        self.trials_run += 1;
        if r1 == 0 && r2 == 0 {
            self.anomalies += 1;
            if self.first_anomaly.is_none() {
                self.first_anomaly = Some(trial);
                debug!(trial, "r1=0 && r2=0");
            }
            return self.config.stop == StopPolicy::Exhaust;
        }
        true
    }

    fn finish(self) -> LitmusOutcome {
        LitmusOutcome {
            config: self.config,
            trials_run: self.trials_run,
            anomalies: self.anomalies,
            first_anomaly: self.first_anomaly,
        }
    }
}

fn join<T>(handle: ScopedJoinHandle<T>) -> T {
    handle.join().unwrap_or_else(|payload| panic::resume_unwind(payload))
}
