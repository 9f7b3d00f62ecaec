//! Utilities for testing concurrent maps against a sequential specification.
//!
//! Two experiments live here. The linearizability experiment records
//! timestamped histories of concurrent clients and checks each round with a
//! Wing-Gong search using Lowe's memoization, as described in
//! [Testing for Linearizability](http://www.cs.ox.ac.uk/people/gavin.lowe/LinearizabiltyTesting/paper.pdf).
//! The litmus harness runs the store-buffering pattern around a single map
//! call to see whether that call orders the plain accesses around it.
//!
//! Neither experiment proves anything when it passes. A clean run means the
//! violation was not observed on this machine in this many attempts.
//!
//! # Example
//! Checking a map for linearizability of insert and delete on one key:
//!
//! ```
//! use mapcheck::config::HarnessConfig;
//! use mapcheck::structures::SlotMap;
//! use mapcheck::testing::LinearizabilityExperiment;
//!
//! let config = HarnessConfig::new()
//!     .with_rounds(5)
//!     .with_ops_per_client(20)
//!     .with_workers(2);
//! let experiment = LinearizabilityExperiment::new(config, SlotMap::<&'static str>::new);
//!
//! let summary = experiment.run().unwrap();
//! assert_eq!(summary.rounds, 5);
//! ```
//!
//! And running the store-buffer litmus test with a delete of a key that is
//! never there:
//!
//! ```
//! use mapcheck::structures::SlotMap;
//! use mapcheck::testing::{LitmusConfig, LitmusSuite, Probe};
//!
//! let config = LitmusConfig::new(Probe::DeleteAbsent).with_trials(1000);
//! let outcome = LitmusSuite::new(config, SlotMap::<&'static str>::new).run();
//!
//! if outcome.observed() {
//!     println!("r1=0 && r2=0 first seen in trial {:?}", outcome.first_anomaly);
//! }
//! ```

pub use self::checker::{CheckOutcome, Counterexample, Oracle, Verdict, WglChecker};
pub use self::experiment::{ExperimentSummary, LinearizabilityExperiment, OperationMix};
pub use self::history::{ClockPolicy, ExperimentContext, History, Operation, Recorder};
pub use self::litmus::{
    run_litmus_suite, LitmusConfig, LitmusOutcome, LitmusSuite, MapReuse, Probe, StopPolicy, TrialScheduler,
};
pub use self::model::{MapInput, MapOutput, MapState, Model, SingleKeyModel};
pub use self::reporter::{ViolationKind, ViolationReporter};
pub use self::visualize::{HtmlVisualizer, Visualizer};

pub mod checker;
pub mod experiment;
pub mod history;
pub mod litmus;
pub mod model;
pub mod reporter;
pub mod visualize;
