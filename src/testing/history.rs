use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Deserialize;

/// One completed invocation against the object under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation<I, O> {
    pub client_id: usize,
    pub input: I,
    pub output: O,
    /// Nanoseconds since the start of the round, read just before the call.
    pub call: u64,
    /// Nanoseconds since the start of the round, read just after the return.
    pub ret: u64,
}

impl<I, O> Operation<I, O> {
    /// Whether the two operations' call/return intervals overlap.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.call <= other.ret && other.call <= self.ret
    }
}

/// How the recorder reads the clock around each invocation.
///
/// The default is `Plain`: a barrier next to the timestamp would itself order
/// the memory accesses the experiment is trying to catch being reordered. The
/// other two exist as controls, to show that ordering the timestamps makes
/// violations disappear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockPolicy {
    Plain,
    /// A full `SeqCst` fence after the call stamp and before the return stamp.
    Fenced,
    /// Release-store the call stamp into a shared counter and acquire-load it
    /// back before taking the return stamp.
    AtomicCounter,
}

impl Default for ClockPolicy {
    fn default() -> Self {
        ClockPolicy::Plain
    }
}

/// Immutable per-round state handed to every worker when it is spawned.
#[derive(Debug)]
pub struct ExperimentContext {
    start: Instant,
    clock: ClockPolicy,
    counter: AtomicU64,
}

impl ExperimentContext {
    pub fn new(clock: ClockPolicy) -> Self {
        Self {
            start: Instant::now(),
            clock,
            counter: AtomicU64::new(0),
        }
    }

    pub fn clock(&self) -> ClockPolicy {
        self.clock
    }

    fn now(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }

    fn stamp_call(&self) -> u64 {
        let call = self.now();
        match self.clock {
            ClockPolicy::Plain => {}
            ClockPolicy::Fenced => fence(Ordering::SeqCst),
            ClockPolicy::AtomicCounter => self.counter.store(call, Ordering::Release),
        }
        call
    }

    fn stamp_return(&self) -> u64 {
        match self.clock {
            ClockPolicy::Plain => {}
            ClockPolicy::Fenced => fence(Ordering::SeqCst),
            ClockPolicy::AtomicCounter => {
                let _ = self.counter.load(Ordering::Acquire);
            }
        }
        self.now()
    }
}

/// The operations of one round, appended concurrently by every client.
///
/// The lock is held for the push only. Entries come out in whatever order
/// they were appended; only their timestamps carry meaning.
#[derive(Debug)]
pub struct History<I, O> {
    operations: Mutex<Vec<Operation<I, O>>>,
}

impl<I, O> History<I, O> {
    pub fn new() -> Self {
        Self { operations: Mutex::new(Vec::new()) }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { operations: Mutex::new(Vec::with_capacity(capacity)) }
    }

    pub fn record(&self, operation: Operation<I, O>) {
        self.operations.lock().push(operation);
    }

    pub fn len(&self) -> usize {
        self.operations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_operations(self) -> Vec<Operation<I, O>> {
        self.operations.into_inner()
    }
}

impl<I, O> Default for History<I, O> {
    fn default() -> Self {
        Self::new()
    }
}

/// A client's handle for timing invocations and appending them to a history.
pub struct Recorder<'a, I, O> {
    client_id: usize,
    context: &'a ExperimentContext,
    history: &'a History<I, O>,
}

impl<'a, I, O> Recorder<'a, I, O> {
    pub fn new(client_id: usize, context: &'a ExperimentContext, history: &'a History<I, O>) -> Self {
        Self { client_id, context, history }
    }

    pub fn client_id(&self) -> usize {
        self.client_id
    }

    /// Time one invocation. `invoke` performs the call and returns the input
    /// it used together with the output it got; nothing else happens between
    /// the two timestamps.
    pub fn record<F>(&self, invoke: F)
    where
        F: FnOnce() -> (I, O),
    {
        let call = self.context.stamp_call();
        let (input, output) = invoke();
        let ret = self.context.stamp_return();

        self.history.record(Operation {
            client_id: self.client_id,
            input,
            output,
            call,
            ret,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::{ClockPolicy, ExperimentContext, History, Operation, Recorder};
    use std::sync::Arc;
    use std::thread;

    fn op(client_id: usize, call: u64, ret: u64) -> Operation<u8, u8> {
        Operation { client_id, input: 0, output: 0, call, ret }
    }

    #[test]
    fn test_overlaps() {
        assert!(op(0, 0, 10).overlaps(&op(1, 5, 15)));
        assert!(op(0, 0, 10).overlaps(&op(1, 10, 15)));
        assert!(!op(0, 0, 10).overlaps(&op(1, 11, 15)));
        assert!(op(1, 2, 3).overlaps(&op(0, 0, 10)));
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        for &clock in &[ClockPolicy::Plain, ClockPolicy::Fenced, ClockPolicy::AtomicCounter] {
            let context = Arc::new(ExperimentContext::new(clock));
            let history: Arc<History<usize, usize>> = Arc::new(History::new());
            let mut wait_vec = Vec::new();

            for id in 0..8 {
                let context = context.clone();
                let history = history.clone();
                wait_vec.push(thread::spawn(move || {
                    let recorder = Recorder::new(id, &context, &history);
                    for i in 0..500 {
                        recorder.record(|| (i, id));
                    }
                }));
            }
            for handle in wait_vec {
                handle.join().unwrap();
            }

            let history = Arc::try_unwrap(history).unwrap();
            let operations = history.into_operations();
            assert_eq!(operations.len(), 8 * 500);
            for id in 0..8 {
                let mine: Vec<_> = operations.iter().filter(|o| o.client_id == id).collect();
                assert_eq!(mine.len(), 500);
                // Each input appears exactly once per client
                let mut inputs: Vec<usize> = mine.iter().map(|o| o.input).collect();
                inputs.sort();
                assert_eq!(inputs, (0..500).collect::<Vec<_>>());
            }
            assert!(operations.iter().all(|o| o.call <= o.ret && o.output == o.client_id));
        }
    }

    #[test]
    fn test_client_operations_are_sequential() {
        let context = ExperimentContext::new(ClockPolicy::Plain);
        let history: History<u32, ()> = History::new();
        let recorder = Recorder::new(3, &context, &history);
        for i in 0..100 {
            recorder.record(|| (i, ()));
        }
        let operations = history.into_operations();
        for pair in operations.windows(2) {
            assert!(pair[0].ret <= pair[1].call);
            assert_eq!(pair[0].client_id, 3);
        }
    }
}
