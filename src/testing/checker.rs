//! Linearizability checking of recorded histories.
//!
//! [`WglChecker`] follows the strategy from Lowe's [Testing for
//! Linearizability](http://www.cs.ox.ac.uk/people/gavin.lowe/LinearizabiltyTesting/paper.pdf),
//! itself an extension of Wing and Gong's search: linearize each operation as
//! early as the model allows, backtrack when a return is reached with its call
//! still pending, and memoize every (linearized set, state) configuration so
//! the same dead end is never explored twice.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use super::history::Operation;
use super::model::Model;

/// How often, in search steps, the deadline is looked at.
const DEADLINE_CHECK_INTERVAL: u64 = 64;
const HEAD: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Legal,
    Illegal,
    /// The checker ran out of time before deciding.
    Unknown,
}

/// Evidence for an illegal history.
#[derive(Debug, Clone)]
pub struct Counterexample<S, I, O> {
    /// The checked history, sorted by call time.
    pub operations: Vec<Operation<I, O>>,
    /// Indices into `operations` of the longest partial linearization the
    /// search found, in linearization order.
    pub linearized: Vec<usize>,
    /// `states[0]` is the initial state, `states[i + 1]` the state after
    /// `linearized[i]`.
    pub states: Vec<S>,
    /// Operations that could have been linearized next after the longest
    /// prefix but are not legal from its final state.
    pub stuck: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct CheckOutcome<S, I, O> {
    pub verdict: Verdict,
    pub counterexample: Option<Counterexample<S, I, O>>,
    /// Search steps taken.
    pub explored: u64,
    pub elapsed: Duration,
}

pub type ModelOutcome<M> = CheckOutcome<<M as Model>::State, <M as Model>::Input, <M as Model>::Output>;

/// Something that decides whether a history is linearizable with respect to a
/// model, within a time budget.
pub trait Oracle {
    fn check<M: Model>(
        &self,
        model: &M,
        history: &[Operation<M::Input, M::Output>],
        timeout: Duration,
    ) -> ModelOutcome<M>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WglChecker;

impl WglChecker {
    pub fn new() -> Self {
        WglChecker
    }
}

impl Oracle for WglChecker {
    fn check<M: Model>(
        &self,
        model: &M,
        history: &[Operation<M::Input, M::Output>],
        timeout: Duration,
    ) -> ModelOutcome<M> {
        let started = Instant::now();
        // Too large to represent means no deadline at all
        let deadline = started.checked_add(timeout);

        let mut operations = history.to_vec();
        operations.sort_by_key(|op| (op.call, op.ret));

        let mut search = Search::new(model, &operations);
        let verdict = search.run(deadline);
        let counterexample = match verdict {
            Verdict::Illegal => Some(search.counterexample()),
            _ => None,
        };

        CheckOutcome {
            verdict,
            counterexample,
            explored: search.explored,
            elapsed: started.elapsed(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Call { ret: usize },
    Return,
}

/// A node in the doubly linked list of call and return events. Lifting a
/// call unlinks it and its return; the removed nodes keep their own links so
/// they can be spliced back in on backtrack.
#[derive(Debug, Clone)]
struct Node {
    op: usize,
    kind: Kind,
    prev: usize,
    next: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    fn new(bits: usize) -> Self {
        Self { words: vec![0; (bits + 63) / 64] }
    }

    fn set(&mut self, bit: usize) {
        self.words[bit / 64] |= 1 << (bit % 64);
    }

    fn clear(&mut self, bit: usize) {
        self.words[bit / 64] &= !(1 << (bit % 64));
    }

    fn contains(&self, bit: usize) -> bool {
        self.words[bit / 64] & (1 << (bit % 64)) != 0
    }
}

struct Search<'a, M: Model> {
    model: &'a M,
    operations: &'a [Operation<M::Input, M::Output>],
    nodes: Vec<Node>,
    explored: u64,
    longest: Vec<usize>,
}

impl<'a, M: Model> Search<'a, M> {
    fn new(model: &'a M, operations: &'a [Operation<M::Input, M::Output>]) -> Self {
        // (time, is_return, op): calls sort before returns at equal times,
        // so touching intervals count as overlapping.
        let mut events: Vec<(u64, bool, usize)> = Vec::with_capacity(operations.len() * 2);
        for (i, op) in operations.iter().enumerate() {
            events.push((op.call, false, i));
            events.push((op.ret, true, i));
        }
        events.sort();

        let mut return_node = vec![0; operations.len()];
        for (position, &(_, is_return, op)) in events.iter().enumerate() {
            if is_return {
                return_node[op] = position + 1;
            }
        }

        let mut nodes = Vec::with_capacity(events.len() + 1);
        nodes.push(Node {
            op: usize::MAX,
            kind: Kind::Return,
            prev: HEAD,
            next: if events.is_empty() { None } else { Some(1) },
        });
        for (position, &(_, is_return, op)) in events.iter().enumerate() {
            let index = position + 1;
            nodes.push(Node {
                op,
                kind: if is_return { Kind::Return } else { Kind::Call { ret: return_node[op] } },
                prev: index - 1,
                next: if index < events.len() { Some(index + 1) } else { None },
            });
        }

        Self {
            model,
            operations,
            nodes,
            explored: 0,
            longest: Vec::new(),
        }
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = (self.nodes[index].prev, self.nodes[index].next);
        self.nodes[prev].next = next;
        if let Some(next) = next {
            self.nodes[next].prev = prev;
        }
    }

    fn relink(&mut self, index: usize) {
        let (prev, next) = (self.nodes[index].prev, self.nodes[index].next);
        self.nodes[prev].next = Some(index);
        if let Some(next) = next {
            self.nodes[next].prev = index;
        }
    }

    fn lift(&mut self, call: usize, ret: usize) {
        self.unlink(call);
        self.unlink(ret);
    }

    fn unlift(&mut self, call: usize, ret: usize) {
        self.relink(ret);
        self.relink(call);
    }

    fn run(&mut self, deadline: Option<Instant>) -> Verdict {
        let mut state = self.model.init();
        let mut linearized = BitSet::new(self.operations.len());
        let mut cache: HashSet<(BitSet, M::State)> = HashSet::new();
        let mut calls: Vec<(usize, usize, M::State)> = Vec::new();
        let mut cursor = self.nodes[HEAD].next;

        while self.nodes[HEAD].next.is_some() {
            if self.explored % DEADLINE_CHECK_INTERVAL == 0 && deadline.map_or(false, |d| Instant::now() >= d) {
                return Verdict::Unknown;
            }
            self.explored += 1;

            let index = match cursor {
                Some(index) => index,
                None => unreachable!("cursor ran off a non-empty event list"),
            };
            let node = self.nodes[index].clone();

            match node.kind {
                Kind::Call { ret } => {
                    let op = &self.operations[node.op];
                    let (legal, next_state) = self.model.step(&state, &op.input, &op.output);
                    if legal {
                        let mut candidate = linearized.clone();
                        candidate.set(node.op);
                        if cache.insert((candidate.clone(), next_state.clone())) {
                            let previous = std::mem::replace(&mut state, next_state);
                            calls.push((index, ret, previous));
                            linearized = candidate;
                            self.lift(index, ret);
                            if calls.len() > self.longest.len() {
                                self.longest = calls.iter().map(|&(call, _, _)| self.nodes[call].op).collect();
                            }
                            cursor = self.nodes[HEAD].next;
                            continue;
                        }
                    }
                    cursor = node.next;
                }
                Kind::Return => match calls.pop() {
                    // A return with its call still pending and nothing to undo
                    None => return Verdict::Illegal,
                    Some((call, ret, previous)) => {
                        state = previous;
                        linearized.clear(self.nodes[call].op);
                        self.unlift(call, ret);
                        cursor = self.nodes[call].next;
                    }
                },
            }
        }

        Verdict::Legal
    }

    fn counterexample(&self) -> Counterexample<M::State, M::Input, M::Output> {
        let mut states = Vec::with_capacity(self.longest.len() + 1);
        let mut state = self.model.init();
        states.push(state.clone());
        let mut done = BitSet::new(self.operations.len());
        for &i in &self.longest {
            let op = &self.operations[i];
            state = self.model.step(&state, &op.input, &op.output).1;
            states.push(state.clone());
            done.set(i);
        }

        // Anything called before the earliest outstanding return could have
        // gone next.
        let pending: Vec<usize> = (0..self.operations.len()).filter(|&i| !done.contains(i)).collect();
        let horizon = pending.iter().map(|&i| self.operations[i].ret).min();
        let stuck = match horizon {
            Some(horizon) => pending
                .into_iter()
                .filter(|&i| self.operations[i].call <= horizon)
                .collect(),
            None => Vec::new(),
        };

        Counterexample {
            operations: self.operations.to_vec(),
            linearized: self.longest.clone(),
            states,
            stuck,
        }
    }
}
