//! Sequential specifications that recorded histories are checked against.

use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;

/// A sequential reference specification.
///
/// `step` is a partial transition function: given the current state, an
/// operation's input and the output the concurrent object actually returned,
/// it says whether that output is legal and what the next state is. For an
/// illegal step the returned state must be the one passed in.
pub trait Model {
    type State: Clone + Eq + Hash + Debug;
    type Input: Clone + Debug;
    type Output: Clone + Debug;

    fn init(&self) -> Self::State;

    fn step(&self, state: &Self::State, input: &Self::Input, output: &Self::Output) -> (bool, Self::State);

    /// Human readable form of one operation, used only in reports.
    fn describe_operation(&self, input: &Self::Input, output: &Self::Output) -> String {
        format!("{:?} -> {:?}", input, output)
    }

    fn describe_state(&self, state: &Self::State) -> String {
        format!("{:?}", state)
    }
}

/// Operations on the single tracked key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MapInput<V> {
    Insert(V),
    Delete,
    Load,
    Store(V),
}

/// What the map returned.
///
/// `found` means different things per operation, following the map's own
/// vocabulary: for `Insert` it is true when the insert *took effect*, for
/// `Delete` and `Load` it is true when a value was there.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MapOutput<V> {
    pub found: bool,
    pub value: Option<V>,
}

impl<V> MapOutput<V> {
    /// `Insert` stored its value.
    pub fn inserted() -> Self {
        Self { found: true, value: None }
    }

    /// `Insert` found `value` already stored and left it alone.
    pub fn existing(value: V) -> Self {
        Self { found: false, value: Some(value) }
    }

    /// `Delete` or `Load` saw `value`.
    pub fn found(value: V) -> Self {
        Self { found: true, value: Some(value) }
    }

    /// `Delete` or `Load` saw nothing.
    pub fn missing() -> Self {
        Self { found: false, value: None }
    }

    /// Output of `Store`, which returns nothing.
    pub fn stored() -> Self {
        Self { found: true, value: None }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MapState<V> {
    Absent,
    Present(V),
}

impl<V> Default for MapState<V> {
    fn default() -> Self {
        MapState::Absent
    }
}

/// The single-key, single-slot map automaton.
///
/// One key is enough to falsify linearizability of a map whose slot-level
/// synchronization is broken, and keeps the state space tiny.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleKeyModel<V> {
    marker: PhantomData<V>,
}

impl<V> SingleKeyModel<V> {
    pub fn new() -> Self {
        Self { marker: PhantomData }
    }
}

impl<V> Model for SingleKeyModel<V>
where
    V: Copy + Eq + Hash + Debug,
{
    type State = MapState<V>;
    type Input = MapInput<V>;
    type Output = MapOutput<V>;

    fn init(&self) -> MapState<V> {
        MapState::Absent
    }

    fn step(&self, state: &MapState<V>, input: &MapInput<V>, output: &MapOutput<V>) -> (bool, MapState<V>) {
        use self::MapState::*;

        match (input, *state) {
            (&MapInput::Insert(_), Present(stored)) => {
                (!output.found && output.value == Some(stored), *state)
            }
            (&MapInput::Insert(value), Absent) => {
                if output.found {
                    (true, Present(value))
                } else {
                    (false, *state)
                }
            }
            (&MapInput::Delete, Present(stored)) => {
                if output.found && output.value == Some(stored) {
                    (true, Absent)
                } else {
                    (false, *state)
                }
            }
            (&MapInput::Delete, Absent) => (!output.found, *state),
            (&MapInput::Load, Present(stored)) => {
                (output.found && output.value == Some(stored), *state)
            }
            (&MapInput::Load, Absent) => (!output.found, *state),
            (&MapInput::Store(value), _) => (true, Present(value)),
        }
    }

    fn describe_operation(&self, input: &MapInput<V>, output: &MapOutput<V>) -> String {
        match (input, output.found, &output.value) {
            (&MapInput::Insert(v), true, _) => format!("insert({:?}) -> inserted", v),
            (&MapInput::Insert(v), false, &Some(ref e)) => format!("insert({:?}) -> exists {:?}", v, e),
            (&MapInput::Insert(v), false, &None) => format!("insert({:?}) -> exists ?", v),
            (&MapInput::Delete, true, &Some(ref e)) => format!("delete() -> {:?}", e),
            (&MapInput::Delete, true, &None) => "delete() -> found ?".to_owned(),
            (&MapInput::Delete, false, _) => "delete() -> not found".to_owned(),
            (&MapInput::Load, true, &Some(ref e)) => format!("load() -> {:?}", e),
            (&MapInput::Load, true, &None) => "load() -> found ?".to_owned(),
            (&MapInput::Load, false, _) => "load() -> not found".to_owned(),
            (&MapInput::Store(v), _, _) => format!("store({:?})", v),
        }
    }

    fn describe_state(&self, state: &MapState<V>) -> String {
        match *state {
            MapState::Absent => "absent".to_owned(),
            MapState::Present(ref v) => format!("present({:?})", v),
        }
    }
}
