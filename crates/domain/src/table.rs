//! Transition tables.

use std::collections::{BTreeMap, HashSet};

use common::AggregateType;
use serde::Serialize;

use crate::lifecycle::Lifecycle;

/// The fixed state machine of one aggregate type.
///
/// Built from `(from, kind, to)` triples. A status with no outgoing triple
/// accepts no transition; the listed terminal statuses must be such statuses.
#[derive(Debug)]
pub struct TransitionTable<S: 'static, K: 'static> {
    initial: S,
    terminal: &'static [S],
    transitions: &'static [(S, K, S)],
}

impl<S: Lifecycle, K: Lifecycle> TransitionTable<S, K> {
    pub const fn new(initial: S, terminal: &'static [S], transitions: &'static [(S, K, S)]) -> Self {
        Self {
            initial,
            terminal,
            transitions,
        }
    }

    /// The status every new aggregate starts in.
    pub fn initial(&self) -> S {
        self.initial
    }

    pub fn terminal(&self) -> &'static [S] {
        self.terminal
    }

    pub fn is_terminal(&self, status: S) -> bool {
        self.terminal.contains(&status)
    }

    /// Returns the status reached by applying `kind` in `from`.
    pub fn next(&self, from: S, kind: K) -> Option<S> {
        self.transitions
            .iter()
            .find(|(f, k, _)| *f == from && *k == kind)
            .map(|(_, _, to)| *to)
    }

    /// Kinds accepted in `from`, in table order.
    pub fn allowed_kinds(&self, from: S) -> Vec<K> {
        self.transitions
            .iter()
            .filter(|(f, _, _)| *f == from)
            .map(|(_, k, _)| *k)
            .collect()
    }

    /// The kind leading directly from `from` to `to`, if any.
    pub fn kind_between(&self, from: S, to: S) -> Option<K> {
        self.transitions
            .iter()
            .find(|(f, _, t)| *f == from && *t == to)
            .map(|(_, k, _)| *k)
    }

    /// Statuses reachable from the initial status, the initial included.
    pub fn reachable(&self) -> HashSet<S> {
        let mut seen = HashSet::from([self.initial]);
        let mut frontier = vec![self.initial];
        while let Some(status) = frontier.pop() {
            for (_, _, to) in self.transitions.iter().filter(|(f, _, _)| *f == status) {
                if seen.insert(*to) {
                    frontier.push(*to);
                }
            }
        }
        seen
    }

    /// Returns the table in its string form.
    pub fn describe(&self, aggregate_type: AggregateType) -> TableDescription {
        let mut transitions: BTreeMap<&'static str, BTreeMap<&'static str, &'static str>> =
            BTreeMap::new();
        for (from, kind, to) in self.transitions {
            transitions
                .entry(from.as_str())
                .or_default()
                .insert(kind.as_str(), to.as_str());
        }

        TableDescription {
            aggregate_type,
            initial: self.initial.as_str(),
            terminal: self.terminal.iter().map(|s| s.as_str()).collect(),
            transitions,
        }
    }
}

/// String-keyed view of a transition table:
/// `{current_status: {kind: next_status}}` plus the terminal set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDescription {
    pub aggregate_type: AggregateType,
    pub initial: &'static str,
    pub terminal: Vec<&'static str>,
    pub transitions: BTreeMap<&'static str, BTreeMap<&'static str, &'static str>>,
}

impl TableDescription {
    /// Returns the next status for `(from, kind)`.
    pub fn next(&self, from: &str, kind: &str) -> Option<&'static str> {
        self.transitions.get(from)?.get(kind).copied()
    }

    pub fn is_terminal(&self, status: &str) -> bool {
        self.terminal.contains(&status)
    }
}
