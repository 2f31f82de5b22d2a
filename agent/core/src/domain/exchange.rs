// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Exchange State Machines
//!
//! Shared machinery for every exchange aggregate: the ordered, timestamped state history
//! and the monotonic transition guard.
//!
//! The external agent redelivers and reorders events, so an aggregate never trusts the
//! order in which states arrive. A reported state only becomes current when it ranks
//! higher than the current one along the protocol's partial order, or shares its rank and
//! was reported later. A terminal state is never left again.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** State history + transition guard used by partners, credential and proof exchanges

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Debug;

/// A state in one of the exchange protocols.
pub trait ProtocolState: Copy + Eq + Debug {
    /// Position along the protocol's partial order. Parallel branches share a rank.
    fn rank(&self) -> u8;

    /// Terminal states are never left once reached.
    fn is_terminal(&self) -> bool {
        false
    }
}

/// Protocol version of an exchange at the external agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeVersion {
    #[default]
    V1,
    V2,
}

impl std::fmt::Display for ExchangeVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeVersion::V1 => write!(f, "v1"),
            ExchangeVersion::V2 => write!(f, "v2"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange<S> {
    pub state: S,
    pub at: DateTime<Utc>,
}

/// Outcome of reporting a state to an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<S> {
    /// The current state changed.
    Advanced { from: S, to: S },
    /// The history changed but the current state did not (late or lower-ranked report).
    Recorded,
    /// Exact redelivery of a state already in the history.
    Duplicate,
    /// The aggregate is in a terminal state; the report was discarded.
    Blocked { terminal: S },
}

impl<S> Transition<S> {
    pub fn is_advanced(&self) -> bool {
        matches!(self, Transition::Advanced { .. })
    }
}

/// One entry per state, holding the latest timestamp that state was reported with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateHistory<S> {
    entries: Vec<StateChange<S>>,
}

impl<S> Default for StateHistory<S> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<S: ProtocolState> StateHistory<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(state: S, at: DateTime<Utc>) -> Self {
        Self {
            entries: vec![StateChange { state, at }],
        }
    }

    /// Idempotent per (state, timestamp). Returns whether the history changed.
    pub fn push(&mut self, state: S, at: DateTime<Utc>) -> bool {
        match self.entries.iter_mut().find(|c| c.state == state) {
            Some(existing) if existing.at >= at => false,
            Some(existing) => {
                existing.at = at;
                true
            }
            None => {
                self.entries.push(StateChange { state, at });
                true
            }
        }
    }

    /// Entry with the newest timestamp; equal timestamps resolve by rank.
    pub fn latest(&self) -> Option<S> {
        self.entries
            .iter()
            .max_by(|a, b| a.at.cmp(&b.at).then(a.state.rank().cmp(&b.state.rank())))
            .map(|c| c.state)
    }

    pub fn contains(&self, state: S) -> bool {
        self.entries.iter().any(|c| c.state == state)
    }

    pub fn reached_at(&self, state: S) -> Option<DateTime<Utc>> {
        self.entries.iter().find(|c| c.state == state).map(|c| c.at)
    }

    pub fn entries(&self) -> &[StateChange<S>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record `reported` against an aggregate whose current state is `*current`,
    /// moving `*current` only along the protocol order.
    pub fn apply(&mut self, current: &mut S, reported: S, at: DateTime<Utc>) -> Transition<S> {
        if current.is_terminal() {
            return Transition::Blocked { terminal: *current };
        }
        // Same-rank states are parallel branches; only a newer report switches between them.
        let current_since = self.reached_at(*current);
        let changed = self.push(reported, at);
        let moves = reported != *current
            && (reported.is_terminal()
                || match reported.rank().cmp(&current.rank()) {
                    Ordering::Greater => true,
                    Ordering::Equal => current_since.map_or(true, |since| at > since),
                    Ordering::Less => false,
                });
        if moves {
            let from = *current;
            *current = reported;
            return Transition::Advanced { from, to: reported };
        }
        if changed {
            Transition::Recorded
        } else {
            Transition::Duplicate
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        Start,
        Middle,
        Other,
        End,
        Failed,
    }

    impl ProtocolState for Step {
        fn rank(&self) -> u8 {
            match self {
                Step::Start => 0,
                Step::Middle | Step::Other => 1,
                Step::End => 2,
                Step::Failed => 9,
            }
        }

        fn is_terminal(&self) -> bool {
            matches!(self, Step::Failed)
        }
    }

    #[test]
    fn test_push_is_idempotent_per_state_and_timestamp() {
        let now = Utc::now();
        let mut history = StateHistory::starting_at(Step::Start, now);

        assert!(!history.push(Step::Start, now));
        assert!(!history.push(Step::Start, now - Duration::seconds(5)));
        assert!(history.push(Step::Start, now + Duration::seconds(5)));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_latest_prefers_newest_timestamp() {
        let now = Utc::now();
        let mut history = StateHistory::new();
        history.push(Step::Middle, now);
        history.push(Step::Start, now - Duration::seconds(1));

        assert_eq!(history.latest(), Some(Step::Middle));
    }

    #[test]
    fn test_apply_ignores_lower_ranked_report() {
        let now = Utc::now();
        let mut history = StateHistory::starting_at(Step::Middle, now);
        let mut current = Step::Middle;

        let outcome = history.apply(&mut current, Step::Start, now + Duration::seconds(1));

        assert_eq!(outcome, Transition::Recorded);
        assert_eq!(current, Step::Middle);
        assert!(history.contains(Step::Start));
    }

    #[test]
    fn test_apply_blocks_after_terminal() {
        let now = Utc::now();
        let mut history = StateHistory::starting_at(Step::Start, now);
        let mut current = Step::Start;

        assert!(history.apply(&mut current, Step::Failed, now).is_advanced());
        let outcome = history.apply(&mut current, Step::End, now + Duration::seconds(10));

        assert_eq!(outcome, Transition::Blocked { terminal: Step::Failed });
        assert_eq!(current, Step::Failed);
        assert!(!history.contains(Step::End));
    }

    #[test]
    fn test_apply_same_rank_needs_newer_report() {
        let now = Utc::now();
        let mut history = StateHistory::starting_at(Step::Middle, now);
        let mut current = Step::Middle;

        let stale = history.apply(&mut current, Step::Other, now - Duration::seconds(30));
        assert_eq!(stale, Transition::Recorded);
        assert_eq!(current, Step::Middle);

        let fresh = history.apply(&mut current, Step::Other, now + Duration::seconds(30));
        assert!(fresh.is_advanced());
        assert_eq!(current, Step::Other);

        // The old `Middle` report arriving again does not switch back.
        assert_eq!(history.apply(&mut current, Step::Middle, now), Transition::Duplicate);
        assert_eq!(current, Step::Other);
    }

    #[test]
    fn test_apply_redelivery_is_duplicate() {
        let now = Utc::now();
        let mut history = StateHistory::starting_at(Step::Start, now);
        let mut current = Step::Start;

        assert!(history.apply(&mut current, Step::End, now).is_advanced());
        assert_eq!(history.apply(&mut current, Step::End, now), Transition::Duplicate);
    }
}
