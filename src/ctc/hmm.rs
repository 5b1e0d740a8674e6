//! Read-only HMM graph derived from a [`TransitionModel`].
//!
//! The forward-backward engine walks this graph once per frame, so it is laid
//! out for that: each history state stores its tombstone self-transition and a
//! flat list of real transitions sorted by output index. The structure is built
//! once per model and shared by reference across every minibatch.

use std::collections::VecDeque;

use log::debug;

use crate::ctc::transition_model::{TerminalPolicy, TransitionModel};
use crate::error::{Error, Result};

/// A transition out of a history state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HmmTransition {
    pub next_state: usize,
    pub output_index: usize,
    /// Scale applied to the output's exponentiated score. Tombstones carry 1.0
    /// and never read their output column.
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HmmState {
    tombstone: HmmTransition,
    real: Vec<HmmTransition>,
}

impl HmmState {
    /// Self-loop taken when the frame emits no real phone.
    pub fn tombstone(&self) -> &HmmTransition {
        &self.tombstone
    }

    /// Real transitions, sorted by output index.
    pub fn real_transitions(&self) -> &[HmmTransition] {
        &self.real
    }
}

/// Transition graph over history states.
#[derive(Debug, Clone, PartialEq)]
pub struct CtcHmm {
    num_output_indexes: usize,
    start_state: usize,
    terminal_policy: TerminalPolicy,
    states: Vec<HmmState>,
}

impl CtcHmm {
    /// Builds the graph for `model`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidModel`] if a state cannot be reached from the
    /// start state or, under [`TerminalPolicy::Accepting`], if a state cannot
    /// reach the accepting state.
    pub fn new(model: &TransitionModel) -> Result<Self> {
        let mut states = Vec::with_capacity(model.num_history_states());
        for (h, hs) in model.history_states().iter().enumerate() {
            let mut real: Vec<HmmTransition> = hs
                .phone_arcs()
                .iter()
                .map(|arc| HmmTransition {
                    next_state: arc.next_state,
                    output_index: arc.output_index,
                    weight: arc.prob,
                })
                .collect();
            real.sort_by_key(|t| (t.output_index, t.next_state));
            states.push(HmmState {
                tombstone: HmmTransition {
                    next_state: h,
                    output_index: hs.blank_output(),
                    weight: 1.0,
                },
                real,
            });
        }

        let hmm = Self {
            num_output_indexes: model.num_output_indexes(),
            start_state: model.start_state(),
            terminal_policy: model.terminal_policy(),
            states,
        };
        hmm.check_connected()?;
        debug!(
            "built tombstone HMM with {} history states, {} real transitions and {} context groups",
            hmm.num_states(),
            hmm.num_real_transitions(),
            model.num_context_groups()
        );
        Ok(hmm)
    }

    fn check_connected(&self) -> Result<()> {
        let n = self.num_states();
        let reached = self.search(self.start_state, |h, out| {
            out.extend(self.states[h].real.iter().map(|t| t.next_state));
        });
        if let Some(h) = (0..n).find(|&h| !reached[h]) {
            return Err(Error::InvalidModel(format!(
                "history state {} is unreachable from start state {}",
                h, self.start_state
            )));
        }

        if let TerminalPolicy::Accepting(final_state) = self.terminal_policy {
            let mut predecessors = vec![Vec::new(); n];
            for (h, state) in self.states.iter().enumerate() {
                for t in &state.real {
                    predecessors[t.next_state].push(h);
                }
            }
            let co_reached = self.search(final_state, |h, out| {
                out.extend(predecessors[h].iter().copied());
            });
            if let Some(h) = (0..n).find(|&h| !co_reached[h]) {
                return Err(Error::InvalidModel(format!(
                    "history state {} is a dead end: accepting state {} is unreachable from it",
                    h, final_state
                )));
            }
        }
        Ok(())
    }

    /// Breadth-first search from `root`; `neighbours` pushes the successors of a state.
    fn search<F>(&self, root: usize, neighbours: F) -> Vec<bool>
    where
        F: Fn(usize, &mut Vec<usize>),
    {
        let mut seen = vec![false; self.num_states()];
        let mut queue = VecDeque::from([root]);
        let mut next = Vec::new();
        seen[root] = true;
        while let Some(h) = queue.pop_front() {
            next.clear();
            neighbours(h, &mut next);
            for &g in &next {
                if !seen[g] {
                    seen[g] = true;
                    queue.push_back(g);
                }
            }
        }
        seen
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn num_output_indexes(&self) -> usize {
        self.num_output_indexes
    }

    pub fn num_real_transitions(&self) -> usize {
        self.states.iter().map(|s| s.real.len()).sum()
    }

    pub fn start_state(&self) -> usize {
        self.start_state
    }

    pub fn terminal_policy(&self) -> TerminalPolicy {
        self.terminal_policy
    }

    pub fn state(&self, h: usize) -> Option<&HmmState> {
        self.states.get(h)
    }

    pub fn states(&self) -> &[HmmState] {
        &self.states
    }
}
