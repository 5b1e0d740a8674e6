//! Transition model for tombstone CTC.
//!
//! The model describes the acoustic state space: a set of history states, each
//! encoding recent phone context, and a set of network output indexes. Every
//! history state owns
//!
//! - one *tombstone* arc, a self-loop labelled with the blank output index of
//!   the state's context group, which lets the state persist across a frame
//!   without emitting a real phone, and
//! - one arc per real phone (`1..=num_phones`), which moves to a successor
//!   history state, consumes one output index and carries a probability.
//!
//! The real-phone probabilities of a state sum to one. The blank output enters
//! the state's normalizer with the fixed weight [`BLANK_WEIGHT`].

use std::collections::HashSet;

use approx::abs_diff_eq;
use log::warn;
use ndarray::Array2;

use crate::ctc::matrix::DenseMatrix;
use crate::error::{Error, Result};

/// Weight the blank output carries in every history state's normalizer.
///
/// The tombstone self-loop has an implicit numerator of one, so a frame on
/// which every exponentiated output equals one leaves each state with
/// `(1 + 1) / (1 + BLANK_WEIGHT) = 2/3` of its mass.
pub const BLANK_WEIGHT: f64 = 2.0;

/// Tolerance on the real-phone probabilities of a state summing to one.
const PROB_SUM_TOLERANCE: f64 = 1e-6;

/// How the forward masses at the last frame collapse into a likelihood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminalPolicy {
    /// Every history state is final; masses are summed.
    #[default]
    AllStates,
    /// Only paths ending in this history state count.
    Accepting(usize),
}

/// Tombstone arc of a history state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TombstoneArc {
    /// Must be the owning state itself.
    pub next_state: usize,
    /// Blank output index of the state's context group.
    pub blank_output: usize,
}

/// Arc taken when a real phone is emitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhoneArc {
    pub next_state: usize,
    pub output_index: usize,
    /// Language-model probability of the phone given this history.
    pub prob: f64,
}

/// Description of one history state.
///
/// `phone_arcs[p - 1]` is the arc for real phone `p`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryStateSpec {
    pub tombstone: Option<TombstoneArc>,
    pub phone_arcs: Vec<PhoneArc>,
}

/// Validated history state.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryState {
    blank_output: usize,
    phone_arcs: Vec<PhoneArc>,
}

impl HistoryState {
    pub fn blank_output(&self) -> usize {
        self.blank_output
    }

    /// Arc for real phone `phone` (`1..=num_phones`).
    pub fn phone_arc(&self, phone: usize) -> Option<&PhoneArc> {
        phone.checked_sub(1).and_then(|i| self.phone_arcs.get(i))
    }

    pub fn phone_arcs(&self) -> &[PhoneArc] {
        &self.phone_arcs
    }
}

/// Immutable tombstone CTC transition model.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionModel {
    num_phones: usize,
    num_output_indexes: usize,
    history_states: Vec<HistoryState>,
    start_state: usize,
    terminal_policy: TerminalPolicy,
    blank_outputs: Vec<bool>,
}

impl TransitionModel {
    /// Builds and validates a transition model.
    ///
    /// # Arguments
    ///
    /// * `num_phones` - Number of real phones; phone 0 is the blank
    /// * `num_output_indexes` - Number of network output units
    /// * `states` - One specification per history state, indexed by history state
    /// * `start_state` - History state every sequence starts in
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidModel`] if a state lacks a tombstone arc or its
    /// tombstone does not loop, if any arc points outside the model, if a blank
    /// output index is also used by a real arc, or if a state's phone
    /// probabilities are negative, non-finite or do not sum to one.
    pub fn new(
        num_phones: usize,
        num_output_indexes: usize,
        states: Vec<HistoryStateSpec>,
        start_state: usize,
    ) -> Result<Self> {
        if num_phones == 0 {
            return Err(Error::InvalidModel("model must have at least one real phone".into()));
        }
        if states.is_empty() {
            return Err(Error::InvalidModel("model must have at least one history state".into()));
        }
        let num_states = states.len();
        if start_state >= num_states {
            return Err(Error::InvalidModel(format!(
                "start state {} out of range ({} history states)",
                start_state, num_states
            )));
        }

        let mut history_states = Vec::with_capacity(num_states);
        let mut blank_outputs = vec![false; num_output_indexes];
        let mut real_outputs = vec![false; num_output_indexes];

        for (h, spec) in states.into_iter().enumerate() {
            let tombstone = spec.tombstone.ok_or_else(|| {
                Error::InvalidModel(format!("history state {} has no tombstone transition", h))
            })?;
            if tombstone.next_state != h {
                return Err(Error::InvalidModel(format!(
                    "tombstone transition of history state {} goes to {}; it must be a self-loop",
                    h, tombstone.next_state
                )));
            }
            if tombstone.blank_output >= num_output_indexes {
                return Err(Error::InvalidModel(format!(
                    "blank output index {} of history state {} out of range",
                    tombstone.blank_output, h
                )));
            }
            blank_outputs[tombstone.blank_output] = true;

            if spec.phone_arcs.len() != num_phones {
                return Err(Error::InvalidModel(format!(
                    "history state {} has {} phone transitions, expected {}",
                    h,
                    spec.phone_arcs.len(),
                    num_phones
                )));
            }

            let mut total = 0.0;
            for (i, arc) in spec.phone_arcs.iter().enumerate() {
                let phone = i + 1;
                if arc.next_state >= num_states {
                    return Err(Error::InvalidModel(format!(
                        "phone {} from history state {} goes to nonexistent state {}",
                        phone, h, arc.next_state
                    )));
                }
                if arc.output_index >= num_output_indexes {
                    return Err(Error::InvalidModel(format!(
                        "phone {} from history state {} uses output index {} out of range",
                        phone, h, arc.output_index
                    )));
                }
                if !arc.prob.is_finite() || arc.prob < 0.0 {
                    return Err(Error::InvalidModel(format!(
                        "phone {} from history state {} has invalid probability {}",
                        phone, h, arc.prob
                    )));
                }
                real_outputs[arc.output_index] = true;
                total += arc.prob;
            }
            if !abs_diff_eq!(total, 1.0, epsilon = PROB_SUM_TOLERANCE) {
                return Err(Error::InvalidModel(format!(
                    "phone probabilities of history state {} sum to {}, expected 1",
                    h, total
                )));
            }

            history_states.push(HistoryState {
                blank_output: tombstone.blank_output,
                phone_arcs: spec.phone_arcs,
            });
        }

        if let Some(o) = (0..num_output_indexes).find(|&o| blank_outputs[o] && real_outputs[o]) {
            return Err(Error::InvalidModel(format!(
                "output index {} is used both as a blank and by a real phone",
                o
            )));
        }
        let unused = (0..num_output_indexes)
            .filter(|&o| !blank_outputs[o] && !real_outputs[o])
            .count();
        if unused > 0 {
            warn!(
                "{} of {} output indexes are not used by any transition",
                unused, num_output_indexes
            );
        }

        Ok(Self {
            num_phones,
            num_output_indexes,
            history_states,
            start_state,
            terminal_policy: TerminalPolicy::default(),
            blank_outputs,
        })
    }

    /// Sets how final masses collapse into the sequence likelihood.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidModel`] if an accepting state is out of range.
    pub fn with_terminal_policy(mut self, policy: TerminalPolicy) -> Result<Self> {
        if let TerminalPolicy::Accepting(h) = policy {
            if h >= self.num_history_states() {
                return Err(Error::InvalidModel(format!(
                    "accepting state {} out of range ({} history states)",
                    h,
                    self.num_history_states()
                )));
            }
        }
        self.terminal_policy = policy;
        Ok(self)
    }

    pub fn num_phones(&self) -> usize {
        self.num_phones
    }

    pub fn num_output_indexes(&self) -> usize {
        self.num_output_indexes
    }

    pub fn num_history_states(&self) -> usize {
        self.history_states.len()
    }

    pub fn start_state(&self) -> usize {
        self.start_state
    }

    pub fn terminal_policy(&self) -> TerminalPolicy {
        self.terminal_policy
    }

    pub fn history_state(&self, h: usize) -> Option<&HistoryState> {
        self.history_states.get(h)
    }

    pub fn history_states(&self) -> &[HistoryState] {
        &self.history_states
    }

    pub fn blank_output(&self, h: usize) -> Option<usize> {
        self.history_state(h).map(HistoryState::blank_output)
    }

    pub fn is_blank_output(&self, o: usize) -> bool {
        self.blank_outputs.get(o).copied().unwrap_or(false)
    }

    /// Number of distinct blank output indexes, i.e. context groups.
    pub fn num_context_groups(&self) -> usize {
        let blanks: HashSet<usize> = self.history_states.iter().map(|s| s.blank_output).collect();
        blanks.len()
    }

    /// Computes the `[num_output_indexes x num_history_states]` weight matrix.
    ///
    /// Column `h` holds, for each output index, the summed probability of the
    /// real phones of `h` that emit it, plus [`BLANK_WEIGHT`] on the blank of `h`.
    /// The result depends on nothing but the model, so repeated calls are
    /// bit-identical.
    pub fn compute_weights<M: DenseMatrix>(&self) -> WeightMatrix<M> {
        let mut matrix = M::allocate(self.num_output_indexes, self.num_history_states());
        {
            let mut w = matrix.view_mut();
            for (h, state) in self.history_states.iter().enumerate() {
                w[[state.blank_output, h]] += BLANK_WEIGHT;
                for arc in &state.phone_arcs {
                    w[[arc.output_index, h]] += arc.prob;
                }
            }
        }
        WeightMatrix { matrix }
    }
}

/// Read-only `[output index x history state]` weights of a [`TransitionModel`].
#[derive(Debug, Clone, PartialEq)]
pub struct WeightMatrix<M = Array2<f64>> {
    matrix: M,
}

impl<M: DenseMatrix> WeightMatrix<M> {
    pub fn as_matrix(&self) -> &M {
        &self.matrix
    }

    pub fn num_output_indexes(&self) -> usize {
        self.matrix.num_rows()
    }

    pub fn num_history_states(&self) -> usize {
        self.matrix.num_cols()
    }
}
