//! Small hand-built models shared by the unit tests.

use crate::ctc::transition_model::{HistoryStateSpec, PhoneArc, TombstoneArc, TransitionModel};

/// Phone probabilities of [`bigram_model`], one row per history state.
pub const BIGRAM_PROBS: [[f64; 2]; 3] = [[0.5, 0.5], [0.9, 0.1], [0.3, 0.7]];

/// Two phones with bigram history: state 0 is the start, state `p` remembers
/// that phone `p` came last. Every state is its own context group, so state
/// `h` owns output indexes `3h` (blank), `3h + 1` and `3h + 2`.
pub fn bigram_specs() -> Vec<HistoryStateSpec> {
    (0..3)
        .map(|h| HistoryStateSpec {
            tombstone: Some(TombstoneArc {
                next_state: h,
                blank_output: 3 * h,
            }),
            phone_arcs: (1..=2)
                .map(|p| PhoneArc {
                    next_state: p,
                    output_index: 3 * h + p,
                    prob: BIGRAM_PROBS[h][p - 1],
                })
                .collect(),
        })
        .collect()
}

pub fn bigram_model() -> TransitionModel {
    TransitionModel::new(2, 9, bigram_specs(), 0).unwrap()
}
