//! Random transition models and network outputs for tests and benchmarks.
//!
//! Models are phone n-gram histories: a history state remembers the last
//! `left_context` phones (padded with a sentence-start marker), and emitting
//! phone `p` shifts `p` into the history. History states are tied at random
//! into context groups; each group owns one blank output index and one output
//! index per phone.
//!
//! All randomness comes from the generator passed in, so a seeded
//! `rand_chacha::ChaCha8Rng` reproduces the same model every time.

use std::collections::{HashMap, VecDeque};

use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::ctc::matrix::DenseMatrix;
use crate::ctc::transition_model::{HistoryStateSpec, PhoneArc, TombstoneArc, TransitionModel};
use crate::error::{Error, Result};

/// Sentence-start padding in a phone history.
const SENTENCE_START: usize = 0;

/// Bounds for [`generate_transition_model`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Smallest number of real phones
    pub min_phones: usize,
    /// Largest number of real phones
    pub max_phones: usize,
    /// Largest number of phones a history state remembers
    pub max_left_context: usize,
    /// Largest number of context groups (distinct blanks)
    pub max_context_groups: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            min_phones: 2,
            max_phones: 6,
            max_left_context: 2,
            max_context_groups: 4,
        }
    }
}

/// Generates a random, valid transition model.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the configuration asks for no phones, no
/// context groups, or has `min_phones > max_phones`.
pub fn generate_transition_model<R: Rng>(
    rng: &mut R,
    config: &GeneratorConfig,
) -> Result<TransitionModel> {
    if config.min_phones == 0 || config.min_phones > config.max_phones {
        return Err(Error::InvalidInput(format!(
            "phone range {}..={} is empty or contains zero",
            config.min_phones, config.max_phones
        )));
    }
    if config.max_context_groups == 0 {
        return Err(Error::InvalidInput(
            "at least one context group is required".into(),
        ));
    }

    let num_phones = rng.gen_range(config.min_phones..=config.max_phones);
    let left_context = rng.gen_range(0..=config.max_left_context);

    // Enumerate the histories reachable from the all-start history.
    let start = vec![SENTENCE_START; left_context];
    let mut index: HashMap<Vec<usize>, usize> = HashMap::from([(start.clone(), 0)]);
    let mut successors: Vec<Vec<usize>> = Vec::new();
    let mut queue = VecDeque::from([start]);
    while let Some(history) = queue.pop_front() {
        let mut next_states = Vec::with_capacity(num_phones);
        for phone in 1..=num_phones {
            let mut next = history.clone();
            if !next.is_empty() {
                next.remove(0);
                next.push(phone);
            }
            let h = match index.get(&next) {
                Some(&h) => h,
                None => {
                    let h = index.len();
                    index.insert(next.clone(), h);
                    queue.push_back(next);
                    h
                }
            };
            next_states.push(h);
        }
        successors.push(next_states);
    }
    let num_states = index.len();

    let num_groups = rng.gen_range(1..=config.max_context_groups.min(num_states));
    let mut groups: Vec<usize> = (0..num_states).map(|h| h % num_groups).collect();
    groups.shuffle(rng);
    let outputs_per_group = num_phones + 1;

    let specs = successors
        .into_iter()
        .enumerate()
        .map(|(h, next_states)| {
            let base = groups[h] * outputs_per_group;
            let raw: Vec<f64> = (0..num_phones).map(|_| rng.gen_range(0.1..1.0)).collect();
            let total: f64 = raw.iter().sum();
            HistoryStateSpec {
                tombstone: Some(TombstoneArc {
                    next_state: h,
                    blank_output: base,
                }),
                phone_arcs: next_states
                    .into_iter()
                    .zip(raw)
                    .enumerate()
                    .map(|(i, (next_state, p))| PhoneArc {
                        next_state,
                        output_index: base + i + 1,
                        prob: p / total,
                    })
                    .collect(),
            }
        })
        .collect();

    debug!(
        "generated model: {} phones, left context {}, {} history states, {} context groups",
        num_phones, left_context, num_states, num_groups
    );
    TransitionModel::new(num_phones, num_groups * outputs_per_group, specs, 0)
}

/// Raw network output with independent standard-normal entries.
pub fn random_nnet_output<M: DenseMatrix, R: Rng>(rng: &mut R, rows: usize, cols: usize) -> M {
    let mut m = M::allocate(rows, cols);
    m.fill_randn(rng);
    m
}
