//! Tombstone CTC denominator computation.
//!
//! Pipeline for one minibatch:
//!
//! 1. [`TransitionModel::compute_weights`] (once per model)
//! 2. [`CtcHmm::new`] (once per model)
//! 3. [`compute_denominators`] from the exponentiated network output
//! 4. [`DenominatorComputation::forward`] then [`DenominatorComputation::backward`]
//!
//! [`compute_objective`] runs steps 3 and 4 and maps the gradients back to the
//! raw network output.
//!
//! # Examples
//!
//! ```rust
//! use ndarray::Array2;
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//! use tombstone_ctc::ctc::{
//!     compute_denominators, generate_transition_model, CtcHmm, DenominatorComputation,
//!     DenseMatrix, GeneratorConfig,
//! };
//!
//! let mut rng = ChaCha8Rng::seed_from_u64(0);
//! let model = generate_transition_model(&mut rng, &GeneratorConfig::default()).unwrap();
//! let weights = model.compute_weights();
//! let hmm = CtcHmm::new(&model).unwrap();
//!
//! // two sequences of five frames, every raw score zero
//! let mut exp_nnet_output = Array2::<f64>::zeros((10, model.num_output_indexes()));
//! exp_nnet_output.apply_exp();
//! let denominators = compute_denominators(&exp_nnet_output, &weights).unwrap();
//!
//! let mut computation =
//!     DenominatorComputation::new(&model, &weights, &hmm, &exp_nnet_output, &denominators, 2)
//!         .unwrap();
//! let logprob = computation.forward().unwrap();
//! assert!((logprob / 10.0 - (2.0f64 / 3.0).ln()).abs() < 1e-9);
//!
//! let mut nnet_output_deriv = Array2::<f64>::allocate(10, model.num_output_indexes());
//! let mut denominators_deriv = Array2::<f64>::allocate(10, model.num_history_states());
//! computation
//!     .backward(&mut nnet_output_deriv, &mut denominators_deriv)
//!     .unwrap();
//! ```

pub mod denominator;
pub mod forward_backward;
pub mod generate;
pub mod hmm;
pub mod matrix;
pub mod training;
pub mod transition_model;

#[cfg(test)]
mod test_util;

pub use denominator::compute_denominators;
pub use forward_backward::DenominatorComputation;
pub use generate::{generate_transition_model, random_nnet_output, GeneratorConfig};
pub use hmm::{CtcHmm, HmmState, HmmTransition};
pub use matrix::{DenseMatrix, MatrixTranspose};
pub use training::{compute_objective, DenominatorObjective, TrainingOptions};
pub use transition_model::{
    HistoryState, HistoryStateSpec, PhoneArc, TerminalPolicy, TombstoneArc, TransitionModel,
    WeightMatrix, BLANK_WEIGHT,
};
