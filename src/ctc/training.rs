//! Denominator objective for sequence training.
//!
//! Wraps the whole pipeline for one minibatch: exponentiate the raw network
//! output, build denominators, run forward-backward, then push the two partial
//! gradients back to the raw output. The objective is the negated, scaled
//! denominator log-likelihood, so it can be added directly to a numerator
//! term.

use log::debug;
use ndarray::Array2;

use crate::ctc::denominator::compute_denominators;
use crate::ctc::forward_backward::DenominatorComputation;
use crate::ctc::hmm::CtcHmm;
use crate::ctc::matrix::{DenseMatrix, MatrixTranspose};
use crate::ctc::transition_model::{TransitionModel, WeightMatrix};
use crate::error::{Error, Result};

/// Options for [`compute_objective`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingOptions {
    /// Scale on the denominator term of the objective
    pub denominator_scale: f64,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            denominator_scale: 1.0,
        }
    }
}

impl TrainingOptions {
    pub fn with_denominator_scale(mut self, scale: f64) -> Self {
        self.denominator_scale = scale;
        self
    }
}

/// Objective and raw-output derivative of one minibatch.
#[derive(Debug, Clone)]
pub struct DenominatorObjective<M = Array2<f64>> {
    /// `-denominator_scale * log_likelihood`
    pub objective: f64,
    /// Unscaled denominator log-likelihood summed over sequences
    pub log_likelihood: f64,
    /// Number of frames (rows) in the minibatch
    pub num_frames: usize,
    /// Derivative of `objective` with respect to the raw network output
    pub nnet_output_deriv: M,
}

impl<M> DenominatorObjective<M> {
    pub fn per_frame(&self) -> f64 {
        self.objective / self.num_frames as f64
    }
}

/// Computes the denominator objective of a minibatch and its derivative with
/// respect to the raw (pre-exponential) network output.
///
/// # Arguments
///
/// * `nnet_output` - `[rows x num_output_indexes]` raw network scores, packed
///   as described in [`forward_backward`](crate::ctc::forward_backward)
/// * `num_sequences` - Number of sequences packed into the rows
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for a negative or non-finite scale, and
/// propagates any error from the denominator computation.
pub fn compute_objective<M: DenseMatrix + Clone>(
    model: &TransitionModel,
    weights: &WeightMatrix<M>,
    hmm: &CtcHmm,
    nnet_output: &M,
    num_sequences: usize,
    opts: &TrainingOptions,
) -> Result<DenominatorObjective<M>> {
    if !(opts.denominator_scale.is_finite() && opts.denominator_scale >= 0.0) {
        return Err(Error::InvalidInput(format!(
            "denominator scale must be finite and non-negative, got {}",
            opts.denominator_scale
        )));
    }

    let mut exp_nnet_output = nnet_output.clone();
    exp_nnet_output.apply_exp();
    let denominators = compute_denominators(&exp_nnet_output, weights)?;

    let mut nnet_output_deriv = M::allocate(nnet_output.num_rows(), nnet_output.num_cols());
    let mut denominators_deriv = M::allocate(denominators.num_rows(), denominators.num_cols());
    let log_likelihood = {
        let mut computation = DenominatorComputation::new(
            model,
            weights,
            hmm,
            &exp_nnet_output,
            &denominators,
            num_sequences,
        )?;
        let log_likelihood = computation.forward()?;
        computation.backward(&mut nnet_output_deriv, &mut denominators_deriv)?;
        log_likelihood
    };

    // denominators = exp_nnet_output * weights, so d/dE picks up
    // denominators_deriv * weights^T as well
    nnet_output_deriv.add_mat_mat(
        1.0,
        &denominators_deriv,
        MatrixTranspose::NoTrans,
        weights.as_matrix(),
        MatrixTranspose::Trans,
        1.0,
    )?;
    let scale = -opts.denominator_scale;
    nnet_output_deriv
        .view_mut()
        .zip_mut_with(&exp_nnet_output.view(), |d, &e| *d *= scale * e);

    let num_frames = nnet_output.num_rows();
    let objective = scale * log_likelihood;
    debug!(
        "denominator objective {} over {} frames ({} per frame)",
        objective,
        num_frames,
        objective / num_frames as f64
    );
    Ok(DenominatorObjective {
        objective,
        log_likelihood,
        num_frames,
        nnet_output_deriv,
    })
}
