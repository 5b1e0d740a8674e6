//! Batched forward-backward over the tombstone CTC graph.
//!
//! # Algorithm
//!
//! For frame row `r` and history state `h`, leaving `h` costs a factor of
//! `1 / D(r, h)`: the tombstone self-loop has numerator one, and a real
//! transition with weight `w` and output `o` has numerator `w * E(r, o)`. The
//! forward pass starts every sequence in the model's start state and pushes mass
//! along every transition once per frame. The backward pass runs the same
//! factors in reverse. Their product gives per-transition posteriors, which
//! turn into the gradient of the total log-likelihood with respect to the
//! exponentiated network output `E` and the denominators `D`, each treated
//! as an independent input.
//!
//! To survive long sequences, every forward row is rescaled to sum to one
//! and the log of the scale is accumulated. The backward pass divides by the
//! same scales, so both tables stay in a comfortable floating-point range.
//!
//! # Packing
//!
//! Sequences are interleaved by time: row `t * num_sequences + s` is frame `t`
//! of sequence `s`. The same layout applies to `E`, `D` and both gradients.
//!
//! Sequences are independent and are processed in parallel with rayon; the
//! public calls block until the whole batch is done.

use log::{debug, trace};
use ndarray::{s, Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;

use crate::ctc::hmm::CtcHmm;
use crate::ctc::matrix::DenseMatrix;
use crate::ctc::transition_model::{TerminalPolicy, TransitionModel, WeightMatrix};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Constructed,
    ForwardDone,
    BackwardDone,
    Failed,
}

/// Forward results for one sequence.
#[derive(Debug, Clone)]
struct SequenceTables {
    /// `(num_time_steps + 1) x num_states`, every row sums to one.
    alpha: Array2<f64>,
    /// `scales[t]` is the forward mass after frame `t`, before rescaling.
    scales: Vec<f64>,
    /// Rescaled forward mass accepted at the last frame.
    terminal_mass: f64,
    log_likelihood: f64,
    /// Same shape as `alpha`; filled by the backward pass.
    beta: Option<Array2<f64>>,
}

struct SequenceGradients {
    beta: Array2<f64>,
    nnet_output_deriv: Array2<f64>,
    denominators_deriv: Array2<f64>,
}

/// Denominator log-likelihood and its gradients for one minibatch.
///
/// Create one per minibatch, call [`forward`](Self::forward) once, then
/// [`backward`](Self::backward) once. The model objects are only borrowed and
/// may be shared by any number of computations at the same time.
#[derive(Debug)]
pub struct DenominatorComputation<'a> {
    hmm: &'a CtcHmm,
    exp_nnet_output: ArrayView2<'a, f64>,
    denominators: ArrayView2<'a, f64>,
    num_sequences: usize,
    num_time_steps: usize,
    stage: Stage,
    sequences: Vec<SequenceTables>,
    log_likelihood: Option<f64>,
}

impl<'a> DenominatorComputation<'a> {
    /// Sets up a computation over a packed minibatch.
    ///
    /// # Arguments
    ///
    /// * `model` - Transition model the weights and HMM were built from
    /// * `weights` - Output of [`TransitionModel::compute_weights`]
    /// * `hmm` - Graph built from `model`
    /// * `exp_nnet_output` - `[rows x num_output_indexes]`, exponentiated network output
    /// * `denominators` - `[rows x num_history_states]`, `exp_nnet_output * weights`
    /// * `num_sequences` - Number of sequences packed into the rows
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if `num_sequences` is zero or does
    /// not divide the row count, or if any matrix shape disagrees with the model.
    /// Returns [`Error::InvalidModel`] if `hmm` was built with a different start
    /// state or terminal policy than `model` now carries.
    pub fn new<M: DenseMatrix>(
        model: &TransitionModel,
        weights: &WeightMatrix<M>,
        hmm: &'a CtcHmm,
        exp_nnet_output: &'a M,
        denominators: &'a M,
        num_sequences: usize,
    ) -> Result<Self> {
        let num_outputs = model.num_output_indexes();
        let num_states = model.num_history_states();
        if hmm.num_states() != num_states || hmm.num_output_indexes() != num_outputs {
            return Err(Error::DimensionMismatch(format!(
                "HMM has {} states and {} outputs, model has {} and {}",
                hmm.num_states(),
                hmm.num_output_indexes(),
                num_states,
                num_outputs
            )));
        }
        if hmm.start_state() != model.start_state()
            || hmm.terminal_policy() != model.terminal_policy()
        {
            return Err(Error::InvalidModel(format!(
                "HMM starts in {} with {:?}, model starts in {} with {:?}; rebuild the HMM",
                hmm.start_state(),
                hmm.terminal_policy(),
                model.start_state(),
                model.terminal_policy()
            )));
        }
        if weights.num_output_indexes() != num_outputs || weights.num_history_states() != num_states
        {
            return Err(Error::DimensionMismatch(format!(
                "weight matrix is {}x{}, expected {}x{}",
                weights.num_output_indexes(),
                weights.num_history_states(),
                num_outputs,
                num_states
            )));
        }
        let rows = exp_nnet_output.num_rows();
        if num_sequences == 0 {
            return Err(Error::DimensionMismatch("num_sequences must be positive".into()));
        }
        if rows == 0 || rows % num_sequences != 0 {
            return Err(Error::DimensionMismatch(format!(
                "{} rows cannot be split into {} sequences of equal positive length",
                rows, num_sequences
            )));
        }
        if exp_nnet_output.num_cols() != num_outputs {
            return Err(Error::DimensionMismatch(format!(
                "network output has {} columns, model has {} output indexes",
                exp_nnet_output.num_cols(),
                num_outputs
            )));
        }
        if denominators.num_rows() != rows || denominators.num_cols() != num_states {
            return Err(Error::DimensionMismatch(format!(
                "denominators are {}x{}, expected {}x{}",
                denominators.num_rows(),
                denominators.num_cols(),
                rows,
                num_states
            )));
        }

        Ok(Self {
            hmm,
            exp_nnet_output: exp_nnet_output.view(),
            denominators: denominators.view(),
            num_sequences,
            num_time_steps: rows / num_sequences,
            stage: Stage::Constructed,
            sequences: Vec::new(),
            log_likelihood: None,
        })
    }

    pub fn num_sequences(&self) -> usize {
        self.num_sequences
    }

    pub fn num_time_steps(&self) -> usize {
        self.num_time_steps
    }

    /// Total log-likelihood, once [`forward`](Self::forward) has succeeded.
    pub fn log_likelihood(&self) -> Option<f64> {
        self.log_likelihood
    }

    pub fn sequence_log_likelihood(&self, seq: usize) -> Option<f64> {
        self.sequences.get(seq).map(|t| t.log_likelihood)
    }

    /// Rescaled forward table of sequence `seq`; row `t` is the state
    /// distribution after `t` frames.
    pub fn alpha(&self, seq: usize) -> Option<ArrayView2<'_, f64>> {
        self.sequences.get(seq).map(|t| t.alpha.view())
    }

    /// Rescaled backward table of sequence `seq`, available after
    /// [`backward`](Self::backward).
    pub fn beta(&self, seq: usize) -> Option<ArrayView2<'_, f64>> {
        self.sequences
            .get(seq)
            .and_then(|t| t.beta.as_ref())
            .map(|b| b.view())
    }

    fn row_index(&self, t: usize, seq: usize) -> usize {
        t * self.num_sequences + seq
    }

    /// Runs the forward pass and returns the log-likelihood summed over sequences.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CallOrder`] if called a second time, and
    /// [`Error::Numerical`] if an output or denominator entry is not finite and
    /// positive, if forward mass degenerates, or if no path reaches the
    /// accepting state.
    pub fn forward(&mut self) -> Result<f64> {
        if self.stage != Stage::Constructed {
            return Err(Error::CallOrder(
                "forward may only be called once per computation".into(),
            ));
        }
        self.stage = Stage::Failed;
        self.check_inputs()?;

        let sequences = (0..self.num_sequences)
            .into_par_iter()
            .map(|seq| self.forward_sequence(seq))
            .collect::<Result<Vec<_>>>()?;
        let total: f64 = sequences.iter().map(|t| t.log_likelihood).sum();
        debug!(
            "denominator forward: log-likelihood {} over {} sequences x {} frames ({} per frame)",
            total,
            self.num_sequences,
            self.num_time_steps,
            total / (self.num_sequences * self.num_time_steps) as f64
        );

        self.sequences = sequences;
        self.log_likelihood = Some(total);
        self.stage = Stage::ForwardDone;
        Ok(total)
    }

    fn check_inputs(&self) -> Result<()> {
        if let Some(((r, o), x)) = self
            .exp_nnet_output
            .indexed_iter()
            .find(|&(_, &x)| !(x.is_finite() && x > 0.0))
        {
            return Err(Error::Numerical(format!(
                "exponentiated output at row {}, index {} is {}",
                r, o, x
            )));
        }
        if let Some(((r, h), x)) = self
            .denominators
            .indexed_iter()
            .find(|&(_, &x)| !(x.is_finite() && x > 0.0))
        {
            return Err(Error::Numerical(format!(
                "denominator at row {}, history state {} is {}",
                r, h, x
            )));
        }
        Ok(())
    }

    fn forward_sequence(&self, seq: usize) -> Result<SequenceTables> {
        let num_frames = self.num_time_steps;
        let mut alpha = Array2::<f64>::zeros((num_frames + 1, self.hmm.num_states()));
        alpha[[0, self.hmm.start_state()]] = 1.0;
        let mut scales = Vec::with_capacity(num_frames);
        let mut log_likelihood = 0.0;

        for t in 0..num_frames {
            let r = self.row_index(t, seq);
            let e = self.exp_nnet_output.row(r);
            let d = self.denominators.row(r);
            let (prev, mut next) = alpha.multi_slice_mut((s![t, ..], s![t + 1, ..]));
            for (h, state) in self.hmm.states().iter().enumerate() {
                if prev[h] == 0.0 {
                    continue;
                }
                let a = prev[h] / d[h];
                next[h] += a;
                for tr in state.real_transitions() {
                    next[tr.next_state] += a * tr.weight * e[tr.output_index];
                }
            }

            let total = next.sum();
            if !(total.is_finite() && total > 0.0) {
                return Err(Error::Numerical(format!(
                    "forward mass {} after frame {} of sequence {}",
                    total, t, seq
                )));
            }
            next.mapv_inplace(|x| x / total);
            check_mass(next.view(), "alpha", t + 1, seq)?;
            scales.push(total);
            log_likelihood += total.ln();
        }

        let terminal_mass = match self.hmm.terminal_policy() {
            TerminalPolicy::AllStates => alpha.row(num_frames).sum(),
            TerminalPolicy::Accepting(h) => alpha[[num_frames, h]],
        };
        if terminal_mass <= 0.0 {
            return Err(Error::Numerical(format!(
                "sequence {} has no path of {} frames into an accepting state",
                seq, num_frames
            )));
        }
        log_likelihood += terminal_mass.ln();
        trace!("sequence {}: log-likelihood {}", seq, log_likelihood);

        Ok(SequenceTables {
            alpha,
            scales,
            terminal_mass,
            log_likelihood,
            beta: None,
        })
    }

    /// Runs the backward pass and writes the gradients of the total
    /// log-likelihood.
    ///
    /// `nnet_output_deriv` receives `d logprob / d exp_nnet_output` and
    /// `denominators_deriv` receives `d logprob / d denominators`; both are
    /// overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CallOrder`] unless this is the first call after a
    /// successful [`forward`](Self::forward), [`Error::DimensionMismatch`] if
    /// an output buffer has the wrong shape, and [`Error::Numerical`] if a
    /// backward mass degenerates.
    pub fn backward<M: DenseMatrix>(
        &mut self,
        nnet_output_deriv: &mut M,
        denominators_deriv: &mut M,
    ) -> Result<()> {
        match self.stage {
            Stage::ForwardDone => {}
            Stage::Constructed => {
                return Err(Error::CallOrder("backward called before forward".into()))
            }
            Stage::BackwardDone => {
                return Err(Error::CallOrder(
                    "backward may only be called once per computation".into(),
                ))
            }
            Stage::Failed => {
                return Err(Error::CallOrder(
                    "an earlier call on this computation failed".into(),
                ))
            }
        }
        let shape = |m: &M| (m.num_rows(), m.num_cols());
        if shape(&*nnet_output_deriv) != self.exp_nnet_output.dim() {
            return Err(Error::DimensionMismatch(format!(
                "network output derivative is {:?}, expected {:?}",
                shape(&*nnet_output_deriv),
                self.exp_nnet_output.dim()
            )));
        }
        if shape(&*denominators_deriv) != self.denominators.dim() {
            return Err(Error::DimensionMismatch(format!(
                "denominator derivative is {:?}, expected {:?}",
                shape(&*denominators_deriv),
                self.denominators.dim()
            )));
        }
        self.stage = Stage::Failed;

        let gradients = self
            .sequences
            .par_iter()
            .enumerate()
            .map(|(seq, tables)| self.backward_sequence(seq, tables))
            .collect::<Result<Vec<_>>>()?;

        let num_sequences = self.num_sequences;
        let mut nnet_out = nnet_output_deriv.view_mut();
        let mut den_out = denominators_deriv.view_mut();
        for (seq, (tables, grads)) in self.sequences.iter_mut().zip(gradients).enumerate() {
            for t in 0..grads.nnet_output_deriv.nrows() {
                let r = t * num_sequences + seq;
                nnet_out.row_mut(r).assign(&grads.nnet_output_deriv.row(t));
                den_out.row_mut(r).assign(&grads.denominators_deriv.row(t));
            }
            tables.beta = Some(grads.beta);
        }

        self.stage = Stage::BackwardDone;
        Ok(())
    }

    fn backward_sequence(&self, seq: usize, tables: &SequenceTables) -> Result<SequenceGradients> {
        let num_frames = self.num_time_steps;
        let num_states = self.hmm.num_states();
        let mut beta = Array2::<f64>::zeros((num_frames + 1, num_states));
        match self.hmm.terminal_policy() {
            TerminalPolicy::AllStates => beta.row_mut(num_frames).fill(1.0),
            TerminalPolicy::Accepting(h) => beta[[num_frames, h]] = 1.0,
        }
        let mut nnet_output_deriv = Array2::<f64>::zeros((num_frames, self.hmm.num_output_indexes()));
        let mut denominators_deriv = Array2::<f64>::zeros((num_frames, num_states));

        for t in (0..num_frames).rev() {
            let r = self.row_index(t, seq);
            let e = self.exp_nnet_output.row(r);
            let d = self.denominators.row(r);
            let alpha = tables.alpha.row(t);
            let scale = tables.scales[t];
            // posteriors are alpha * factor * beta / (scale * terminal mass)
            let norm = scale * tables.terminal_mass;
            let (mut cur, next) = beta.multi_slice_mut((s![t, ..], s![t + 1, ..]));
            let mut nnet_row = nnet_output_deriv.row_mut(t);

            for (h, state) in self.hmm.states().iter().enumerate() {
                let inv_d = 1.0 / d[h];
                let a = alpha[h] * inv_d / norm;
                let mut acc = next[h];
                for tr in state.real_transitions() {
                    let b = next[tr.next_state];
                    acc += tr.weight * e[tr.output_index] * b;
                    nnet_row[tr.output_index] += a * tr.weight * b;
                }
                cur[h] = acc * inv_d / scale;
                denominators_deriv[[t, h]] = -a * acc * inv_d;
            }
            check_mass(cur.view(), "beta", t, seq)?;
        }

        Ok(SequenceGradients {
            beta,
            nnet_output_deriv,
            denominators_deriv,
        })
    }
}

fn check_mass(row: ArrayView1<'_, f64>, table: &str, t: usize, seq: usize) -> Result<()> {
    match row.iter().position(|&x| !(x.is_finite() && x >= 0.0)) {
        Some(h) => Err(Error::Numerical(format!(
            "{}[{}][{}] of sequence {} is {}",
            table, t, h, seq, row[h]
        ))),
        None => Ok(()),
    }
}
