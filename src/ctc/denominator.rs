//! Per-frame, per-history-state normalizers.

use crate::ctc::matrix::{DenseMatrix, MatrixTranspose};
use crate::ctc::transition_model::WeightMatrix;
use crate::error::{Error, Result};

/// Computes the denominators, one row per frame and one column per history
/// state.
///
/// `weights` is stored `[num_output_indexes x num_history_states]`, so the
/// product is `exp_nnet_output * weights` with no transpose.
///
/// # Errors
///
/// Returns [`Error::DimensionMismatch`] if the output matrix does not have one
/// column per output index of `weights`.
pub fn compute_denominators<M: DenseMatrix>(
    exp_nnet_output: &M,
    weights: &WeightMatrix<M>,
) -> Result<M> {
    if exp_nnet_output.num_cols() != weights.num_output_indexes() {
        return Err(Error::DimensionMismatch(format!(
            "network output has {} columns but the model has {} output indexes",
            exp_nnet_output.num_cols(),
            weights.num_output_indexes()
        )));
    }
    let mut denominators = M::allocate(exp_nnet_output.num_rows(), weights.num_history_states());
    denominators.add_mat_mat(
        1.0,
        exp_nnet_output,
        MatrixTranspose::NoTrans,
        weights.as_matrix(),
        MatrixTranspose::NoTrans,
        0.0,
    )?;
    Ok(denominators)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctc::test_util::{bigram_model, BIGRAM_PROBS};
    use crate::ctc::transition_model::BLANK_WEIGHT;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_denominators_of_unit_output() {
        let model = bigram_model();
        let weights = model.compute_weights();
        let exp_nnet_output = Array2::<f64>::ones((4, 9));
        let d = compute_denominators(&exp_nnet_output, &weights).unwrap();
        assert_eq!(d.dim(), (4, 3));
        for x in d.iter() {
            assert_relative_eq!(*x, 1.0 + BLANK_WEIGHT, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_denominators_pick_up_weighted_outputs() {
        let model = bigram_model();
        let weights = model.compute_weights();
        let exp_nnet_output =
            Array2::from_shape_fn((2, 9), |(r, o)| 1.0 + r as f64 + 0.1 * o as f64);
        let d = compute_denominators(&exp_nnet_output, &weights).unwrap();
        for r in 0..2 {
            for h in 0..3 {
                let e = |o: usize| exp_nnet_output[[r, o]];
                let expected = BLANK_WEIGHT * e(3 * h)
                    + BIGRAM_PROBS[h][0] * e(3 * h + 1)
                    + BIGRAM_PROBS[h][1] * e(3 * h + 2);
                assert_relative_eq!(d[[r, h]], expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_column_mismatch() {
        let model = bigram_model();
        let weights = model.compute_weights();
        let exp_nnet_output = Array2::<f64>::ones((4, 8));
        let err = compute_denominators(&exp_nnet_output, &weights).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch(_)));
    }
}
