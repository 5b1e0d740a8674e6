pub mod ctc;
pub mod error;

pub use ctc::{
    compute_denominators, compute_objective, CtcHmm, DenominatorComputation, DenseMatrix,
    TransitionModel,
};
pub use error::{Error, Result};
