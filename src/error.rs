#[cfg(feature = "cuda")]
use cust;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Incompatible shapes for operation {op}: {shape_a:?} and {shape_b:?}")]
    IncompatibleShapes {
        op: String,
        shape_a: Vec<usize>,
        shape_b: Vec<usize>,
    },

    #[error("Aliasing violation in {op}: `{first}` and `{second}` refer to the same storage")]
    AliasingViolation {
        op: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("Operator used before setup(): {0}")]
    NotConfigured(String),

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[cfg(feature = "cuda")]
    #[error("CUDA error: {0}")]
    CudaError(String),

    #[cfg(feature = "cuda")]
    #[error("CUDA cuBLAS error: {0}")]
    CublasError(String),

    #[error("Operation cannot be performed on empty tensor")]
    EmptyTensor,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Internal logic error: {0}")]
    InternalLogicError(String),

    #[error("Gradient check error: analytical={analytical}, numerical={numerical}, abs_error={abs_error}, at_index={at_index}")]
    GradientCheckError {
        analytical: f32,
        numerical: f32,
        abs_error: f32,
        at_index: usize,
    },

    #[error("Out of memory: {0}")]
    OutOfMemory(String),
}

#[cfg(feature = "cuda")]
impl From<cust::error::CudaError> for Error {
    fn from(err: cust::error::CudaError) -> Self {
        let message = err.to_string();
        if matches!(err, cust::error::CudaError::OutOfMemory) {
            Error::OutOfMemory(message)
        } else {
            Error::CudaError(message)
        }
    }
}

impl Error {
    pub(crate) fn aliasing(op: &str, first: &'static str, second: &'static str) -> Self {
        Error::AliasingViolation {
            op: op.to_string(),
            first,
            second,
        }
    }
}
