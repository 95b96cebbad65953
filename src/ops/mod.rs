//! Stateless tensor operations that dispatch to backend implementations.
//!
//! Every function validates shapes and aliasing on the tensors it is given,
//! then hands flat storage plus cached layouts to the [`Backend`](crate::Backend).

pub mod activation;
pub mod elementwise;

// CPU-specific implementation modules (used by CpuBackend)
pub mod cpu_backward;
pub mod cpu_ops;

pub use activation::{
    relu, relu_gradient, sigmoid, sigmoid_gradient, softmax, softmax_gradient, tanh, tanh_gradient,
};
pub use elementwise::{add, add_conv_bias_gradient, scale_tensor, set_tensor};
