//! Hardware-accelerated tensor primitives for neural-network training.
//!
//! This library provides the compute core a layer framework builds on:
//! - rank-4 tensors with cached shape descriptors
//! - broadcasting elementwise arithmetic and the convolution bias gradient
//! - a stateful convolution operator with algorithm and workspace caching
//! - a stateful max-pooling operator
//! - softmax, sigmoid, relu and tanh with their gradients
//!
//! Every forward operation has a gradient counterpart defined as the gradient
//! of `dot(gradient_input, output)`. Some gradients add into their destination
//! (bias, convolution data, pooling) and the rest overwrite it.
//!
//! # Features
//! - `cuda` - Enables the CUDA GPU backend (requires CUDA toolkit)
//! - `cpu_openblas` - Uses OpenBLAS for CPU matrix products
//!
//! # Example
//! ```rust
//! use rust_dnn_lib::{ops, CpuBackend, Tensor, TensorConv};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let data = Tensor::<CpuBackend>::random_uniform([1, 2, 5, 5], -1.0, 1.0)?;
//!     let filters = Tensor::<CpuBackend>::random_uniform([3, 2, 3, 3], -1.0, 1.0)?;
//!     let output = Tensor::<CpuBackend>::zeros([0, 0, 0, 0])?;
//!
//!     let mut conv = TensorConv::new();
//!     conv.setup(&data, &filters, 1, 1)?;
//!     conv.forward(&output, &data, &filters)?;
//!     ops::relu(&output, &output)?;
//!
//!     // Backpropagate a gradient of ones.
//!     let gradient_input = Tensor::<CpuBackend>::zeros(output.shape())?;
//!     ops::set_tensor(&gradient_input, 1.0)?;
//!     let after_relu = Tensor::<CpuBackend>::zeros(output.shape())?;
//!     ops::relu_gradient(&after_relu, &output, &gradient_input)?;
//!
//!     let data_gradient = Tensor::<CpuBackend>::zeros(data.shape())?;
//!     conv.get_gradient_for_data(&after_relu, &filters, &data_gradient)?;
//!     Ok(())
//! }
//! ```

#[cfg(feature = "cpu_openblas")]
extern crate openblas_src;

pub mod algorithm;
pub mod array;
pub mod backend;
pub mod config;
pub mod conv;
pub mod descriptor;
pub mod error;
pub mod ops;
pub mod pooling;
pub mod tensor;

pub mod test_utils;

/// Represents the device where a tensor's data resides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    /// CPU device
    Cpu,
    /// CUDA GPU device with a specific device ID
    #[cfg(feature = "cuda")]
    Cuda(u32),
}

pub use algorithm::{ConvAlgorithm, ConvPass};
pub use array::Array;
pub use backend::cpu::CpuBackend;
#[cfg(feature = "cuda")]
pub use backend::cuda::CudaBackend;
pub use backend::Backend;
pub use backend::CpuTensor;
#[cfg(feature = "cuda")]
pub use backend::CudaTensor;
pub use config::{AlgoPreference, EngineConfig};
pub use conv::TensorConv;
pub use descriptor::{Layout, TensorDescriptor};
pub use error::Error;
pub use pooling::MaxPool;
pub use tensor::{have_same_dimensions, is_same_object, Tensor};
