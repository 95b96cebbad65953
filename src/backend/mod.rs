//! Backend trait definition and module structure.

use crate::algorithm::{ConvAlgorithm, ConvGeometry};
use crate::descriptor::Layout;
use crate::error::Error;
use crate::pooling::PoolGeometry;
use std::fmt::Debug;

pub mod cpu;
#[cfg(feature = "cuda")]
pub mod cuda;

pub type CpuTensor = crate::tensor::Tensor<cpu::CpuBackend>;
#[cfg(feature = "cuda")]
pub type CudaTensor = crate::tensor::Tensor<cuda::CudaBackend>;

/// The compute primitives every device provides.
///
/// All storage is flat, row-major `f32` in `(n, k, nr, nc)` order; shapes travel
/// separately as [`Layout`]s taken from the tensors' descriptors. Callers (the
/// `ops`, `conv` and `pooling` modules) validate shapes and aliasing before
/// dispatching here, so implementations may assume well-formed arguments.
/// Every method is synchronous: results are visible when it returns.
pub trait Backend: Sized + Debug + Clone + 'static {
    type Storage: Debug;
    /// Scratch memory owned by a single convolution operator.
    type Workspace: Debug;

    // --- Storage ---

    /// Returns the device of the storage.
    fn device(storage: &Self::Storage) -> crate::Device;
    /// Creates new storage of `len` elements filled with zeros.
    fn zeros(len: usize) -> Result<Self::Storage, Error>;
    /// Creates new storage from a flat host vector.
    fn from_vec(data: Vec<f32>) -> Result<Self::Storage, Error>;
    /// Number of elements in the storage.
    fn len(storage: &Self::Storage) -> usize;
    /// Copies data from device storage to a host vector.
    fn copy_to_host(storage: &Self::Storage) -> Result<Vec<f32>, Error>;
    /// Overwrites device storage from a host slice of the same length.
    fn update_from_host(storage: &mut Self::Storage, data: &[f32]) -> Result<(), Error>;
    /// Device-to-device copy between storages of the same length.
    fn copy_from(dest: &mut Self::Storage, src: &Self::Storage) -> Result<(), Error>;

    /// Allocates a workspace of `elements` floats.
    fn alloc_workspace(elements: usize) -> Result<Self::Workspace, Error>;
    /// Size of a workspace, in floats.
    fn workspace_len(workspace: &Self::Workspace) -> usize;

    // --- Elementwise ---

    /// `dest = beta*dest + alpha*src`, broadcasting size-1 dimensions of `src`.
    fn add_scaled(
        beta: f32,
        dest: &mut Self::Storage,
        dest_layout: &Layout,
        alpha: f32,
        src: &Self::Storage,
        src_layout: &Layout,
    ) -> Result<(), Error>;
    fn fill(storage: &mut Self::Storage, value: f32) -> Result<(), Error>;
    fn scale(storage: &mut Self::Storage, value: f32) -> Result<(), Error>;
    /// `grad[k] += sum over (n, r, c) of gradient_input[n, k, r, c]`.
    fn add_channel_sums(
        grad: &mut Self::Storage,
        gradient_input: &Self::Storage,
        gradient_layout: &Layout,
    ) -> Result<(), Error>;

    // --- Convolution ---

    /// Rejects geometries this device cannot execute. Called from `setup`.
    fn check_conv_support(_geometry: &ConvGeometry) -> Result<(), Error> {
        Ok(())
    }

    /// Writes the cross-correlation of `filters` over `data` into `output`.
    fn conv_forward(
        algo: ConvAlgorithm,
        workspace: Option<&mut Self::Workspace>,
        geometry: &ConvGeometry,
        output: &mut Self::Storage,
        data: &Self::Storage,
        filters: &Self::Storage,
    ) -> Result<(), Error>;

    /// Adds the data gradient into `data_gradient`.
    fn conv_backward_data(
        algo: ConvAlgorithm,
        workspace: Option<&mut Self::Workspace>,
        geometry: &ConvGeometry,
        data_gradient: &mut Self::Storage,
        gradient_input: &Self::Storage,
        filters: &Self::Storage,
    ) -> Result<(), Error>;

    /// Assigns the filter gradient to `filters_gradient`.
    fn conv_backward_filter(
        algo: ConvAlgorithm,
        workspace: Option<&mut Self::Workspace>,
        geometry: &ConvGeometry,
        filters_gradient: &mut Self::Storage,
        gradient_input: &Self::Storage,
        data: &Self::Storage,
    ) -> Result<(), Error>;

    // --- Pooling ---

    fn max_pool_forward(
        geometry: &PoolGeometry,
        dest: &mut Self::Storage,
        src: &Self::Storage,
    ) -> Result<(), Error>;

    /// Adds `gradient_input` into `grad` at each window's maximum.
    fn max_pool_backward(
        geometry: &PoolGeometry,
        grad: &mut Self::Storage,
        gradient_input: &Self::Storage,
        dest: &Self::Storage,
        src: &Self::Storage,
    ) -> Result<(), Error>;

    // --- Activations (in place) ---
    //
    // Forward functions transform `x` in place. Backward functions receive the
    // incoming gradient in `grad` and overwrite it with the gradient with
    // respect to the activation's input.

    fn softmax(x: &mut Self::Storage, layout: &Layout) -> Result<(), Error>;
    fn softmax_backward(grad: &mut Self::Storage, dest: &Self::Storage, layout: &Layout) -> Result<(), Error>;
    fn sigmoid(x: &mut Self::Storage) -> Result<(), Error>;
    fn sigmoid_backward(grad: &mut Self::Storage, dest: &Self::Storage) -> Result<(), Error>;
    fn relu(x: &mut Self::Storage) -> Result<(), Error>;
    fn relu_backward(grad: &mut Self::Storage, dest: &Self::Storage) -> Result<(), Error>;
    fn tanh(x: &mut Self::Storage) -> Result<(), Error>;
    fn tanh_backward(grad: &mut Self::Storage, dest: &Self::Storage) -> Result<(), Error>;
}
