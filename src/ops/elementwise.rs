//! Broadcasting arithmetic between tensors and the convolution bias gradient.

use crate::backend::Backend;
use crate::error::Error;
use crate::tensor::{is_same_object, Tensor};

/// `dest = beta*dest + alpha*src`.
///
/// Each dimension of `src` must equal the matching dimension of `dest` or be 1;
/// size-1 dimensions are broadcast. With `beta == 0` the previous contents of
/// `dest` are ignored, so NaNs already in `dest` do not propagate.
///
/// # Errors
/// * [`Error::AliasingViolation`] if `dest` and `src` share storage.
/// * [`Error::IncompatibleShapes`] if a dimension is neither equal nor 1.
pub fn add<B: Backend>(beta: f32, dest: &Tensor<B>, alpha: f32, src: &Tensor<B>) -> Result<(), Error> {
    if is_same_object(dest, src) {
        return Err(Error::aliasing("add", "dest", "src"));
    }
    let (dest_layout, src_layout) = (dest.layout(), src.layout());
    let compatible = dest_layout
        .dims
        .iter()
        .zip(src_layout.dims.iter())
        .all(|(&d, &s)| d == s || s == 1);
    if !compatible {
        return Err(Error::IncompatibleShapes {
            op: "add".to_string(),
            shape_a: dest_layout.to_vec(),
            shape_b: src_layout.to_vec(),
        });
    }

    log::trace!(
        "add beta={} dest{:?} alpha={} src{:?}",
        beta,
        dest_layout.dims,
        alpha,
        src_layout.dims
    );
    B::add_scaled(beta, &mut dest.data_mut(), &dest_layout, alpha, &src.data(), &src_layout)
}

/// Sets every element of `t` to `value`.
pub fn set_tensor<B: Backend>(t: &Tensor<B>, value: f32) -> Result<(), Error> {
    B::fill(&mut t.data_mut(), value)
}

/// Multiplies every element of `t` by `value`, in place.
pub fn scale_tensor<B: Backend>(t: &Tensor<B>, value: f32) -> Result<(), Error> {
    B::scale(&mut t.data_mut(), value)
}

/// Adds the per-channel sum of `gradient_input` into the bias gradient `grad`.
///
/// `grad` must be shaped `(1, K, 1, 1)` where `K == gradient_input.k()`; it
/// receives `sum over (n, r, c) of gradient_input[n, k, r, c]` for each `k`.
pub fn add_conv_bias_gradient<B: Backend>(grad: &Tensor<B>, gradient_input: &Tensor<B>) -> Result<(), Error> {
    if is_same_object(grad, gradient_input) {
        return Err(Error::aliasing("add_conv_bias_gradient", "grad", "gradient_input"));
    }
    if gradient_input.is_empty() {
        return Err(Error::EmptyTensor);
    }
    let [n, k, nr, nc] = grad.shape();
    if n != 1 || nr != 1 || nc != 1 || k != gradient_input.k() {
        return Err(Error::ShapeMismatch {
            expected: vec![1, gradient_input.k(), 1, 1],
            actual: vec![n, k, nr, nc],
        });
    }

    let layout = gradient_input.layout();
    log::trace!("add_conv_bias_gradient over {:?}", layout.dims);
    B::add_channel_sums(&mut grad.data_mut(), &gradient_input.data(), &layout)
}
