//! Forward/backward pairs for softmax, sigmoid, relu and tanh.
//!
//! Forward functions accept `dest` and `src` as the same tensor. Backward
//! functions compute the gradient of `dot(gradient_input, dest)` with respect
//! to the activation's input and assign it to `grad`; `grad` may be the same
//! tensor as `gradient_input` but never the same as `dest`.

use crate::backend::Backend;
use crate::descriptor::Layout;
use crate::error::Error;
use crate::tensor::{have_same_dimensions, is_same_object, Tensor};

fn shape_check<B: Backend>(expected: &Tensor<B>, actual: &Tensor<B>) -> Result<(), Error> {
    if have_same_dimensions(expected, actual) {
        Ok(())
    } else {
        Err(Error::ShapeMismatch {
            expected: expected.shape().to_vec(),
            actual: actual.shape().to_vec(),
        })
    }
}

/// Brings `src` into `dest` (unless they are the same tensor) and runs `kernel` on it in place.
fn forward_in_place<B, F>(op: &str, dest: &Tensor<B>, src: &Tensor<B>, kernel: F) -> Result<(), Error>
where
    B: Backend,
    F: FnOnce(&mut B::Storage, &Layout) -> Result<(), Error>,
{
    shape_check(src, dest)?;
    if !is_same_object(dest, src) {
        B::copy_from(&mut dest.data_mut(), &src.data())?;
    }
    let layout = dest.layout();
    log::trace!("{} forward on {:?}", op, layout.dims);
    kernel(&mut dest.data_mut(), &layout)
}

/// Brings `gradient_input` into `grad` (unless they are the same tensor) and runs `kernel` on it.
fn backward_in_place<B, F>(
    op: &str,
    grad: &Tensor<B>,
    dest: &Tensor<B>,
    gradient_input: &Tensor<B>,
    kernel: F,
) -> Result<(), Error>
where
    B: Backend,
    F: FnOnce(&mut B::Storage, &B::Storage, &Layout) -> Result<(), Error>,
{
    shape_check(dest, gradient_input)?;
    shape_check(dest, grad)?;
    if is_same_object(grad, dest) {
        return Err(Error::aliasing(op, "grad", "dest"));
    }
    if !is_same_object(grad, gradient_input) {
        B::copy_from(&mut grad.data_mut(), &gradient_input.data())?;
    }
    let layout = dest.layout();
    log::trace!("{} backward on {:?}", op, layout.dims);
    kernel(&mut grad.data_mut(), &dest.data(), &layout)
}

/// Softmax across channels at each (sample, row, column) location.
pub fn softmax<B: Backend>(dest: &Tensor<B>, src: &Tensor<B>) -> Result<(), Error> {
    forward_in_place("softmax", dest, src, B::softmax)
}

pub fn softmax_gradient<B: Backend>(
    grad: &Tensor<B>,
    dest: &Tensor<B>,
    gradient_input: &Tensor<B>,
) -> Result<(), Error> {
    backward_in_place("softmax", grad, dest, gradient_input, B::softmax_backward)
}

/// `dest = 1/(1+exp(-src))`.
pub fn sigmoid<B: Backend>(dest: &Tensor<B>, src: &Tensor<B>) -> Result<(), Error> {
    forward_in_place("sigmoid", dest, src, |x, _| B::sigmoid(x))
}

pub fn sigmoid_gradient<B: Backend>(
    grad: &Tensor<B>,
    dest: &Tensor<B>,
    gradient_input: &Tensor<B>,
) -> Result<(), Error> {
    backward_in_place("sigmoid", grad, dest, gradient_input, |g, d, _| B::sigmoid_backward(g, d))
}

/// `dest = max(0, src)`.
pub fn relu<B: Backend>(dest: &Tensor<B>, src: &Tensor<B>) -> Result<(), Error> {
    forward_in_place("relu", dest, src, |x, _| B::relu(x))
}

/// Passes `gradient_input` through where `dest > 0`, zero elsewhere.
pub fn relu_gradient<B: Backend>(
    grad: &Tensor<B>,
    dest: &Tensor<B>,
    gradient_input: &Tensor<B>,
) -> Result<(), Error> {
    backward_in_place("relu", grad, dest, gradient_input, |g, d, _| B::relu_backward(g, d))
}

pub fn tanh<B: Backend>(dest: &Tensor<B>, src: &Tensor<B>) -> Result<(), Error> {
    forward_in_place("tanh", dest, src, |x, _| B::tanh(x))
}

pub fn tanh_gradient<B: Backend>(
    grad: &Tensor<B>,
    dest: &Tensor<B>,
    gradient_input: &Tensor<B>,
) -> Result<(), Error> {
    backward_in_place("tanh", grad, dest, gradient_input, |g, d, _| B::tanh_backward(g, d))
}
