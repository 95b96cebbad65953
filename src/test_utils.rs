//! Helpers for verifying gradients and comparing tensors in tests.

use crate::{Backend, Error, Tensor};

/// `sum(a[i] * b[i])` over two tensors of equal size, computed on the host in f64.
pub fn dot<B: Backend>(a: &Tensor<B>, b: &Tensor<B>) -> Result<f32, Error> {
    let (a, b) = (a.host()?, b.host()?);
    if a.len() != b.len() {
        return Err(Error::ShapeMismatch {
            expected: vec![a.len()],
            actual: vec![b.len()],
        });
    }
    Ok(a.iter().zip(b.iter()).map(|(&x, &y)| x as f64 * y as f64).sum::<f64>() as f32)
}

/// Central-difference gradient of a scalar `objective` with respect to every element of `input`.
///
/// `input` is perturbed in place and restored before returning, so other
/// handles to it see the original values afterwards.
pub fn numerical_gradient<B, F>(objective: F, input: &Tensor<B>, epsilon: f32) -> Result<Vec<f32>, Error>
where
    B: Backend,
    F: Fn(&Tensor<B>) -> Result<f32, Error>,
{
    let original = input.host()?;
    let mut perturbed = original.clone();
    let mut gradient = Vec::with_capacity(original.len());

    for i in 0..original.len() {
        perturbed[i] = original[i] + epsilon;
        input.set_host(&perturbed)?;
        let plus = objective(input)?;

        perturbed[i] = original[i] - epsilon;
        input.set_host(&perturbed)?;
        let minus = objective(input)?;

        perturbed[i] = original[i];
        gradient.push((plus - minus) / (2.0 * epsilon));
    }
    input.set_host(&original)?;
    Ok(gradient)
}

/// Compares an analytical gradient against the numerical gradient of `objective` at `input`.
///
/// An element passes when `|analytical - numerical| <= tolerance * max(1, |analytical|, |numerical|)`.
///
/// # Errors
/// [`Error::GradientCheckError`] for the worst failing element.
pub fn check_gradient<B, F>(
    objective: F,
    input: &Tensor<B>,
    analytical: &[f32],
    epsilon: f32,
    tolerance: f32,
) -> Result<(), Error>
where
    B: Backend,
    F: Fn(&Tensor<B>) -> Result<f32, Error>,
{
    let numerical = numerical_gradient(objective, input, epsilon)?;
    compare_gradients(analytical, &numerical, tolerance)
}

fn compare_gradients(analytical: &[f32], numerical: &[f32], tolerance: f32) -> Result<(), Error> {
    if analytical.len() != numerical.len() {
        return Err(Error::InternalLogicError(format!(
            "Gradient size mismatch: analytical size={}, numerical size={}",
            analytical.len(),
            numerical.len()
        )));
    }

    let mut worst: Option<(usize, f32)> = None;
    for (i, (&a, &n)) in analytical.iter().zip(numerical.iter()).enumerate() {
        let abs_err = (a - n).abs();
        let scaled = abs_err / 1.0f32.max(a.abs()).max(n.abs());
        if scaled > tolerance && worst.map_or(true, |(_, w)| scaled > w) {
            worst = Some((i, scaled));
        }
    }

    match worst {
        None => Ok(()),
        Some((i, _)) => Err(Error::GradientCheckError {
            analytical: analytical[i],
            numerical: numerical[i],
            abs_error: (analytical[i] - numerical[i]).abs(),
            at_index: i,
        }),
    }
}

/// Panics unless `tensor` holds `expected` element by element within `tol`.
pub fn assert_tensor_close<B: Backend>(tensor: &Tensor<B>, expected: &[f32], tol: f32) {
    let actual = tensor.host().unwrap();
    assert_eq!(actual.len(), expected.len(), "Tensor lengths don't match");
    for (i, (a_val, b_val)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!(
            (a_val - b_val).abs() <= tol,
            "Values at index {i} aren't close enough: a={a_val}, b={b_val}, diff={}, tol={tol}",
            (a_val - b_val).abs()
        );
    }
}

/// Panics unless two tensors have the same shape and elements within `tol`.
pub fn assert_tensors_close<B: Backend>(a: &Tensor<B>, b: &Tensor<B>, tol: f32) {
    assert_eq!(a.shape(), b.shape(), "Tensor shapes don't match");
    assert_tensor_close(a, &b.host().unwrap(), tol);
}
