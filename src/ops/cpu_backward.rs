//! CPU gradient kernels used by `CpuBackend`.

use crate::algorithm::ConvGeometry;
use crate::array::{matrix_view, matrix_view_mut};
use crate::error::Error;
use crate::ops::cpu_ops::im2col;
use crate::pooling::PoolGeometry;
use ndarray::linalg::general_mat_mul;
use ndarray::{ArrayD, ArrayView4, ArrayViewMut4, Axis, Zip};
use rayon::prelude::*;

/// Scatters a column matrix of sample `s` back onto `data_gradient`, adding to it.
pub fn col2im_accumulate(geometry: &ConvGeometry, cols: &[f32], s: usize, data_gradient: &mut [f32]) {
    let (d, w, o) = (&geometry.data, &geometry.filters, &geometry.output);
    let taps_per_channel = w.nr() * w.nc();
    let ncols = geometry.column_cols();
    let sample = &mut data_gradient[s * d.strides[0]..(s + 1) * d.strides[0]];

    // Each channel plane only receives rows of its own taps.
    sample.par_chunks_mut(d.plane_size()).enumerate().for_each(|(ch, plane)| {
        for tap in 0..taps_per_channel {
            let (fr, fc) = (tap / w.nc(), tap % w.nc());
            let row = &cols[(ch * taps_per_channel + tap) * ncols..][..ncols];
            for r in 0..o.nr() {
                let Some(y) = geometry.input_row(r, fr) else {
                    continue;
                };
                for c in 0..o.nc() {
                    if let Some(x) = geometry.input_col(c, fc) {
                        plane[y * d.nc() + x] += row[r * o.nc() + c];
                    }
                }
            }
        }
    });
}

/// Output coordinate that reads input coordinate `i` through filter tap `t`, if any.
#[inline]
fn output_coord(i: usize, pad: usize, t: usize, stride: usize, limit: usize) -> Option<usize> {
    let shifted = (i + pad).checked_sub(t)?;
    if shifted % stride != 0 {
        return None;
    }
    Some(shifted / stride).filter(|&o| o < limit)
}

pub fn conv_backward_data_direct(
    geometry: &ConvGeometry,
    data_gradient: &mut [f32],
    gradient_input: &[f32],
    filters: &[f32],
) {
    let (d, w, o) = (&geometry.data, &geometry.filters, &geometry.output);
    let (sy, sx) = geometry.stride;
    let (py, px) = geometry.padding;
    data_gradient
        .par_chunks_mut(d.plane_size())
        .enumerate()
        .for_each(|(p, plane)| {
            let (s, ch) = (p / d.k(), p % d.k());
            for y in 0..d.nr() {
                for x in 0..d.nc() {
                    let mut acc = 0.0;
                    for f in 0..w.num_samples() {
                        for fr in 0..w.nr() {
                            let Some(r) = output_coord(y, py, fr, sy, o.nr()) else {
                                continue;
                            };
                            for fc in 0..w.nc() {
                                if let Some(c) = output_coord(x, px, fc, sx, o.nc()) {
                                    acc += filters[w.offset(f, ch, fr, fc)] * gradient_input[o.offset(s, f, r, c)];
                                }
                            }
                        }
                    }
                    plane[y * d.nc() + x] += acc;
                }
            }
        });
}

/// Data gradient as `col2im(filters^T @ gradient_input(sample))`.
pub fn conv_backward_data_gemm(
    geometry: &ConvGeometry,
    workspace: &mut [f32],
    data_gradient: &mut [f32],
    gradient_input: &[f32],
    filters: &[f32],
) -> Result<(), Error> {
    let (rows, cols) = (geometry.column_rows(), geometry.column_cols());
    let out_k = geometry.output.k();
    let weights = matrix_view(filters, out_k, rows)?;
    let sample_len = geometry.output.strides[0];

    for s in 0..geometry.data.num_samples() {
        let grad_out = matrix_view(&gradient_input[s * sample_len..(s + 1) * sample_len], out_k, cols)?;
        {
            let mut column = matrix_view_mut(&mut workspace[..rows * cols], rows, cols)?;
            general_mat_mul(1.0, &weights.t(), &grad_out, 0.0, &mut column);
        }
        col2im_accumulate(geometry, &workspace[..rows * cols], s, data_gradient);
    }
    Ok(())
}

pub fn conv_backward_filter_direct(
    geometry: &ConvGeometry,
    filters_gradient: &mut [f32],
    gradient_input: &[f32],
    data: &[f32],
) {
    let (d, w, o) = (&geometry.data, &geometry.filters, &geometry.output);
    filters_gradient.par_iter_mut().enumerate().for_each(|(idx, g)| {
        let f = idx / w.strides[0];
        let ch = (idx / w.strides[1]) % w.k();
        let fr = (idx / w.strides[2]) % w.nr();
        let fc = idx % w.nc();
        let mut acc = 0.0;
        for s in 0..d.num_samples() {
            for r in 0..o.nr() {
                let Some(y) = geometry.input_row(r, fr) else {
                    continue;
                };
                for c in 0..o.nc() {
                    if let Some(x) = geometry.input_col(c, fc) {
                        acc += gradient_input[o.offset(s, f, r, c)] * data[d.offset(s, ch, y, x)];
                    }
                }
            }
        }
        *g = acc;
    });
}

/// Filter gradient as the sum over samples of `gradient_input(sample) @ im2col(sample)^T`.
pub fn conv_backward_filter_gemm(
    geometry: &ConvGeometry,
    workspace: &mut [f32],
    filters_gradient: &mut [f32],
    gradient_input: &[f32],
    data: &[f32],
) -> Result<(), Error> {
    let (rows, cols) = (geometry.column_rows(), geometry.column_cols());
    let out_k = geometry.output.k();
    let sample_len = geometry.output.strides[0];

    filters_gradient.fill(0.0);
    let mut grad_w = matrix_view_mut(filters_gradient, out_k, rows)?;
    for s in 0..geometry.data.num_samples() {
        im2col(geometry, data, s, &mut workspace[..rows * cols]);
        let column = matrix_view(&workspace[..rows * cols], rows, cols)?;
        let grad_out = matrix_view(&gradient_input[s * sample_len..(s + 1) * sample_len], out_k, cols)?;
        general_mat_mul(1.0, &grad_out, &column.t(), 1.0, &mut grad_w);
    }
    Ok(())
}

/// Routes each gradient to the first position of its window holding the pooled value,
/// or to the window's argmax position when nothing compares equal (NaN windows).
pub fn max_pool_backward(
    geometry: &PoolGeometry,
    grad: &mut [f32],
    gradient_input: &[f32],
    dest: &[f32],
    src: &[f32],
) {
    let (src_plane, dest_plane) = (geometry.src.plane_size(), geometry.dest.plane_size());
    let dest_nc = geometry.dest.nc();
    if src_plane == 0 || dest_plane == 0 {
        return;
    }
    grad.par_chunks_mut(src_plane).enumerate().for_each(|(p, grad_plane)| {
        let plane = &src[p * src_plane..(p + 1) * src_plane];
        for r in 0..geometry.dest.nr() {
            for c in 0..dest_nc {
                let out = p * dest_plane + r * dest_nc + c;
                grad_plane[geometry.gradient_target(plane, r, c, dest[out])] += gradient_input[out];
            }
        }
    });
}

fn check_same_len(grad: &ArrayD<f32>, dest: &ArrayD<f32>) -> Result<(), Error> {
    if grad.len() != dest.len() {
        return Err(Error::ShapeMismatch {
            expected: vec![dest.len()],
            actual: vec![grad.len()],
        });
    }
    Ok(())
}

/// `grad = dest * (grad - sum_c dest*grad)` at each (sample, row, column).
pub fn softmax_backward(mut grad: ArrayViewMut4<'_, f32>, dest: ArrayView4<'_, f32>) {
    Zip::from(grad.lanes_mut(Axis(1)))
        .and(dest.lanes(Axis(1)))
        .par_for_each(|mut g, d| {
            let dot = g.dot(&d);
            Zip::from(&mut g).and(&d).for_each(|g, &d| *g = d * (*g - dot));
        });
}

pub fn sigmoid_backward(grad: &mut ArrayD<f32>, dest: &ArrayD<f32>) -> Result<(), Error> {
    check_same_len(grad, dest)?;
    Zip::from(grad).and(dest).par_for_each(|g, &d| *g *= d * (1.0 - d));
    Ok(())
}

pub fn relu_backward(grad: &mut ArrayD<f32>, dest: &ArrayD<f32>) -> Result<(), Error> {
    check_same_len(grad, dest)?;
    Zip::from(grad).and(dest).par_for_each(|g, &d| {
        if d <= 0.0 {
            *g = 0.0;
        }
    });
    Ok(())
}

pub fn tanh_backward(grad: &mut ArrayD<f32>, dest: &ArrayD<f32>) -> Result<(), Error> {
    check_same_len(grad, dest)?;
    Zip::from(grad).and(dest).par_for_each(|g, &d| *g *= 1.0 - d * d);
    Ok(())
}
