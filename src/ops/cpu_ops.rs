//! CPU forward kernels used by `CpuBackend`.

use crate::algorithm::ConvGeometry;
use crate::array::{matrix_view, matrix_view_mut};
use crate::error::Error;
use crate::pooling::PoolGeometry;
use ndarray::linalg::general_mat_mul;
use ndarray::{ArrayD, ArrayView4, ArrayViewMut4, Axis, Zip};
use rayon::prelude::*;

/// `dest = beta*dest + alpha*src` with size-1 dimensions of `src` broadcast.
pub fn add_scaled(beta: f32, dest: ArrayViewMut4<'_, f32>, alpha: f32, src: ArrayView4<'_, f32>) -> Result<(), Error> {
    let src = src.broadcast(dest.raw_dim()).ok_or_else(|| Error::IncompatibleShapes {
        op: "add".to_string(),
        shape_a: dest.shape().to_vec(),
        shape_b: src.shape().to_vec(),
    })?;
    if beta == 0.0 {
        Zip::from(dest).and(&src).par_for_each(|d, &s| *d = alpha * s);
    } else {
        Zip::from(dest).and(&src).par_for_each(|d, &s| *d = beta * *d + alpha * s);
    }
    Ok(())
}

/// `grad[k] += sum of gradient_input over samples, rows and columns of channel k`.
pub fn add_channel_sums(grad: &mut ArrayD<f32>, gradient_input: ArrayView4<'_, f32>) -> Result<(), Error> {
    let sums = gradient_input
        .sum_axis(Axis(3))
        .sum_axis(Axis(2))
        .sum_axis(Axis(0))
        .into_dyn();
    if grad.shape() != sums.shape() {
        return Err(Error::ShapeMismatch {
            expected: sums.shape().to_vec(),
            actual: grad.shape().to_vec(),
        });
    }
    Zip::from(grad).and(&sums).for_each(|g, &s| *g += s);
    Ok(())
}

/// Direct cross-correlation: one output plane per (sample, filter).
pub fn conv_forward_direct(geometry: &ConvGeometry, output: &mut [f32], data: &[f32], filters: &[f32]) {
    let (d, w, o) = (&geometry.data, &geometry.filters, &geometry.output);
    output
        .par_chunks_mut(o.plane_size())
        .enumerate()
        .for_each(|(p, plane)| {
            let (s, f) = (p / o.k(), p % o.k());
            for r in 0..o.nr() {
                for c in 0..o.nc() {
                    let mut acc = 0.0;
                    for ch in 0..w.k() {
                        for fr in 0..w.nr() {
                            let Some(y) = geometry.input_row(r, fr) else {
                                continue;
                            };
                            for fc in 0..w.nc() {
                                if let Some(x) = geometry.input_col(c, fc) {
                                    acc += filters[w.offset(f, ch, fr, fc)] * data[d.offset(s, ch, y, x)];
                                }
                            }
                        }
                    }
                    plane[r * o.nc() + c] = acc;
                }
            }
        });
}

/// Lowers sample `s` of `data` into `cols`, a `column_rows x column_cols` matrix.
/// Row `(ch*FR + fr)*FC + fc` holds the tap `(ch, fr, fc)` for every output location.
pub fn im2col(geometry: &ConvGeometry, data: &[f32], s: usize, cols: &mut [f32]) {
    let (d, w, o) = (&geometry.data, &geometry.filters, &geometry.output);
    let taps_per_channel = w.nr() * w.nc();
    cols.par_chunks_mut(geometry.column_cols())
        .enumerate()
        .for_each(|(row, col_row)| {
            let ch = row / taps_per_channel;
            let fr = (row % taps_per_channel) / w.nc();
            let fc = row % w.nc();
            for r in 0..o.nr() {
                let y = geometry.input_row(r, fr);
                for c in 0..o.nc() {
                    col_row[r * o.nc() + c] = match (y, geometry.input_col(c, fc)) {
                        (Some(y), Some(x)) => data[d.offset(s, ch, y, x)],
                        _ => 0.0,
                    };
                }
            }
        });
}

/// Forward convolution as `filters (F x taps) @ im2col(sample) (taps x locations)`.
pub fn conv_forward_gemm(
    geometry: &ConvGeometry,
    workspace: &mut [f32],
    output: &mut [f32],
    data: &[f32],
    filters: &[f32],
) -> Result<(), Error> {
    let (rows, cols) = (geometry.column_rows(), geometry.column_cols());
    let out_k = geometry.output.k();
    let weights = matrix_view(filters, out_k, rows)?;
    let sample_len = geometry.output.strides[0];

    for s in 0..geometry.data.num_samples() {
        let column = &mut workspace[..rows * cols];
        im2col(geometry, data, s, column);
        let column = matrix_view(column, rows, cols)?;
        let mut out = matrix_view_mut(&mut output[s * sample_len..(s + 1) * sample_len], out_k, cols)?;
        general_mat_mul(1.0, &weights, &column, 0.0, &mut out);
    }
    Ok(())
}

/// Max over each clipped window; the first maximum in row-major order wins.
pub fn max_pool_forward(geometry: &PoolGeometry, dest: &mut [f32], src: &[f32]) {
    let (src_plane, dest_nc) = (geometry.src.plane_size(), geometry.dest.nc());
    let dest_plane = geometry.dest.plane_size();
    if dest_plane == 0 {
        return;
    }
    dest.par_chunks_mut(dest_plane).enumerate().for_each(|(p, out)| {
        let plane = &src[p * src_plane..(p + 1) * src_plane];
        for r in 0..geometry.dest.nr() {
            for c in 0..dest_nc {
                let (idx, _) = geometry.window_argmax(plane, r, c);
                out[r * dest_nc + c] = plane[idx];
            }
        }
    });
}

/// Softmax across the channel axis at every (sample, row, column).
pub fn softmax(mut x: ArrayViewMut4<'_, f32>) {
    Zip::from(x.lanes_mut(Axis(1))).par_for_each(|mut lane| {
        let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        lane.mapv_inplace(|v| (v - max).exp());
        let sum = lane.sum();
        lane /= sum;
    });
}

pub fn sigmoid(x: &mut ArrayD<f32>) {
    x.par_mapv_inplace(|v| 1.0 / (1.0 + (-v).exp()));
}

pub fn relu(x: &mut ArrayD<f32>) {
    x.par_mapv_inplace(|v| v.max(0.0));
}

pub fn tanh(x: &mut ArrayD<f32>) {
    x.par_mapv_inplace(f32::tanh);
}
