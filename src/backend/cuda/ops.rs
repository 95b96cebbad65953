#![cfg(feature = "cuda")]

use super::context::{get_global_context, CudaContext};
use super::storage::CudaStorage;
use super::utils::{as_i32, grid_for, sgemm_row_major, BLOCK_SIZE};
use crate::algorithm::{ConvAlgorithm, ConvGeometry};
use crate::backend::Backend;
use crate::descriptor::Layout;
use crate::error::Error;
use crate::pooling::PoolGeometry;

use cust::context::CurrentContext;
use cust::launch;

/// Launches a one-thread-per-element kernel over `n` elements and waits for it.
macro_rules! launch_1d {
    ($ctx:expr, $name:literal, $n:expr, ($($arg:expr),* $(,)?)) => {{
        let n: usize = $n;
        if n > 0 {
            let stream = $ctx.get_stream();
            let kernel = $ctx.kernel($name)?;
            let grid = grid_for(n)?;
            unsafe {
                launch!(kernel<<<grid, BLOCK_SIZE, 0, stream>>>($($arg),*))?;
            }
            stream.synchronize()?;
        }
    }};
}

// --- CudaBackend Struct ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CudaBackend;

/// Convolution dimensions as kernel `int` arguments.
struct ConvDims {
    n: i32,
    k: i32,
    nr: i32,
    nc: i32,
    f: i32,
    fr: i32,
    fc: i32,
    onr: i32,
    onc: i32,
    sy: i32,
    sx: i32,
    py: i32,
    px: i32,
}

impl ConvDims {
    fn new(g: &ConvGeometry) -> Result<Self, Error> {
        Ok(Self {
            n: as_i32(g.data.num_samples(), "samples")?,
            k: as_i32(g.data.k(), "channels")?,
            nr: as_i32(g.data.nr(), "rows")?,
            nc: as_i32(g.data.nc(), "columns")?,
            f: as_i32(g.filters.num_samples(), "filters")?,
            fr: as_i32(g.filters.nr(), "filter rows")?,
            fc: as_i32(g.filters.nc(), "filter columns")?,
            onr: as_i32(g.output.nr(), "output rows")?,
            onc: as_i32(g.output.nc(), "output columns")?,
            sy: as_i32(g.stride.0, "stride")?,
            sx: as_i32(g.stride.1, "stride")?,
            py: as_i32(g.padding.0, "padding")?,
            px: as_i32(g.padding.1, "padding")?,
        })
    }
}

fn gemm_workspace(workspace: Option<&mut CudaStorage>, algo: ConvAlgorithm) -> Result<&mut CudaStorage, Error> {
    workspace.ok_or_else(|| Error::InternalLogicError(format!("{:?} convolution dispatched without a workspace", algo)))
}

/// Lowers sample `s` of `data` into `workspace`.
fn im2col(ctx: &CudaContext, g: &ConvGeometry, d: &ConvDims, data: &CudaStorage, s: usize, workspace: &mut CudaStorage) -> Result<(), Error> {
    let data_s = unsafe { data.as_ptr().add(s * g.data.strides[0]) };
    launch_1d!(ctx, "im2col_kernel", g.column_rows() * g.column_cols(), (
        data_s, workspace.as_mut_ptr(),
        d.k, d.nr, d.nc, d.fr, d.fc, d.onr, d.onc, d.sy, d.sx, d.py, d.px
    ));
    Ok(())
}

impl Backend for CudaBackend {
    type Storage = CudaStorage;
    type Workspace = CudaStorage;

    fn device(storage: &Self::Storage) -> crate::Device {
        crate::Device::Cuda(storage.device_id())
    }

    fn zeros(len: usize) -> Result<Self::Storage, Error> {
        let ctx = get_global_context()?;
        CudaStorage::zeros(len, ctx.device_id())
    }

    fn from_vec(data: Vec<f32>) -> Result<Self::Storage, Error> {
        let ctx = get_global_context()?;
        CudaStorage::from_slice(&data, ctx.device_id())
    }

    fn len(storage: &Self::Storage) -> usize {
        storage.len()
    }

    fn copy_to_host(storage: &Self::Storage) -> Result<Vec<f32>, Error> {
        storage.to_vec()
    }

    fn update_from_host(storage: &mut Self::Storage, data: &[f32]) -> Result<(), Error> {
        storage.copy_from_slice(data)
    }

    fn copy_from(dest: &mut Self::Storage, src: &Self::Storage) -> Result<(), Error> {
        dest.copy_from_storage(src)
    }

    fn alloc_workspace(elements: usize) -> Result<Self::Workspace, Error> {
        log::debug!("allocating CUDA workspace of {} floats", elements);
        Self::zeros(elements)
    }

    fn workspace_len(workspace: &Self::Workspace) -> usize {
        workspace.len()
    }

    fn add_scaled(
        beta: f32,
        dest: &mut Self::Storage,
        dest_layout: &Layout,
        alpha: f32,
        src: &Self::Storage,
        src_layout: &Layout,
    ) -> Result<(), Error> {
        // A broadcast dimension contributes no offset.
        let stride = |axis: usize| -> Result<i32, Error> {
            if src_layout.dims[axis] == 1 {
                Ok(0)
            } else {
                as_i32(src_layout.strides[axis], "stride")
            }
        };
        let (s0, s1, s2, s3) = (stride(0)?, stride(1)?, stride(2)?, stride(3)?);
        let ctx = get_global_context()?;
        let total = dest_layout.element_count();
        launch_1d!(ctx, "add_scaled_kernel", total, (
            dest.as_mut_ptr(), src.as_ptr(), beta, alpha,
            as_i32(dest_layout.k(), "channels")?,
            as_i32(dest_layout.nr(), "rows")?,
            as_i32(dest_layout.nc(), "columns")?,
            s0, s1, s2, s3,
            as_i32(total, "elements")?
        ));
        Ok(())
    }

    fn fill(storage: &mut Self::Storage, value: f32) -> Result<(), Error> {
        let ctx = get_global_context()?;
        let n = storage.len();
        launch_1d!(ctx, "fill_kernel", n, (storage.as_mut_ptr(), value, as_i32(n, "elements")?));
        Ok(())
    }

    fn scale(storage: &mut Self::Storage, value: f32) -> Result<(), Error> {
        let ctx = get_global_context()?;
        let n = storage.len();
        launch_1d!(ctx, "scale_kernel", n, (storage.as_mut_ptr(), value, as_i32(n, "elements")?));
        Ok(())
    }

    fn add_channel_sums(
        grad: &mut Self::Storage,
        gradient_input: &Self::Storage,
        gradient_layout: &Layout,
    ) -> Result<(), Error> {
        let channels = gradient_layout.k();
        if channels == 0 {
            return Ok(());
        }
        let ctx = get_global_context()?;
        let kernel = ctx.kernel("channel_sums_kernel")?;
        let stream = ctx.get_stream();
        let blocks = as_i32(channels, "channels")? as u32;
        unsafe {
            launch!(kernel<<<blocks, BLOCK_SIZE, 0, stream>>>(
                grad.as_mut_ptr(),
                gradient_input.as_ptr(),
                as_i32(gradient_layout.num_samples(), "samples")?,
                as_i32(channels, "channels")?,
                as_i32(gradient_layout.plane_size(), "plane size")?
            ))?;
        }
        stream.synchronize()?;
        Ok(())
    }

    fn check_conv_support(geometry: &ConvGeometry) -> Result<(), Error> {
        for (what, count) in [
            ("data", geometry.data.element_count()),
            ("filters", geometry.filters.element_count()),
            ("output", geometry.output.element_count()),
            ("column workspace", geometry.column_rows() * geometry.column_cols()),
        ] {
            as_i32(count, what)?;
        }
        Ok(())
    }

    fn conv_forward(
        algo: ConvAlgorithm,
        workspace: Option<&mut Self::Workspace>,
        geometry: &ConvGeometry,
        output: &mut Self::Storage,
        data: &Self::Storage,
        filters: &Self::Storage,
    ) -> Result<(), Error> {
        let ctx = get_global_context()?;
        let d = ConvDims::new(geometry)?;
        match algo {
            ConvAlgorithm::Direct => {
                launch_1d!(ctx, "conv_forward_direct_kernel", geometry.output.element_count(), (
                    output.as_mut_ptr(), data.as_ptr(), filters.as_ptr(),
                    d.n, d.k, d.nr, d.nc, d.f, d.fr, d.fc, d.onr, d.onc, d.sy, d.sx, d.py, d.px
                ));
            }
            ConvAlgorithm::Im2ColGemm => {
                let ws = gemm_workspace(workspace, algo)?;
                let (rows, cols) = (geometry.column_rows(), geometry.column_cols());
                for s in 0..geometry.data.num_samples() {
                    im2col(&ctx, geometry, &d, data, s, ws)?;
                    let out_s = unsafe { output.as_mut_ptr().add(s * geometry.output.strides[0]) };
                    sgemm_row_major(
                        &ctx,
                        false,
                        false,
                        geometry.output.k(),
                        cols,
                        rows,
                        1.0,
                        filters.as_ptr(),
                        ws.as_ptr(),
                        0.0,
                        out_s,
                    )?;
                    CurrentContext::synchronize()?;
                }
            }
        }
        Ok(())
    }

    fn conv_backward_data(
        algo: ConvAlgorithm,
        workspace: Option<&mut Self::Workspace>,
        geometry: &ConvGeometry,
        data_gradient: &mut Self::Storage,
        gradient_input: &Self::Storage,
        filters: &Self::Storage,
    ) -> Result<(), Error> {
        let ctx = get_global_context()?;
        let d = ConvDims::new(geometry)?;
        match algo {
            ConvAlgorithm::Direct => {
                launch_1d!(ctx, "conv_backward_data_direct_kernel", geometry.data.element_count(), (
                    data_gradient.as_mut_ptr(), gradient_input.as_ptr(), filters.as_ptr(),
                    d.n, d.k, d.nr, d.nc, d.f, d.fr, d.fc, d.onr, d.onc, d.sy, d.sx, d.py, d.px
                ));
            }
            ConvAlgorithm::Im2ColGemm => {
                let ws = gemm_workspace(workspace, algo)?;
                let (rows, cols) = (geometry.column_rows(), geometry.column_cols());
                for s in 0..geometry.data.num_samples() {
                    let gi_s = unsafe { gradient_input.as_ptr().add(s * geometry.output.strides[0]) };
                    // columns = filters^T @ gradient_input(sample)
                    sgemm_row_major(
                        &ctx,
                        true,
                        false,
                        rows,
                        cols,
                        geometry.output.k(),
                        1.0,
                        filters.as_ptr(),
                        gi_s,
                        0.0,
                        ws.as_mut_ptr(),
                    )?;
                    CurrentContext::synchronize()?;

                    let grad_s = unsafe { data_gradient.as_mut_ptr().add(s * geometry.data.strides[0]) };
                    launch_1d!(ctx, "col2im_add_kernel", geometry.data.strides[0], (
                        ws.as_ptr(), grad_s,
                        d.k, d.nr, d.nc, d.fr, d.fc, d.onr, d.onc, d.sy, d.sx, d.py, d.px
                    ));
                }
            }
        }
        Ok(())
    }

    fn conv_backward_filter(
        algo: ConvAlgorithm,
        workspace: Option<&mut Self::Workspace>,
        geometry: &ConvGeometry,
        filters_gradient: &mut Self::Storage,
        gradient_input: &Self::Storage,
        data: &Self::Storage,
    ) -> Result<(), Error> {
        let ctx = get_global_context()?;
        let d = ConvDims::new(geometry)?;
        match algo {
            ConvAlgorithm::Direct => {
                launch_1d!(ctx, "conv_backward_filter_direct_kernel", geometry.filters.element_count(), (
                    filters_gradient.as_mut_ptr(), gradient_input.as_ptr(), data.as_ptr(),
                    d.n, d.k, d.nr, d.nc, d.f, d.fr, d.fc, d.onr, d.onc, d.sy, d.sx, d.py, d.px
                ));
            }
            ConvAlgorithm::Im2ColGemm => {
                let ws = gemm_workspace(workspace, algo)?;
                let (rows, cols) = (geometry.column_rows(), geometry.column_cols());
                for s in 0..geometry.data.num_samples() {
                    im2col(&ctx, geometry, &d, data, s, ws)?;
                    let gi_s = unsafe { gradient_input.as_ptr().add(s * geometry.output.strides[0]) };
                    // The first sample assigns, the rest accumulate.
                    let beta = if s == 0 { 0.0 } else { 1.0 };
                    sgemm_row_major(
                        &ctx,
                        false,
                        true,
                        geometry.output.k(),
                        rows,
                        cols,
                        1.0,
                        gi_s,
                        ws.as_ptr(),
                        beta,
                        filters_gradient.as_mut_ptr(),
                    )?;
                    CurrentContext::synchronize()?;
                }
            }
        }
        Ok(())
    }

    fn max_pool_forward(geometry: &PoolGeometry, dest: &mut Self::Storage, src: &Self::Storage) -> Result<(), Error> {
        let ctx = get_global_context()?;
        let planes = geometry.src.num_samples() * geometry.src.k();
        launch_1d!(ctx, "max_pool_forward_kernel", geometry.dest.element_count(), (
            dest.as_mut_ptr(), src.as_ptr(),
            as_i32(planes, "planes")?,
            as_i32(geometry.src.nr(), "rows")?,
            as_i32(geometry.src.nc(), "columns")?,
            as_i32(geometry.dest.nr(), "output rows")?,
            as_i32(geometry.dest.nc(), "output columns")?,
            as_i32(geometry.window.0, "window height")?,
            as_i32(geometry.window.1, "window width")?,
            as_i32(geometry.stride.0, "stride")?,
            as_i32(geometry.stride.1, "stride")?
        ));
        Ok(())
    }

    fn max_pool_backward(
        geometry: &PoolGeometry,
        grad: &mut Self::Storage,
        gradient_input: &Self::Storage,
        dest: &Self::Storage,
        src: &Self::Storage,
    ) -> Result<(), Error> {
        let ctx = get_global_context()?;
        let planes = geometry.src.num_samples() * geometry.src.k();
        launch_1d!(ctx, "max_pool_backward_kernel", geometry.dest.element_count(), (
            grad.as_mut_ptr(), gradient_input.as_ptr(), dest.as_ptr(), src.as_ptr(),
            as_i32(planes, "planes")?,
            as_i32(geometry.src.nr(), "rows")?,
            as_i32(geometry.src.nc(), "columns")?,
            as_i32(geometry.dest.nr(), "output rows")?,
            as_i32(geometry.dest.nc(), "output columns")?,
            as_i32(geometry.window.0, "window height")?,
            as_i32(geometry.window.1, "window width")?,
            as_i32(geometry.stride.0, "stride")?,
            as_i32(geometry.stride.1, "stride")?
        ));
        Ok(())
    }

    fn softmax(x: &mut Self::Storage, layout: &Layout) -> Result<(), Error> {
        let ctx = get_global_context()?;
        launch_1d!(ctx, "softmax_kernel", layout.num_samples() * layout.plane_size(), (
            x.as_mut_ptr(),
            as_i32(layout.num_samples(), "samples")?,
            as_i32(layout.k(), "channels")?,
            as_i32(layout.plane_size(), "plane size")?
        ));
        Ok(())
    }

    fn softmax_backward(grad: &mut Self::Storage, dest: &Self::Storage, layout: &Layout) -> Result<(), Error> {
        let ctx = get_global_context()?;
        launch_1d!(ctx, "softmax_backward_kernel", layout.num_samples() * layout.plane_size(), (
            grad.as_mut_ptr(), dest.as_ptr(),
            as_i32(layout.num_samples(), "samples")?,
            as_i32(layout.k(), "channels")?,
            as_i32(layout.plane_size(), "plane size")?
        ));
        Ok(())
    }

    fn sigmoid(x: &mut Self::Storage) -> Result<(), Error> {
        let ctx = get_global_context()?;
        let n = x.len();
        launch_1d!(ctx, "sigmoid_kernel", n, (x.as_mut_ptr(), as_i32(n, "elements")?));
        Ok(())
    }

    fn sigmoid_backward(grad: &mut Self::Storage, dest: &Self::Storage) -> Result<(), Error> {
        let ctx = get_global_context()?;
        let n = grad.len();
        launch_1d!(ctx, "sigmoid_backward_kernel", n, (grad.as_mut_ptr(), dest.as_ptr(), as_i32(n, "elements")?));
        Ok(())
    }

    fn relu(x: &mut Self::Storage) -> Result<(), Error> {
        let ctx = get_global_context()?;
        let n = x.len();
        launch_1d!(ctx, "relu_kernel", n, (x.as_mut_ptr(), as_i32(n, "elements")?));
        Ok(())
    }

    fn relu_backward(grad: &mut Self::Storage, dest: &Self::Storage) -> Result<(), Error> {
        let ctx = get_global_context()?;
        let n = grad.len();
        launch_1d!(ctx, "relu_backward_kernel", n, (grad.as_mut_ptr(), dest.as_ptr(), as_i32(n, "elements")?));
        Ok(())
    }

    fn tanh(x: &mut Self::Storage) -> Result<(), Error> {
        let ctx = get_global_context()?;
        let n = x.len();
        launch_1d!(ctx, "tanh_kernel", n, (x.as_mut_ptr(), as_i32(n, "elements")?));
        Ok(())
    }

    fn tanh_backward(grad: &mut Self::Storage, dest: &Self::Storage) -> Result<(), Error> {
        let ctx = get_global_context()?;
        let n = grad.len();
        launch_1d!(ctx, "tanh_backward_kernel", n, (grad.as_mut_ptr(), dest.as_ptr(), as_i32(n, "elements")?));
        Ok(())
    }
}
