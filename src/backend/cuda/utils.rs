use super::context::CudaContext;
use crate::error::Error;
use cust::memory::DevicePointer;

pub const BLOCK_SIZE: u32 = 256;

/// Blocks needed to cover `n` threads at [`BLOCK_SIZE`] threads per block.
pub fn grid_for(n: usize) -> Result<u32, Error> {
    u32::try_from(n.div_ceil(BLOCK_SIZE as usize))
        .map_err(|_| Error::UnsupportedConfiguration(format!("{} elements exceed the CUDA grid limit", n)))
}

/// Kernel arguments are `int`; anything larger is rejected rather than truncated.
pub fn as_i32(value: usize, what: &str) -> Result<i32, Error> {
    i32::try_from(value).map_err(|_| {
        Error::UnsupportedConfiguration(format!("{} ({}) exceeds the 32-bit range of the CUDA kernels", what, value))
    })
}

/// Row-major `C (m x n) = alpha * op(A) @ op(B) + beta * C` through column-major cuBLAS.
///
/// `op(A)` is `m x k`; `A` is stored `m x k`, or `k x m` when `trans_a`.
/// `op(B)` is `k x n`; `B` is stored `k x n`, or `n x k` when `trans_b`.
///
/// The row-major buffer of `C` is the column-major buffer of `C^T`, so the
/// call computes `C^T = op(B)^T @ op(A)^T` with the operands swapped.
#[allow(clippy::too_many_arguments)]
pub fn sgemm_row_major(
    ctx: &CudaContext,
    trans_a: bool,
    trans_b: bool,
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: DevicePointer<f32>,
    b: DevicePointer<f32>,
    beta: f32,
    c: DevicePointer<f32>,
) -> Result<(), Error> {
    if m == 0 || n == 0 || k == 0 {
        return Ok(());
    }
    let op = |t: bool| {
        if t {
            cublas_sys::cublasOperation_t::CUBLAS_OP_T
        } else {
            cublas_sys::cublasOperation_t::CUBLAS_OP_N
        }
    };
    let (mi, ni, ki) = (as_i32(m, "GEMM rows")?, as_i32(n, "GEMM columns")?, as_i32(k, "GEMM depth")?);
    let ld_b = if trans_b { ki } else { ni };
    let ld_a = if trans_a { mi } else { ki };

    let status = unsafe {
        cublas_sys::cublasSgemm_v2(
            ctx.get_cublas_handle(),
            op(trans_b),
            op(trans_a),
            ni,
            mi,
            ki,
            &alpha,
            b.as_raw() as *const f32,
            ld_b,
            a.as_raw() as *const f32,
            ld_a,
            &beta,
            c.as_raw() as *mut f32,
            ni,
        )
    };
    if status != cublas_sys::cublasStatus_t::CUBLAS_STATUS_SUCCESS {
        return Err(Error::CublasError(format!(
            "cuBLAS Sgemm (row-major trick) failed with status: {:?}. Dims: m={}, k={}, n={}",
            status, m, k, n
        )));
    }
    Ok(())
}
