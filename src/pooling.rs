//! Stateful max-pooling operator.

use crate::backend::Backend;
use crate::descriptor::Layout;
use crate::error::Error;
use crate::tensor::{is_same_object, Tensor};
use std::marker::PhantomData;

/// Window and stride fixed by [`MaxPool::setup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolDescriptor {
    pub window: (usize, usize),
    pub stride: (usize, usize),
}

/// A pooling descriptor bound to concrete source and destination layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolGeometry {
    pub window: (usize, usize),
    pub stride: (usize, usize),
    pub src: Layout,
    pub dest: Layout,
}

impl PoolGeometry {
    pub fn new(desc: &PoolDescriptor, src: Layout) -> Result<Self, Error> {
        let (sy, sx) = desc.stride;
        if src.nr() < sy || src.nc() < sx {
            return Err(Error::InvalidOperation(format!(
                "pooling stride ({}, {}) exceeds source plane {}x{}",
                sy,
                sx,
                src.nr(),
                src.nc()
            )));
        }
        Ok(Self {
            window: desc.window,
            stride: desc.stride,
            src,
            dest: Layout::new(src.num_samples(), src.k(), src.nr() / sy, src.nc() / sx),
        })
    }

    /// Row and column ranges of the window behind output (r, c), clipped to the source.
    #[inline]
    fn window_bounds(&self, r: usize, c: usize) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
        let (y0, x0) = (r * self.stride.0, c * self.stride.1);
        (
            y0..(y0 + self.window.0).min(self.src.nr()),
            x0..(x0 + self.window.1).min(self.src.nc()),
        )
    }

    /// Index within `plane` and value of the window maximum for output (r, c).
    /// Scans row-major with a strict comparison, so the first maximum wins.
    pub fn window_argmax(&self, plane: &[f32], r: usize, c: usize) -> (usize, f32) {
        let (rows, cols) = self.window_bounds(r, c);
        let nc = self.src.nc();
        let mut best = (rows.start * nc + cols.start, f32::NEG_INFINITY);
        for y in rows {
            for x in cols.clone() {
                let v = plane[y * nc + x];
                if v > best.1 {
                    best = (y * nc + x, v);
                }
            }
        }
        best
    }

    /// First position, in row-major order, of the window for output (r, c) holding `value`.
    pub fn first_match(&self, plane: &[f32], r: usize, c: usize, value: f32) -> Option<usize> {
        let (rows, cols) = self.window_bounds(r, c);
        let nc = self.src.nc();
        rows.flat_map(|y| cols.clone().map(move |x| y * nc + x))
            .find(|&i| plane[i] == value)
    }

    /// Input position that receives the gradient of output (r, c) pooled as `value`.
    /// Falls back to the argmax start position when no element compares equal,
    /// which only happens for windows of NaN.
    pub fn gradient_target(&self, plane: &[f32], r: usize, c: usize, value: f32) -> usize {
        self.first_match(plane, r, c, value)
            .unwrap_or_else(|| self.window_argmax(plane, r, c).0)
    }
}

/// Max-pooling over (row, column) windows of each channel plane.
///
/// ```rust
/// use rust_dnn_lib::{CpuBackend, MaxPool, Tensor};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let src = Tensor::<CpuBackend>::from_vec((0..16).map(|v| v as f32).collect(), [1, 1, 4, 4])?;
///     let dest = Tensor::<CpuBackend>::zeros([0, 0, 0, 0])?;
///     let mut pool = MaxPool::<CpuBackend>::new();
///     pool.setup(2, 2, 2, 2)?;
///     pool.forward(&dest, &src)?;
///     assert_eq!(dest.host()?, vec![5.0, 7.0, 13.0, 15.0]);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MaxPool<B: Backend> {
    desc: Option<PoolDescriptor>,
    _backend: PhantomData<B>,
}

impl<B: Backend> Default for MaxPool<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> MaxPool<B> {
    pub fn new() -> Self {
        Self {
            desc: None,
            _backend: PhantomData,
        }
    }

    pub fn setup(
        &mut self,
        window_height: usize,
        window_width: usize,
        stride_y: usize,
        stride_x: usize,
    ) -> Result<(), Error> {
        if window_height == 0 || window_width == 0 || stride_y == 0 || stride_x == 0 {
            return Err(Error::InvalidOperation(format!(
                "pooling window ({}, {}) and stride ({}, {}) must be positive",
                window_height, window_width, stride_y, stride_x
            )));
        }
        let desc = PoolDescriptor {
            window: (window_height, window_width),
            stride: (stride_y, stride_x),
        };
        if self.desc == Some(desc) {
            log::debug!("max pool setup unchanged: {:?}", desc);
        } else {
            log::debug!("max pool configured: {:?}", desc);
        }
        self.desc = Some(desc);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.desc = None;
    }

    pub fn is_configured(&self) -> bool {
        self.desc.is_some()
    }

    /// `(window_height, window_width)` from the last `setup`.
    pub fn window(&self) -> Option<(usize, usize)> {
        self.desc.map(|d| d.window)
    }

    /// `(stride_y, stride_x)` from the last `setup`.
    pub fn stride(&self) -> Option<(usize, usize)> {
        self.desc.map(|d| d.stride)
    }

    fn descriptor(&self) -> Result<&PoolDescriptor, Error> {
        self.desc
            .as_ref()
            .ok_or_else(|| Error::NotConfigured("MaxPool::setup has not been called".to_string()))
    }

    /// Resizes `dest` to `(N, K, nr/stride_y, nc/stride_x)` and fills it with window maxima.
    pub fn forward(&self, dest: &Tensor<B>, src: &Tensor<B>) -> Result<(), Error> {
        let desc = self.descriptor()?;
        if is_same_object(dest, src) {
            return Err(Error::aliasing("max_pool", "dest", "src"));
        }
        let geometry = PoolGeometry::new(desc, src.layout())?;
        let [n, k, nr, nc] = geometry.dest.dims;
        dest.set_size(n, k, nr, nc)?;

        log::trace!("max_pool forward {:?} -> {:?}", geometry.src.dims, geometry.dest.dims);
        B::max_pool_forward(&geometry, &mut dest.data_mut(), &src.data())
    }

    /// Adds the gradient of `dot(gradient_input, dest)` with respect to `src` into `grad`.
    ///
    /// Each window sends its gradient to the first position, in row-major
    /// order, whose value equals the pooled value in `dest`.
    pub fn get_gradient(
        &self,
        gradient_input: &Tensor<B>,
        dest: &Tensor<B>,
        src: &Tensor<B>,
        grad: &Tensor<B>,
    ) -> Result<(), Error> {
        let desc = self.descriptor()?;
        for (other, name) in [(gradient_input, "gradient_input"), (dest, "dest"), (src, "src")] {
            if is_same_object(grad, other) {
                return Err(Error::aliasing("max_pool_gradient", "grad", name));
            }
        }
        let geometry = PoolGeometry::new(desc, src.layout())?;
        if dest.shape() != geometry.dest.dims {
            return Err(Error::ShapeMismatch {
                expected: geometry.dest.to_vec(),
                actual: dest.shape().to_vec(),
            });
        }
        if gradient_input.shape() != dest.shape() {
            return Err(Error::ShapeMismatch {
                expected: dest.shape().to_vec(),
                actual: gradient_input.shape().to_vec(),
            });
        }
        if grad.shape() != src.shape() {
            return Err(Error::ShapeMismatch {
                expected: src.shape().to_vec(),
                actual: grad.shape().to_vec(),
            });
        }

        log::trace!("max_pool backward {:?} -> {:?}", geometry.dest.dims, geometry.src.dims);
        B::max_pool_backward(
            &geometry,
            &mut grad.data_mut(),
            &gradient_input.data(),
            &dest.data(),
            &src.data(),
        )
    }
}
