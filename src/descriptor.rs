//! Rank-4 shape handles handed to backend calls.

/// Cached dims and row-major strides of a rank-4 tensor, in (n, k, nr, nc) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Layout {
    pub dims: [usize; 4],
    pub strides: [usize; 4],
}

impl Layout {
    pub fn new(n: usize, k: usize, nr: usize, nc: usize) -> Self {
        let dims = if n == 0 || k == 0 || nr == 0 || nc == 0 {
            [0; 4]
        } else {
            [n, k, nr, nc]
        };
        let strides = [dims[1] * dims[2] * dims[3], dims[2] * dims[3], dims[3], 1];
        Self { dims, strides }
    }

    pub fn num_samples(&self) -> usize {
        self.dims[0]
    }

    pub fn k(&self) -> usize {
        self.dims[1]
    }

    pub fn nr(&self) -> usize {
        self.dims[2]
    }

    pub fn nc(&self) -> usize {
        self.dims[3]
    }

    pub fn element_count(&self) -> usize {
        self.dims.iter().product()
    }

    /// Elements in one (row, column) plane.
    pub fn plane_size(&self) -> usize {
        self.dims[2] * self.dims[3]
    }

    /// Flat offset of element (s, k, r, c).
    #[inline]
    pub fn offset(&self, s: usize, k: usize, r: usize, c: usize) -> usize {
        s * self.strides[0] + k * self.strides[1] + r * self.strides[2] + c
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.dims.to_vec()
    }
}

/// Describes the shape of a 4D tensor to the compute backend.
///
/// Every [`Tensor`](crate::Tensor) owns exactly one descriptor for its whole
/// lifetime. The descriptor can be moved but not copied; the layout it caches is
/// only recomputed by [`TensorDescriptor::set_size`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TensorDescriptor {
    layout: Layout,
}

impl TensorDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the shape. If any argument is zero, all four dimensions become zero.
    pub fn set_size(&mut self, n: usize, k: usize, nr: usize, nc: usize) {
        self.layout = Layout::new(n, k, nr, nc);
    }

    /// Returns `(n, k, nr, nc)` as last given to `set_size`.
    pub fn get_size(&self) -> (usize, usize, usize, usize) {
        let [n, k, nr, nc] = self.layout.dims;
        (n, k, nr, nc)
    }

    pub fn element_count(&self) -> usize {
        self.layout.element_count()
    }

    /// The layout backend calls consume.
    pub fn handle(&self) -> &Layout {
        &self.layout
    }
}
