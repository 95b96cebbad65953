use crate::descriptor::Layout;
use crate::error::Error;
use ndarray::{Array1, ArrayD, ArrayView2, ArrayView4, ArrayViewMut2, ArrayViewMut4, IxDyn, ShapeError};

/// Host storage for the CPU backend.
///
/// The buffer is one-dimensional; the shape lives in the owning tensor's
/// descriptor and is applied through [`Array::view4`] when a kernel runs.
#[derive(Clone, Default, PartialEq)]
pub struct Array {
    pub(crate) data: ArrayD<f32>,
}

fn map_shape_err(shape: Vec<usize>, len: usize) -> impl Fn(ShapeError) -> Error {
    move |e| Error::InternalLogicError(format!("cannot view {} elements as {:?}: {}", len, shape, e))
}

impl Array {
    pub fn new(data: Vec<f32>) -> Self {
        Self {
            data: Array1::from(data).into_dyn(),
        }
    }

    pub fn zeros(len: usize) -> Self {
        Self {
            data: ArrayD::zeros(IxDyn(&[len])),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the array contains no elements
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get_data(&self) -> &ArrayD<f32> {
        &self.data
    }

    pub fn get_data_mut(&mut self) -> &mut ArrayD<f32> {
        &mut self.data
    }

    pub fn as_slice(&self) -> Result<&[f32], Error> {
        self.data
            .as_slice()
            .ok_or_else(|| Error::InternalLogicError("CPU storage is not contiguous".to_string()))
    }

    pub fn as_mut_slice(&mut self) -> Result<&mut [f32], Error> {
        self.data
            .as_slice_mut()
            .ok_or_else(|| Error::InternalLogicError("CPU storage is not contiguous".to_string()))
    }

    /// The buffer viewed as `(n, k, nr, nc)` under `layout`.
    pub fn view4(&self, layout: &Layout) -> Result<ArrayView4<'_, f32>, Error> {
        self.data
            .view()
            .into_shape_with_order(layout.dims)
            .map_err(map_shape_err(layout.to_vec(), self.len()))
    }

    pub fn view4_mut(&mut self, layout: &Layout) -> Result<ArrayViewMut4<'_, f32>, Error> {
        let len = self.len();
        self.data
            .view_mut()
            .into_shape_with_order(layout.dims)
            .map_err(map_shape_err(layout.to_vec(), len))
    }
}

pub(crate) fn matrix_view(slice: &[f32], rows: usize, cols: usize) -> Result<ArrayView2<'_, f32>, Error> {
    let len = slice.len();
    ArrayView2::from_shape((rows, cols), slice).map_err(map_shape_err(vec![rows, cols], len))
}

pub(crate) fn matrix_view_mut(slice: &mut [f32], rows: usize, cols: usize) -> Result<ArrayViewMut2<'_, f32>, Error> {
    let len = slice.len();
    ArrayViewMut2::from_shape((rows, cols), slice).map_err(map_shape_err(vec![rows, cols], len))
}

impl From<Vec<f32>> for Array {
    fn from(value: Vec<f32>) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Debug for Array {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Array(len={})", self.data.len())
    }
}
