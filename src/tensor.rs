#[cfg(feature = "cuda")]
use crate::backend::cuda::CudaBackend;
use crate::{
    backend::{cpu::CpuBackend, Backend},
    descriptor::{Layout, TensorDescriptor},
    error::Error,
};
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};
use std::{
    cell::{Ref, RefCell, RefMut},
    marker::PhantomData,
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
};

static TENSOR_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn next_id() -> usize {
    TENSOR_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

pub struct TensorData<B: Backend> {
    pub id: usize,
    pub data: B::Storage,
    pub desc: TensorDescriptor,
    pub device: crate::Device,
}

/// A rank-4 array (num_samples, k, nr, nc) in row-major order.
///
/// `Tensor` is a handle: cloning it yields a second handle to the *same*
/// storage, which is how two arguments of an operation can alias. Use
/// [`Tensor::duplicate`] for an independent copy.
///
/// # Example
/// ```rust
/// use rust_dnn_lib::{ops, CpuBackend, Tensor};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let x = Tensor::<CpuBackend>::from_vec(vec![-1.0, 0.5, 2.0, -3.0], [1, 1, 2, 2])?;
///     ops::relu(&x, &x)?; // in place
///     assert_eq!(x.host()?, vec![0.0, 0.5, 2.0, 0.0]);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Tensor<B: Backend> {
    pub(crate) inner: Rc<RefCell<TensorData<B>>>,
    _backend: PhantomData<B>,
}

impl<B: Backend> std::fmt::Debug for TensorData<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorData")
            .field("id", &self.id)
            .field("shape", &self.desc.get_size())
            .field("device", &self.device)
            .finish()
    }
}

impl<B: Backend> Clone for Tensor<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            _backend: PhantomData,
        }
    }
}

/// True when both handles refer to the same storage.
pub fn is_same_object<B: Backend>(a: &Tensor<B>, b: &Tensor<B>) -> bool {
    Rc::ptr_eq(&a.inner, &b.inner)
}

/// True when both tensors have the same (n, k, nr, nc).
pub fn have_same_dimensions<B: Backend>(a: &Tensor<B>, b: &Tensor<B>) -> bool {
    a.shape() == b.shape()
}

impl<B: Backend> Tensor<B> {
    /// Wraps existing storage. The storage length must match the shape.
    pub fn new(data: B::Storage, shape: [usize; 4]) -> Result<Self, Error> {
        let mut desc = TensorDescriptor::new();
        desc.set_size(shape[0], shape[1], shape[2], shape[3]);
        if B::len(&data) != desc.element_count() {
            return Err(Error::ShapeMismatch {
                expected: shape.to_vec(),
                actual: vec![B::len(&data)],
            });
        }
        Ok(Self {
            inner: Rc::new(RefCell::new(TensorData {
                id: next_id(),
                device: B::device(&data),
                data,
                desc,
            })),
            _backend: PhantomData,
        })
    }

    /// Creates a new tensor with zeros in all elements.
    pub fn zeros(shape: [usize; 4]) -> Result<Self, Error> {
        let count = Layout::new(shape[0], shape[1], shape[2], shape[3]).element_count();
        Self::new(B::zeros(count)?, shape)
    }

    /// Creates a new tensor from a vector of f32 values.
    ///
    /// # Errors
    /// Returns an error if the product of dimensions in `shape` doesn't match `data.len()`.
    pub fn from_vec(data: Vec<f32>, shape: [usize; 4]) -> Result<Self, Error> {
        let count = Layout::new(shape[0], shape[1], shape[2], shape[3]).element_count();
        if data.len() != count {
            return Err(Error::ShapeMismatch {
                expected: shape.to_vec(),
                actual: vec![data.len()],
            });
        }
        Self::new(B::from_vec(data)?, shape)
    }

    /// Creates a tensor with values sampled from U(low, high).
    pub fn random_uniform(shape: [usize; 4], low: f32, high: f32) -> Result<Self, Error> {
        if high <= low {
            return Err(Error::InvalidOperation(format!(
                "Upper bound ({}) must be greater than lower bound ({}) for uniform distribution",
                high, low
            )));
        }
        let dist = Uniform::new(low, high).map_err(|e| Error::InvalidOperation(e.to_string()))?;
        Self::sampled(shape, &dist)
    }

    /// Creates a tensor with values sampled from N(mean, std_dev^2).
    pub fn random_normal(shape: [usize; 4], mean: f32, std_dev: f32) -> Result<Self, Error> {
        let dist = Normal::new(mean, std_dev).map_err(|e| Error::InvalidOperation(e.to_string()))?;
        Self::sampled(shape, &dist)
    }

    fn sampled<D: Distribution<f32>>(shape: [usize; 4], dist: &D) -> Result<Self, Error> {
        let count = Layout::new(shape[0], shape[1], shape[2], shape[3]).element_count();
        let mut rng = rand::rng();
        let data: Vec<f32> = (0..count).map(|_| rng.sample(dist)).collect();
        Self::from_vec(data, shape)
    }

    /// Deep copy with its own storage.
    pub fn duplicate(&self) -> Result<Self, Error> {
        let host = self.host()?;
        Self::from_vec(host, self.shape())
    }

    /// Gets an immutable reference to the underlying storage.
    pub fn data(&self) -> Ref<'_, B::Storage> {
        Ref::map(self.inner.borrow(), |inner| &inner.data)
    }

    pub(crate) fn data_mut(&self) -> RefMut<'_, B::Storage> {
        RefMut::map(self.inner.borrow_mut(), |inner| &mut inner.data)
    }

    pub fn descriptor(&self) -> Ref<'_, TensorDescriptor> {
        Ref::map(self.inner.borrow(), |inner| &inner.desc)
    }

    /// Snapshot of the cached layout.
    pub fn layout(&self) -> Layout {
        *self.inner.borrow().desc.handle()
    }

    /// `[num_samples, k, nr, nc]`.
    pub fn shape(&self) -> [usize; 4] {
        self.layout().dims
    }

    pub fn num_samples(&self) -> usize {
        self.layout().num_samples()
    }

    pub fn k(&self) -> usize {
        self.layout().k()
    }

    pub fn nr(&self) -> usize {
        self.layout().nr()
    }

    pub fn nc(&self) -> usize {
        self.layout().nc()
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.layout().element_count()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Reshapes the tensor. Storage is reallocated (zero-filled) only when the
    /// element count changes; otherwise the contents are kept as-is.
    pub fn set_size(&self, n: usize, k: usize, nr: usize, nc: usize) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        inner.desc.set_size(n, k, nr, nc);
        let count = inner.desc.element_count();
        if B::len(&inner.data) != count {
            log::trace!("tensor {} reallocated for {} elements", inner.id, count);
            inner.data = B::zeros(count)?;
        }
        Ok(())
    }

    /// Copies the elements to a host vector.
    pub fn host(&self) -> Result<Vec<f32>, Error> {
        B::copy_to_host(&self.inner.borrow().data)
    }

    /// Overwrites the elements from a host slice of matching length.
    pub fn set_host(&self, values: &[f32]) -> Result<(), Error> {
        B::update_from_host(&mut self.inner.borrow_mut().data, values)
    }

    /// The unique ID of this tensor's storage.
    pub fn id(&self) -> usize {
        self.inner.borrow().id
    }

    /// Returns the device where the tensor data is located.
    pub fn device(&self) -> crate::Device {
        self.inner.borrow().device
    }

    /// Copies the tensor's data to the CPU, returning a new `Tensor<CpuBackend>`.
    pub fn to_cpu(&self) -> Result<Tensor<CpuBackend>, Error> {
        Tensor::<CpuBackend>::from_vec(self.host()?, self.shape())
    }

    #[cfg(feature = "cuda")]
    /// Copies the tensor's data to the current CUDA device, returning a new `Tensor<CudaBackend>`.
    /// The CUDA context must already be initialised by the caller.
    pub fn to_gpu(&self) -> Result<Tensor<CudaBackend>, Error> {
        Tensor::<CudaBackend>::from_vec(self.host()?, self.shape())
    }
}
