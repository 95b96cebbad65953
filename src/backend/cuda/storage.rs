use crate::error::Error;
use cust::memory::{CopyDestination, DeviceBuffer, DevicePointer};

/// A flat `f32` device buffer.
///
/// Zero-length storage still owns a one-element allocation so every buffer
/// has a valid device pointer; `len` is the logical element count. For any
/// non-empty storage the allocation is exactly `len` elements.
pub struct CudaStorage {
    data: DeviceBuffer<f32>,
    len: usize,
    device_id: u32,
}

impl std::fmt::Debug for CudaStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CudaStorage(len={}, device={})", self.len, self.device_id)
    }
}

impl CudaStorage {
    pub fn zeros(len: usize, device_id: u32) -> Result<Self, Error> {
        log::trace!("allocating {} zeroed floats on device {}", len, device_id);
        let data = DeviceBuffer::<f32>::zeroed(len.max(1))?;
        Ok(Self { data, len, device_id })
    }

    pub fn from_slice(values: &[f32], device_id: u32) -> Result<Self, Error> {
        let mut storage = Self::zeros(values.len(), device_id)?;
        storage.copy_from_slice(values)?;
        Ok(storage)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn as_ptr(&self) -> DevicePointer<f32> {
        self.data.as_device_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> DevicePointer<f32> {
        self.data.as_device_ptr()
    }

    pub fn copy_from_slice(&mut self, values: &[f32]) -> Result<(), Error> {
        if values.len() != self.len {
            return Err(Error::ShapeMismatch {
                expected: vec![self.len],
                actual: vec![values.len()],
            });
        }
        if self.len > 0 {
            self.data.copy_from(values)?;
        }
        Ok(())
    }

    pub fn to_vec(&self) -> Result<Vec<f32>, Error> {
        let mut host = vec![0.0f32; self.len];
        if self.len > 0 {
            self.data.copy_to(&mut host[..])?;
        }
        Ok(host)
    }

    pub fn copy_from_storage(&mut self, src: &Self) -> Result<(), Error> {
        if self.len != src.len {
            return Err(Error::ShapeMismatch {
                expected: vec![self.len],
                actual: vec![src.len],
            });
        }
        if self.len > 0 {
            self.data.copy_from(&src.data)?;
        }
        Ok(())
    }
}
