// src/backend/cpu.rs

use crate::algorithm::{ConvAlgorithm, ConvGeometry};
use crate::array::Array; // The storage type for this backend
use crate::backend::Backend;
use crate::descriptor::Layout;
use crate::error::Error;
use crate::ops::cpu_backward;
use crate::ops::cpu_ops;
use crate::pooling::PoolGeometry;

/// Host backend: plain memory, `ndarray` GEMM, `rayon` across planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuBackend;

fn gemm_workspace<'a>(workspace: Option<&'a mut Array>, algo: ConvAlgorithm) -> Result<&'a mut [f32], Error> {
    workspace
        .ok_or_else(|| Error::InternalLogicError(format!("{:?} convolution dispatched without a workspace", algo)))?
        .as_mut_slice()
}

impl Backend for CpuBackend {
    type Storage = Array;
    type Workspace = Array;

    fn device(_storage: &Self::Storage) -> crate::Device {
        crate::Device::Cpu
    }

    fn zeros(len: usize) -> Result<Self::Storage, Error> {
        Ok(Array::zeros(len))
    }

    fn from_vec(data: Vec<f32>) -> Result<Self::Storage, Error> {
        Ok(Array::new(data))
    }

    fn len(storage: &Self::Storage) -> usize {
        storage.len()
    }

    fn copy_to_host(storage: &Self::Storage) -> Result<Vec<f32>, Error> {
        Ok(storage.as_slice()?.to_vec())
    }

    fn update_from_host(storage: &mut Self::Storage, data: &[f32]) -> Result<(), Error> {
        if storage.len() != data.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![storage.len()],
                actual: vec![data.len()],
            });
        }
        storage.as_mut_slice()?.copy_from_slice(data);
        Ok(())
    }

    fn copy_from(dest: &mut Self::Storage, src: &Self::Storage) -> Result<(), Error> {
        Self::update_from_host(dest, src.as_slice()?)
    }

    fn alloc_workspace(elements: usize) -> Result<Self::Workspace, Error> {
        let mut data = Vec::new();
        data.try_reserve_exact(elements)
            .map_err(|e| Error::OutOfMemory(format!("host workspace of {} floats: {}", elements, e)))?;
        data.resize(elements, 0.0);
        Ok(Array::new(data))
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
        cpu_ops::add_scaled(beta, dest.view4_mut(dest_layout)?, alpha, src.view4(src_layout)?)
    }

    fn fill(storage: &mut Self::Storage, value: f32) -> Result<(), Error> {
        storage.get_data_mut().fill(value);
        Ok(())
    }

    fn scale(storage: &mut Self::Storage, value: f32) -> Result<(), Error> {
        storage.get_data_mut().par_mapv_inplace(|v| v * value);
        Ok(())
    }

    fn add_channel_sums(
        grad: &mut Self::Storage,
        gradient_input: &Self::Storage,
        gradient_layout: &Layout,
    ) -> Result<(), Error> {
        cpu_ops::add_channel_sums(grad.get_data_mut(), gradient_input.view4(gradient_layout)?)
    }

    fn conv_forward(
        algo: ConvAlgorithm,
        workspace: Option<&mut Self::Workspace>,
        geometry: &ConvGeometry,
        output: &mut Self::Storage,
        data: &Self::Storage,
        filters: &Self::Storage,
    ) -> Result<(), Error> {
        match algo {
            ConvAlgorithm::Direct => {
                cpu_ops::conv_forward_direct(geometry, output.as_mut_slice()?, data.as_slice()?, filters.as_slice()?);
                Ok(())
            }
            ConvAlgorithm::Im2ColGemm => cpu_ops::conv_forward_gemm(
                geometry,
                gemm_workspace(workspace, algo)?,
                output.as_mut_slice()?,
                data.as_slice()?,
                filters.as_slice()?,
            ),
        }
    }

    fn conv_backward_data(
        algo: ConvAlgorithm,
        workspace: Option<&mut Self::Workspace>,
        geometry: &ConvGeometry,
        data_gradient: &mut Self::Storage,
        gradient_input: &Self::Storage,
        filters: &Self::Storage,
    ) -> Result<(), Error> {
        match algo {
            ConvAlgorithm::Direct => {
                cpu_backward::conv_backward_data_direct(
                    geometry,
                    data_gradient.as_mut_slice()?,
                    gradient_input.as_slice()?,
                    filters.as_slice()?,
                );
                Ok(())
            }
            ConvAlgorithm::Im2ColGemm => cpu_backward::conv_backward_data_gemm(
                geometry,
                gemm_workspace(workspace, algo)?,
                data_gradient.as_mut_slice()?,
                gradient_input.as_slice()?,
                filters.as_slice()?,
            ),
        }
    }

    fn conv_backward_filter(
        algo: ConvAlgorithm,
        workspace: Option<&mut Self::Workspace>,
        geometry: &ConvGeometry,
        filters_gradient: &mut Self::Storage,
        gradient_input: &Self::Storage,
        data: &Self::Storage,
    ) -> Result<(), Error> {
        match algo {
            ConvAlgorithm::Direct => {
                cpu_backward::conv_backward_filter_direct(
                    geometry,
                    filters_gradient.as_mut_slice()?,
                    gradient_input.as_slice()?,
                    data.as_slice()?,
                );
                Ok(())
            }
            ConvAlgorithm::Im2ColGemm => cpu_backward::conv_backward_filter_gemm(
                geometry,
                gemm_workspace(workspace, algo)?,
                filters_gradient.as_mut_slice()?,
                gradient_input.as_slice()?,
                data.as_slice()?,
            ),
        }
    }

    fn max_pool_forward(geometry: &PoolGeometry, dest: &mut Self::Storage, src: &Self::Storage) -> Result<(), Error> {
        cpu_ops::max_pool_forward(geometry, dest.as_mut_slice()?, src.as_slice()?);
        Ok(())
    }

    fn max_pool_backward(
        geometry: &PoolGeometry,
        grad: &mut Self::Storage,
        gradient_input: &Self::Storage,
        dest: &Self::Storage,
        src: &Self::Storage,
    ) -> Result<(), Error> {
        cpu_backward::max_pool_backward(
            geometry,
            grad.as_mut_slice()?,
            gradient_input.as_slice()?,
            dest.as_slice()?,
            src.as_slice()?,
        );
        Ok(())
    }

    fn softmax(x: &mut Self::Storage, layout: &Layout) -> Result<(), Error> {
        cpu_ops::softmax(x.view4_mut(layout)?);
        Ok(())
    }

    fn softmax_backward(grad: &mut Self::Storage, dest: &Self::Storage, layout: &Layout) -> Result<(), Error> {
        cpu_backward::softmax_backward(grad.view4_mut(layout)?, dest.view4(layout)?);
        Ok(())
    }

    fn sigmoid(x: &mut Self::Storage) -> Result<(), Error> {
        cpu_ops::sigmoid(x.get_data_mut());
        Ok(())
    }

    fn sigmoid_backward(grad: &mut Self::Storage, dest: &Self::Storage) -> Result<(), Error> {
        cpu_backward::sigmoid_backward(grad.get_data_mut(), dest.get_data())
    }

    fn relu(x: &mut Self::Storage) -> Result<(), Error> {
        cpu_ops::relu(x.get_data_mut());
        Ok(())
    }

    fn relu_backward(grad: &mut Self::Storage, dest: &Self::Storage) -> Result<(), Error> {
        cpu_backward::relu_backward(grad.get_data_mut(), dest.get_data())
    }

    fn tanh(x: &mut Self::Storage) -> Result<(), Error> {
        cpu_ops::tanh(x.get_data_mut());
        Ok(())
    }

    fn tanh_backward(grad: &mut Self::Storage, dest: &Self::Storage) -> Result<(), Error> {
        cpu_backward::tanh_backward(grad.get_data_mut(), dest.get_data())
    }
}
