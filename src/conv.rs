//! Stateful 2D convolution operator with per-pass algorithm and workspace caching.

use crate::algorithm::{select_algorithm, ConvAlgorithm, ConvGeometry, ConvPass};
use crate::backend::Backend;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::tensor::{is_same_object, Tensor};

/// Shapes and strides a plan was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SetupKey {
    data: [usize; 4],
    filters: [usize; 4],
    stride: (usize, usize),
}

/// The algorithm chosen for one pass and the workspace it owns.
#[derive(Debug)]
struct PassPlan<B: Backend> {
    algo: ConvAlgorithm,
    workspace_bytes: usize,
    workspace: Option<B::Workspace>,
}

impl<B: Backend> PassPlan<B> {
    fn derive(pass: ConvPass, geometry: &ConvGeometry, config: &EngineConfig) -> Result<Self, Error> {
        let algo = select_algorithm(pass, geometry, config.conv_preference);
        let elements = algo.workspace_elements(pass, geometry);
        let workspace = if elements > 0 {
            Some(B::alloc_workspace(elements)?)
        } else {
            None
        };
        Ok(Self {
            algo,
            workspace_bytes: algo.workspace_bytes(pass, geometry),
            workspace,
        })
    }
}

#[derive(Debug)]
struct ConvPlan<B: Backend> {
    key: SetupKey,
    geometry: ConvGeometry,
    forward: PassPlan<B>,
    backward_data: PassPlan<B>,
    backward_filter: PassPlan<B>,
}

impl<B: Backend> ConvPlan<B> {
    fn passes(&self) -> [&PassPlan<B>; 3] {
        [&self.forward, &self.backward_data, &self.backward_filter]
    }
}

fn expect_shape<B: Backend>(tensor: &Tensor<B>, expected: [usize; 4]) -> Result<(), Error> {
    let actual = tensor.shape();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        })
    }
}

/// Cross-correlation of a bank of filters over rank-4 data.
///
/// The operator is configured with [`TensorConv::setup`] against concrete
/// shapes; that call picks an algorithm for each of the forward, backward-data
/// and backward-filter passes and allocates the workspace each needs. The plan
/// is reused until `setup` is called with different shapes or [`TensorConv::clear`]
/// drops it.
///
/// ```rust
/// use rust_dnn_lib::{CpuBackend, Tensor, TensorConv};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let data = Tensor::<CpuBackend>::random_normal([2, 3, 8, 8], 0.0, 1.0)?;
///     let filters = Tensor::<CpuBackend>::random_normal([4, 3, 3, 3], 0.0, 0.1)?;
///     let output = Tensor::<CpuBackend>::zeros([0, 0, 0, 0])?;
///
///     let mut conv = TensorConv::<CpuBackend>::new();
///     conv.setup(&data, &filters, 2, 2)?;
///     conv.forward(&output, &data, &filters)?;
///     assert_eq!(output.shape(), [2, 4, 4, 4]);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct TensorConv<B: Backend> {
    config: EngineConfig,
    plan: Option<ConvPlan<B>>,
}

impl<B: Backend> Default for TensorConv<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> TensorConv<B> {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self { config, plan: None }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Derives the geometry and per-pass algorithms for `data` and `filters`.
    ///
    /// # Errors
    /// * [`Error::InvalidOperation`] for a zero stride or `filters.k() != data.k()`.
    /// * [`Error::EmptyTensor`] if either tensor has no elements.
    /// * [`Error::UnsupportedConfiguration`] if the backend cannot run this geometry.
    /// * [`Error::OutOfMemory`] if a workspace cannot be allocated.
    ///
    /// On error the operator is left unconfigured.
    pub fn setup(
        &mut self,
        data: &Tensor<B>,
        filters: &Tensor<B>,
        stride_y: usize,
        stride_x: usize,
    ) -> Result<(), Error> {
        let key = SetupKey {
            data: data.shape(),
            filters: filters.shape(),
            stride: (stride_y, stride_x),
        };
        if self.plan.as_ref().is_some_and(|plan| plan.key == key) {
            log::debug!("conv setup for {:?} reuses the cached plan", key);
            return Ok(());
        }

        // The previous workspaces go before the new ones are allocated.
        self.plan = None;

        let geometry = ConvGeometry::new(data.layout(), filters.layout(), stride_y, stride_x)?;
        B::check_conv_support(&geometry)?;

        let plan = ConvPlan {
            key,
            geometry,
            forward: PassPlan::derive(ConvPass::Forward, &geometry, &self.config)?,
            backward_data: PassPlan::derive(ConvPass::BackwardData, &geometry, &self.config)?,
            backward_filter: PassPlan::derive(ConvPass::BackwardFilter, &geometry, &self.config)?,
        };
        log::debug!(
            "conv configured: data {:?} filters {:?} stride {:?} -> output {:?}; algorithms {:?}/{:?}/{:?}, workspace bytes {}/{}/{}",
            key.data,
            key.filters,
            key.stride,
            geometry.output.dims,
            plan.forward.algo,
            plan.backward_data.algo,
            plan.backward_filter.algo,
            plan.forward.workspace_bytes,
            plan.backward_data.workspace_bytes,
            plan.backward_filter.workspace_bytes,
        );
        self.plan = Some(plan);
        Ok(())
    }

    /// Releases every workspace and returns to the unconfigured state.
    pub fn clear(&mut self) {
        if self.plan.take().is_some() {
            log::debug!("conv plan released");
        }
    }

    pub fn is_configured(&self) -> bool {
        self.plan.is_some()
    }

    /// Shape `forward` gives its output, once configured.
    pub fn output_shape(&self) -> Option<[usize; 4]> {
        self.plan.as_ref().map(|plan| plan.geometry.output.dims)
    }

    /// Selected algorithms in forward, backward-data, backward-filter order.
    pub fn algorithms(&self) -> Option<[ConvAlgorithm; 3]> {
        self.plan.as_ref().map(|plan| plan.passes().map(|p| p.algo))
    }

    /// Workspace held for each pass, in bytes, in the same order as [`TensorConv::algorithms`].
    /// All zero when unconfigured.
    pub fn workspace_bytes(&self) -> [usize; 3] {
        self.plan
            .as_ref()
            .map_or([0; 3], |plan| plan.passes().map(|p| p.workspace_bytes))
    }

    fn plan_mut(&mut self, op: &str) -> Result<&mut ConvPlan<B>, Error> {
        self.plan
            .as_mut()
            .ok_or_else(|| Error::NotConfigured(format!("TensorConv::{} called before setup", op)))
    }

    /// Resizes `output` and writes the convolution of `filters` over `data` into it.
    pub fn forward(&mut self, output: &Tensor<B>, data: &Tensor<B>, filters: &Tensor<B>) -> Result<(), Error> {
        let plan = self.plan_mut("forward")?;
        expect_shape(data, plan.key.data)?;
        expect_shape(filters, plan.key.filters)?;
        if is_same_object(output, data) {
            return Err(Error::aliasing("conv_forward", "output", "data"));
        }
        if is_same_object(output, filters) {
            return Err(Error::aliasing("conv_forward", "output", "filters"));
        }

        let [n, k, nr, nc] = plan.geometry.output.dims;
        output.set_size(n, k, nr, nc)?;

        log::trace!("conv forward with {:?}", plan.forward.algo);
        B::conv_forward(
            plan.forward.algo,
            plan.forward.workspace.as_mut(),
            &plan.geometry,
            &mut output.data_mut(),
            &data.data(),
            &filters.data(),
        )
    }

    /// Adds the gradient of `dot(output, gradient_input)` with respect to the data into `data_gradient`.
    pub fn get_gradient_for_data(
        &mut self,
        gradient_input: &Tensor<B>,
        filters: &Tensor<B>,
        data_gradient: &Tensor<B>,
    ) -> Result<(), Error> {
        let plan = self.plan_mut("get_gradient_for_data")?;
        expect_shape(gradient_input, plan.geometry.output.dims)?;
        expect_shape(filters, plan.key.filters)?;
        expect_shape(data_gradient, plan.key.data)?;
        if is_same_object(data_gradient, filters) {
            return Err(Error::aliasing("conv_gradient_for_data", "data_gradient", "filters"));
        }
        if is_same_object(data_gradient, gradient_input) {
            return Err(Error::aliasing("conv_gradient_for_data", "data_gradient", "gradient_input"));
        }

        log::trace!("conv backward-data with {:?}", plan.backward_data.algo);
        B::conv_backward_data(
            plan.backward_data.algo,
            plan.backward_data.workspace.as_mut(),
            &plan.geometry,
            &mut data_gradient.data_mut(),
            &gradient_input.data(),
            &filters.data(),
        )
    }

    /// Assigns the gradient of `dot(output, gradient_input)` with respect to the filters to `filters_gradient`.
    pub fn get_gradient_for_filters(
        &mut self,
        gradient_input: &Tensor<B>,
        data: &Tensor<B>,
        filters_gradient: &Tensor<B>,
    ) -> Result<(), Error> {
        let plan = self.plan_mut("get_gradient_for_filters")?;
        expect_shape(gradient_input, plan.geometry.output.dims)?;
        expect_shape(data, plan.key.data)?;
        expect_shape(filters_gradient, plan.key.filters)?;
        if is_same_object(filters_gradient, data) {
            return Err(Error::aliasing("conv_gradient_for_filters", "filters_gradient", "data"));
        }
        if is_same_object(filters_gradient, gradient_input) {
            return Err(Error::aliasing(
                "conv_gradient_for_filters",
                "filters_gradient",
                "gradient_input",
            ));
        }

        log::trace!("conv backward-filter with {:?}", plan.backward_filter.algo);
        B::conv_backward_filter(
            plan.backward_filter.algo,
            plan.backward_filter.workspace.as_mut(),
            &plan.geometry,
            &mut filters_gradient.data_mut(),
            &gradient_input.data(),
            &data.data(),
        )
    }
}
