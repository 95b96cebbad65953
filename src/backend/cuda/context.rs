// CUDA context management: device initialization, the shared stream, the cuBLAS
// handle and kernel loading.

use crate::config::EngineConfig;
use crate::error::Error;
use cust::context::{Context, CurrentContext};
use cust::device::Device;
use cust::function::Function;
use cust::module::Module;
use cust::stream::{Stream, StreamFlags};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};

use super::kernels;

struct SendSyncRawHandle(cublas_sys::cublasHandle_t);
unsafe impl Send for SendSyncRawHandle {}
unsafe impl Sync for SendSyncRawHandle {}

pub struct CudaContext {
    // Functions borrow from `modules`; they are declared first so they drop first.
    kernels: HashMap<&'static str, Function<'static>>,
    modules: Vec<Arc<Module>>,
    cublas_handle: SendSyncRawHandle,
    stream: Stream,
    device_id: u32,
    pub(crate) _context: Context,
}

lazy_static! {
    static ref GLOBAL_CUDA_CONTEXT: Mutex<Option<Arc<CudaContext>>> = Mutex::new(None);
    static ref CUDA_INIT: Once = Once::new();
}

impl CudaContext {
    fn new(device_id: u32) -> Result<Self, Error> {
        cust::init(cust::CudaFlags::empty())?;
        let device = Device::get_device(device_id)?;
        let context = Context::new(device)?;
        let stream = Stream::new(StreamFlags::DEFAULT, None)?;

        let mut handle = std::ptr::null_mut();
        let status = unsafe { cublas_sys::cublasCreate_v2(&mut handle) };
        if status != cublas_sys::cublasStatus_t::CUBLAS_STATUS_SUCCESS {
            return Err(Error::CublasError(format!(
                "Failed to create cuBLAS handle: {:?}",
                status
            )));
        }

        let mut instance = Self {
            kernels: HashMap::new(),
            modules: Vec::new(),
            cublas_handle: SendSyncRawHandle(handle),
            stream,
            device_id,
            _context: context,
        };
        instance.load_kernels()?;
        log::debug!(
            "CUDA context ready on device {} with kernels {:?}",
            device_id,
            instance.kernels.keys().collect::<Vec<_>>()
        );
        Ok(instance)
    }

    fn load_kernel_module(&mut self, name: &str, ptx: &str, expected_kernels: &[&'static str]) -> Result<(), Error> {
        log::debug!("Loading kernel module: {}", name);
        CurrentContext::set_current(&self._context)?;

        let module = Arc::new(
            Module::from_ptx(ptx, &[])
                .map_err(|e| Error::CudaError(format!("Failed to load module {}: {}", name, e)))?,
        );

        for &kernel_name in expected_kernels {
            let func = module.get_function(kernel_name).map_err(|e| {
                Error::CudaError(format!(
                    "Failed to load kernel '{}' from module '{}': {}",
                    kernel_name, name, e
                ))
            })?;
            // The module is kept alive in `self.modules` for as long as the function.
            let static_func = unsafe { std::mem::transmute::<Function<'_>, Function<'static>>(func) };
            self.kernels.insert(kernel_name, static_func);
        }
        self.modules.push(module);
        Ok(())
    }

    fn load_kernels(&mut self) -> Result<(), Error> {
        for (name, ptx, expected) in kernels::MODULES {
            self.load_kernel_module(name, ptx, expected)?;
        }
        Ok(())
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn get_stream(&self) -> &Stream {
        &self.stream
    }

    pub fn get_cublas_handle(&self) -> cublas_sys::cublasHandle_t {
        self.cublas_handle.0
    }

    pub fn get_kernel(&self, name: &str) -> Option<&Function<'static>> {
        self.kernels.get(name)
    }

    /// Like [`CudaContext::get_kernel`] but reports a missing kernel as an error.
    pub fn kernel(&self, name: &str) -> Result<&Function<'static>, Error> {
        self.get_kernel(name)
            .ok_or_else(|| Error::CudaError(format!("{} not found. Check the kernel sources and build.rs.", name)))
    }
}

impl Drop for CudaContext {
    fn drop(&mut self) {
        log::debug!("Dropping CudaContext for device {}", self.device_id);
        let status = unsafe { cublas_sys::cublasDestroy_v2(self.cublas_handle.0) };
        if status != cublas_sys::cublasStatus_t::CUBLAS_STATUS_SUCCESS {
            log::warn!("cublasDestroy failed with status {:?}", status);
        }
    }
}

/// Initialises the process-wide context on `device_id`. Later calls are no-ops,
/// whatever device they name.
pub fn init_context(device_id: u32) -> Result<(), Error> {
    CUDA_INIT.call_once(|| {
        let mut global_ctx_guard = match GLOBAL_CUDA_CONTEXT.lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::error!("CUDA context mutex was poisoned during initialization");
                return;
            }
        };

        if global_ctx_guard.is_none() {
            log::debug!("Initializing CUDA context for device {}...", device_id);
            match CudaContext::new(device_id) {
                Ok(context) => *global_ctx_guard = Some(Arc::new(context)),
                Err(e) => log::error!("Failed to initialize CUDA context: {}", e),
            }
        }
    });

    let final_check_guard = GLOBAL_CUDA_CONTEXT.lock().map_err(|_| {
        Error::InternalLogicError("CUDA context mutex was poisoned after initialization check".to_string())
    })?;

    if CUDA_INIT.is_completed() && final_check_guard.is_some() {
        Ok(())
    } else {
        Err(Error::CudaError(
            "CUDA context initialization failed or context is not available.".into(),
        ))
    }
}

/// Initialises the context on the device named by `config`.
pub fn init_with_config(config: &EngineConfig) -> Result<(), Error> {
    init_context(config.device_id)
}

pub fn get_global_context() -> Result<Arc<CudaContext>, Error> {
    let global_ctx = GLOBAL_CUDA_CONTEXT
        .lock()
        .map_err(|_| Error::InternalLogicError("CUDA context mutex was poisoned".to_string()))?;

    match global_ctx.as_ref() {
        Some(ctx) => Ok(ctx.clone()),
        None => Err(Error::CudaError(
            "CUDA context not initialized. Call init_context first.".into(),
        )),
    }
}

/// Makes the global context current on the calling thread while held.
pub struct CudaContextGuard {
    _context_arc: Arc<CudaContext>,
}

impl CudaContextGuard {
    pub fn new() -> Result<Self, Error> {
        let context = get_global_context()?;
        CurrentContext::set_current(&context._context)
            .map_err(|e| Error::InternalLogicError(format!("Failed to set current CUDA context: {}", e)))?;
        log::trace!("CUDA context made current on thread {:?}", std::thread::current().id());
        Ok(CudaContextGuard { _context_arc: context })
    }
}
