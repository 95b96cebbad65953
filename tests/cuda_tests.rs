#![cfg(feature = "cuda")]

use rust_dnn_lib::backend::cuda::{init_context, CudaContextGuard};
use rust_dnn_lib::test_utils::assert_tensors_close;
use rust_dnn_lib::{
    ops, AlgoPreference, ConvAlgorithm, CpuBackend, CudaBackend, Device, EngineConfig, Error, MaxPool, Tensor,
    TensorConv,
};
use serial_test::serial;

type Cpu = Tensor<CpuBackend>;
type Gpu = Tensor<CudaBackend>;

const TOLERANCE: f32 = 1e-4;

fn setup() -> Result<CudaContextGuard, Error> {
    let _ = env_logger::builder().is_test(true).try_init();
    init_context(0)?;
    CudaContextGuard::new()
}

fn assert_matches_cpu(gpu: &Gpu, cpu: &Cpu, tol: f32) -> Result<(), Error> {
    assert_tensors_close(&gpu.to_cpu()?, cpu, tol);
    Ok(())
}

#[test]
#[serial]
fn test_cuda_tensor_round_trip() -> Result<(), Error> {
    let _guard = setup()?;
    let cpu = Cpu::random_normal([2, 3, 4, 5], 0.0, 1.0)?;
    let gpu = cpu.to_gpu()?;
    assert_eq!(gpu.device(), Device::Cuda(0));
    assert_eq!(gpu.shape(), cpu.shape());
    assert_matches_cpu(&gpu, &cpu, 0.0)?;

    gpu.set_size(1, 1, 1, 7)?;
    assert_eq!(gpu.host()?, vec![0.0; 7]);
    Ok(())
}

#[test]
#[serial]
fn test_cuda_conv_matches_cpu_for_both_algorithms() -> Result<(), Error> {
    let _guard = setup()?;
    let data = Cpu::random_normal([2, 3, 9, 7], 0.0, 1.0)?;
    let filters = Cpu::random_normal([4, 3, 3, 2], 0.0, 0.5)?;
    let stride = (2, 1);

    let mut cpu_conv = TensorConv::<CpuBackend>::new();
    cpu_conv.setup(&data, &filters, stride.0, stride.1)?;
    let out = Cpu::zeros([0, 0, 0, 0])?;
    cpu_conv.forward(&out, &data, &filters)?;
    let gi = Cpu::random_normal(out.shape(), 0.0, 1.0)?;
    let data_grad = Cpu::from_vec(vec![0.5; data.size()], data.shape())?;
    cpu_conv.get_gradient_for_data(&gi, &filters, &data_grad)?;
    let filters_grad = Cpu::zeros(filters.shape())?;
    cpu_conv.get_gradient_for_filters(&gi, &data, &filters_grad)?;

    for (preference, algo) in [
        (AlgoPreference::default(), ConvAlgorithm::Im2ColGemm),
        (AlgoPreference::NoWorkspace, ConvAlgorithm::Direct),
    ] {
        let (g_data, g_filters, g_gi) = (data.to_gpu()?, filters.to_gpu()?, gi.to_gpu()?);
        let mut conv = TensorConv::<CudaBackend>::with_config(EngineConfig::default().with_preference(preference));
        conv.setup(&g_data, &g_filters, stride.0, stride.1)?;
        assert_eq!(conv.algorithms(), Some([algo; 3]));

        let g_out = Gpu::zeros([0, 0, 0, 0])?;
        conv.forward(&g_out, &g_data, &g_filters)?;
        assert_matches_cpu(&g_out, &out, TOLERANCE)?;

        let g_data_grad = Gpu::from_vec(vec![0.5; data.size()], data.shape())?;
        conv.get_gradient_for_data(&g_gi, &g_filters, &g_data_grad)?;
        assert_matches_cpu(&g_data_grad, &data_grad, TOLERANCE)?;

        let g_filters_grad = Gpu::from_vec(vec![9.0; filters.size()], filters.shape())?;
        conv.get_gradient_for_filters(&g_gi, &g_data, &g_filters_grad)?;
        assert_matches_cpu(&g_filters_grad, &filters_grad, 1e-3)?;
    }
    Ok(())
}

#[test]
#[serial]
fn test_cuda_max_pool_matches_cpu() -> Result<(), Error> {
    let _guard = setup()?;
    let src = Cpu::random_normal([2, 3, 7, 6], 0.0, 1.0)?;
    let mut cpu_pool = MaxPool::<CpuBackend>::new();
    cpu_pool.setup(3, 2, 2, 2)?;
    let dest = Cpu::zeros([0, 0, 0, 0])?;
    cpu_pool.forward(&dest, &src)?;
    let gi = Cpu::random_normal(dest.shape(), 0.0, 1.0)?;
    let grad = Cpu::from_vec(vec![1.0; src.size()], src.shape())?;
    cpu_pool.get_gradient(&gi, &dest, &src, &grad)?;

    let mut pool = MaxPool::<CudaBackend>::new();
    pool.setup(3, 2, 2, 2)?;
    let (g_src, g_gi) = (src.to_gpu()?, gi.to_gpu()?);
    let g_dest = Gpu::zeros([0, 0, 0, 0])?;
    pool.forward(&g_dest, &g_src)?;
    assert_matches_cpu(&g_dest, &dest, 0.0)?;

    let g_grad = Gpu::from_vec(vec![1.0; src.size()], src.shape())?;
    pool.get_gradient(&g_gi, &g_dest, &g_src, &g_grad)?;
    assert_matches_cpu(&g_grad, &grad, TOLERANCE)?;
    Ok(())
}

#[test]
#[serial]
fn test_cuda_max_pool_routes_nan_window_gradient() -> Result<(), Error> {
    let _guard = setup()?;
    let src = Gpu::from_vec(vec![f32::NAN; 8], [1, 2, 2, 2])?;
    let mut pool = MaxPool::<CudaBackend>::new();
    pool.setup(2, 2, 2, 2)?;
    let dest = Gpu::zeros([0, 0, 0, 0])?;
    pool.forward(&dest, &src)?;

    let gi = Gpu::from_vec(vec![3.0, 5.0], [1, 2, 1, 1])?;
    let grad = Gpu::zeros([1, 2, 2, 2])?;
    pool.get_gradient(&gi, &dest, &src, &grad)?;
    assert_eq!(grad.host()?, vec![3.0, 0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0]);
    Ok(())
}

#[test]
#[serial]
fn test_cuda_activations_match_cpu() -> Result<(), Error> {
    let _guard = setup()?;
    let src = Cpu::random_normal([2, 4, 3, 3], 0.0, 2.0)?;
    let gi = Cpu::random_normal(src.shape(), 0.0, 1.0)?;

    type CpuPair = (fn(&Cpu, &Cpu) -> Result<(), Error>, fn(&Cpu, &Cpu, &Cpu) -> Result<(), Error>);
    type GpuPair = (fn(&Gpu, &Gpu) -> Result<(), Error>, fn(&Gpu, &Gpu, &Gpu) -> Result<(), Error>);
    let pairs: [(CpuPair, GpuPair); 4] = [
        ((ops::softmax, ops::softmax_gradient), (ops::softmax, ops::softmax_gradient)),
        ((ops::sigmoid, ops::sigmoid_gradient), (ops::sigmoid, ops::sigmoid_gradient)),
        ((ops::relu, ops::relu_gradient), (ops::relu, ops::relu_gradient)),
        ((ops::tanh, ops::tanh_gradient), (ops::tanh, ops::tanh_gradient)),
    ];

    for ((cpu_fwd, cpu_bwd), (gpu_fwd, gpu_bwd)) in pairs {
        let dest = Cpu::zeros(src.shape())?;
        cpu_fwd(&dest, &src)?;
        let grad = Cpu::zeros(src.shape())?;
        cpu_bwd(&grad, &dest, &gi)?;

        // In place on the device.
        let g_dest = src.to_gpu()?;
        gpu_fwd(&g_dest, &g_dest)?;
        assert_matches_cpu(&g_dest, &dest, 1e-5)?;

        let g_grad = gi.to_gpu()?;
        gpu_bwd(&g_grad, &g_dest, &g_grad)?;
        assert_matches_cpu(&g_grad, &grad, 1e-5)?;
    }
    Ok(())
}

#[test]
#[serial]
fn test_cuda_add_and_bias_gradient_match_cpu() -> Result<(), Error> {
    let _guard = setup()?;
    let dest = Cpu::random_normal([3, 4, 2, 5], 0.0, 1.0)?;
    let bias = Cpu::random_normal([1, 4, 1, 1], 0.0, 1.0)?;
    let g_dest = dest.to_gpu()?;

    ops::add(0.5, &dest, 2.0, &bias)?;
    ops::add(0.5, &g_dest, 2.0, &bias.to_gpu()?)?;
    assert_matches_cpu(&g_dest, &dest, 1e-5)?;

    ops::scale_tensor(&dest, -3.0)?;
    ops::scale_tensor(&g_dest, -3.0)?;
    assert_matches_cpu(&g_dest, &dest, 1e-5)?;

    let grad = Cpu::from_vec(vec![1.0; 4], [1, 4, 1, 1])?;
    let g_grad = grad.to_gpu()?;
    ops::add_conv_bias_gradient(&grad, &dest)?;
    ops::add_conv_bias_gradient(&g_grad, &g_dest)?;
    assert_matches_cpu(&g_grad, &grad, 1e-3)?;

    ops::set_tensor(&g_grad, 2.5)?;
    assert_eq!(g_grad.host()?, vec![2.5; 4]);
    Ok(())
}
