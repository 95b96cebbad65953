use rust_dnn_lib::test_utils::{assert_tensor_close, assert_tensors_close, check_gradient, dot};
use rust_dnn_lib::{
    AlgoPreference, ConvAlgorithm, CpuBackend, EngineConfig, Error, Tensor, TensorConv,
};

type T = Tensor<CpuBackend>;

fn seq(shape: [usize; 4]) -> Result<T, Error> {
    let len = shape.iter().product();
    T::from_vec((1..=len).map(|i| i as f32).collect(), shape)
}

fn conv_with(preference: AlgoPreference) -> TensorConv<CpuBackend> {
    TensorConv::with_config(EngineConfig::default().with_preference(preference))
}

/// `dot(conv(data, filters), gradient_input)` with a freshly configured operator.
fn conv_objective(data: &T, filters: &T, gradient_input: &T, stride: (usize, usize)) -> Result<f32, Error> {
    let mut conv = TensorConv::<CpuBackend>::new();
    conv.setup(data, filters, stride.0, stride.1)?;
    let output = T::zeros([0, 0, 0, 0])?;
    conv.forward(&output, data, filters)?;
    dot(&output, gradient_input)
}

#[test]
fn test_forward_same_padding_and_stride() -> Result<(), Error> {
    let data = seq([1, 1, 3, 3])?;
    let ones = T::from_vec(vec![1.0; 9], [1, 1, 3, 3])?;
    let output = T::zeros([0, 0, 0, 0])?;

    let mut conv = TensorConv::<CpuBackend>::new();
    conv.setup(&data, &ones, 1, 1)?;
    conv.forward(&output, &data, &ones)?;
    assert_eq!(output.shape(), [1, 1, 3, 3]);
    assert_tensor_close(&output, &[12.0, 21.0, 16.0, 27.0, 45.0, 33.0, 24.0, 39.0, 28.0], 1e-5);

    conv.setup(&data, &ones, 2, 2)?;
    conv.forward(&output, &data, &ones)?;
    assert_eq!(output.shape(), [1, 1, 2, 2]);
    assert_tensor_close(&output, &[12.0, 16.0, 24.0, 28.0], 1e-5);
    Ok(())
}

#[test]
fn test_forward_even_filter_pads_bottom_right() -> Result<(), Error> {
    let data = seq([1, 1, 3, 3])?;
    let filters = T::from_vec(vec![1.0, 2.0, 3.0, 4.0], [1, 1, 2, 2])?;
    let output = T::zeros([1, 1, 3, 3])?;

    let mut conv = TensorConv::<CpuBackend>::new();
    conv.setup(&data, &filters, 1, 1)?;
    conv.forward(&output, &data, &filters)?;
    assert_tensor_close(&output, &[37.0, 47.0, 21.0, 67.0, 77.0, 33.0, 23.0, 26.0, 9.0], 1e-5);
    Ok(())
}

#[test]
fn test_output_shape_for_strided_multichannel_input() -> Result<(), Error> {
    let data = T::random_normal([3, 4, 8, 8], 0.0, 1.0)?;
    let filters = T::random_normal([5, 4, 3, 3], 0.0, 1.0)?;
    let output = T::zeros([1, 1, 1, 1])?;

    let mut conv = TensorConv::<CpuBackend>::new();
    conv.setup(&data, &filters, 2, 2)?;
    assert_eq!(conv.output_shape(), Some([3, 5, 4, 4]));
    conv.forward(&output, &data, &filters)?;
    assert_eq!(output.shape(), [3, 5, 4, 4]);
    Ok(())
}

#[test]
fn test_gemm_and_direct_agree_on_every_pass() -> Result<(), Error> {
    let data = T::random_normal([2, 3, 7, 6], 0.0, 1.0)?;
    let filters = T::random_normal([4, 3, 3, 2], 0.0, 1.0)?;

    let mut gemm = conv_with(AlgoPreference::default());
    let mut direct = conv_with(AlgoPreference::NoWorkspace);
    gemm.setup(&data, &filters, 2, 1)?;
    direct.setup(&data, &filters, 2, 1)?;
    assert_eq!(gemm.algorithms(), Some([ConvAlgorithm::Im2ColGemm; 3]));
    assert_eq!(direct.algorithms(), Some([ConvAlgorithm::Direct; 3]));

    let (out_a, out_b) = (T::zeros([0, 0, 0, 0])?, T::zeros([0, 0, 0, 0])?);
    gemm.forward(&out_a, &data, &filters)?;
    direct.forward(&out_b, &data, &filters)?;
    assert_tensors_close(&out_a, &out_b, 1e-4);

    let gi = T::random_normal(out_a.shape(), 0.0, 1.0)?;
    let (dg_a, dg_b) = (T::zeros(data.shape())?, T::zeros(data.shape())?);
    gemm.get_gradient_for_data(&gi, &filters, &dg_a)?;
    direct.get_gradient_for_data(&gi, &filters, &dg_b)?;
    assert_tensors_close(&dg_a, &dg_b, 1e-4);

    let (fg_a, fg_b) = (T::zeros(filters.shape())?, T::zeros(filters.shape())?);
    gemm.get_gradient_for_filters(&gi, &data, &fg_a)?;
    direct.get_gradient_for_filters(&gi, &data, &fg_b)?;
    assert_tensors_close(&fg_a, &fg_b, 1e-4);
    Ok(())
}

#[test]
fn test_data_gradient_matches_numerical() -> Result<(), Error> {
    let data = T::random_normal([2, 2, 5, 5], 0.0, 1.0)?;
    let filters = T::random_normal([3, 2, 3, 3], 0.0, 1.0)?;
    let stride = (2, 2);

    let mut conv = TensorConv::<CpuBackend>::new();
    conv.setup(&data, &filters, stride.0, stride.1)?;
    let out_shape = conv.output_shape().ok_or(Error::EmptyTensor)?;
    let gi = T::random_normal(out_shape, 0.0, 1.0)?;
    let grad = T::zeros(data.shape())?;
    conv.get_gradient_for_data(&gi, &filters, &grad)?;

    check_gradient(
        |d: &T| conv_objective(d, &filters, &gi, stride),
        &data,
        &grad.host()?,
        1e-2,
        1e-2,
    )
}

#[test]
fn test_filter_gradient_matches_numerical() -> Result<(), Error> {
    let data = T::random_normal([2, 2, 6, 5], 0.0, 1.0)?;
    let filters = T::random_normal([2, 2, 2, 3], 0.0, 1.0)?;
    let stride = (1, 2);

    let mut conv = TensorConv::<CpuBackend>::new();
    conv.setup(&data, &filters, stride.0, stride.1)?;
    let out_shape = conv.output_shape().ok_or(Error::EmptyTensor)?;
    let gi = T::random_normal(out_shape, 0.0, 1.0)?;
    let grad = T::zeros(filters.shape())?;
    conv.get_gradient_for_filters(&gi, &data, &grad)?;

    check_gradient(
        |f: &T| conv_objective(&data, f, &gi, stride),
        &filters,
        &grad.host()?,
        1e-2,
        1e-2,
    )
}

#[test]
fn test_data_gradient_accumulates_filter_gradient_assigns() -> Result<(), Error> {
    for preference in [AlgoPreference::default(), AlgoPreference::NoWorkspace] {
        let data = T::random_normal([1, 2, 4, 4], 0.0, 1.0)?;
        let filters = T::random_normal([3, 2, 3, 3], 0.0, 1.0)?;
        let mut conv = conv_with(preference);
        conv.setup(&data, &filters, 1, 1)?;
        let gi = T::random_normal([1, 3, 4, 4], 0.0, 1.0)?;

        let fresh = T::zeros(data.shape())?;
        conv.get_gradient_for_data(&gi, &filters, &fresh)?;
        let primed = T::from_vec(vec![1.0; 32], data.shape())?;
        conv.get_gradient_for_data(&gi, &filters, &primed)?;
        let expected: Vec<f32> = fresh.host()?.iter().map(|g| g + 1.0).collect();
        assert_tensor_close(&primed, &expected, 1e-5);

        let fresh = T::zeros(filters.shape())?;
        conv.get_gradient_for_filters(&gi, &data, &fresh)?;
        let stale = T::from_vec(vec![f32::NAN; 54], filters.shape())?;
        conv.get_gradient_for_filters(&gi, &data, &stale)?;
        assert_tensors_close(&stale, &fresh, 1e-6);
    }
    Ok(())
}

#[test]
fn test_repeated_setup_keeps_plan() -> Result<(), Error> {
    let data = T::zeros([2, 3, 9, 9])?;
    let filters = T::zeros([4, 3, 5, 5])?;
    let mut conv = TensorConv::<CpuBackend>::new();
    conv.setup(&data, &filters, 1, 1)?;
    let (algos, bytes) = (conv.algorithms(), conv.workspace_bytes());
    conv.setup(&T::zeros([2, 3, 9, 9])?, &T::zeros([4, 3, 5, 5])?, 1, 1)?;
    assert_eq!(conv.algorithms(), algos);
    assert_eq!(conv.workspace_bytes(), bytes);

    let (x, w) = (T::random_normal(data.shape(), 0.0, 1.0)?, T::random_normal(filters.shape(), 0.0, 1.0)?);
    let (first, second) = (T::zeros([0, 0, 0, 0])?, T::zeros([0, 0, 0, 0])?);
    conv.forward(&first, &x, &w)?;
    conv.setup(&x, &w, 1, 1)?;
    conv.forward(&second, &x, &w)?;
    assert_tensors_close(&first, &second, 0.0);

    conv.clear();
    assert!(!conv.is_configured());
    assert_eq!(conv.workspace_bytes(), [0; 3]);
    assert!(matches!(
        conv.get_gradient_for_data(&T::zeros([2, 4, 9, 9])?, &filters, &data),
        Err(Error::NotConfigured(_))
    ));
    Ok(())
}

#[test]
fn test_workspace_limit_below_gemm_falls_back_to_direct() -> Result<(), Error> {
    let data = T::zeros([1, 2, 6, 6])?;
    let filters = T::zeros([1, 2, 3, 3])?;
    let needed = 2 * 3 * 3 * 36 * std::mem::size_of::<f32>();

    let mut conv = conv_with(AlgoPreference::WorkspaceLimit(needed - 1));
    conv.setup(&data, &filters, 1, 1)?;
    assert_eq!(conv.algorithms(), Some([ConvAlgorithm::Direct; 3]));

    let mut conv = conv_with(AlgoPreference::WorkspaceLimit(needed));
    conv.setup(&data, &filters, 1, 1)?;
    assert_eq!(conv.algorithms(), Some([ConvAlgorithm::Im2ColGemm; 3]));
    assert_eq!(conv.workspace_bytes(), [needed; 3]);
    Ok(())
}

#[test]
fn test_shape_and_aliasing_errors() -> Result<(), Error> {
    let data = T::random_normal([1, 2, 4, 4], 0.0, 1.0)?;
    let filters = T::random_normal([2, 2, 3, 3], 0.0, 1.0)?;
    let mut conv = TensorConv::<CpuBackend>::new();
    conv.setup(&data, &filters, 1, 1)?;

    let other_data = T::zeros([1, 2, 5, 4])?;
    let out = T::zeros([0, 0, 0, 0])?;
    assert!(matches!(conv.forward(&out, &other_data, &filters), Err(Error::ShapeMismatch { .. })));
    assert!(matches!(conv.forward(&data, &data, &filters), Err(Error::AliasingViolation { .. })));

    let gi = T::zeros([1, 2, 4, 4])?;
    assert!(matches!(
        conv.get_gradient_for_data(&gi, &filters, &gi),
        Err(Error::ShapeMismatch { .. }) | Err(Error::AliasingViolation { .. })
    ));
    let wrong_gi = T::zeros([1, 3, 4, 4])?;
    assert!(matches!(
        conv.get_gradient_for_filters(&wrong_gi, &data, &T::zeros(filters.shape())?),
        Err(Error::ShapeMismatch { .. })
    ));
    Ok(())
}
