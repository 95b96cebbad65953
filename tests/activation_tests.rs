use approx::assert_relative_eq;
use rust_dnn_lib::test_utils::{assert_tensors_close, check_gradient, dot};
use rust_dnn_lib::{ops, CpuBackend, Error, Tensor};

type T = Tensor<CpuBackend>;
type Forward = fn(&T, &T) -> Result<(), Error>;
type Backward = fn(&T, &T, &T) -> Result<(), Error>;

const PAIRS: [(&str, Forward, Backward); 4] = [
    ("softmax", ops::softmax, ops::softmax_gradient),
    ("sigmoid", ops::sigmoid, ops::sigmoid_gradient),
    ("relu", ops::relu, ops::relu_gradient),
    ("tanh", ops::tanh, ops::tanh_gradient),
];

/// Values bounded away from zero so relu's kink never sits inside a finite difference.
fn away_from_zero(shape: [usize; 4]) -> Result<T, Error> {
    let len: usize = shape.iter().product();
    let values = (0..len)
        .map(|i| {
            let magnitude = 0.2 + ((i * 7) % 13) as f32 * 0.1;
            if i % 3 == 0 {
                -magnitude
            } else {
                magnitude
            }
        })
        .collect();
    T::from_vec(values, shape)
}

#[test]
fn test_softmax_normalises_across_channels() -> Result<(), Error> {
    let _ = env_logger::builder().is_test(true).try_init();
    let src = T::random_normal([2, 5, 3, 2], 0.0, 3.0)?;
    let dest = T::zeros(src.shape())?;
    ops::softmax(&dest, &src)?;

    let host = dest.host()?;
    let layout = dest.layout();
    for n in 0..2 {
        for r in 0..3 {
            for c in 0..2 {
                let sum: f32 = (0..5).map(|k| host[layout.offset(n, k, r, c)]).sum();
                assert_relative_eq!(sum, 1.0, epsilon = 1e-5);
            }
        }
    }
    assert!(host.iter().all(|&p| p > 0.0 && p <= 1.0));
    Ok(())
}

#[test]
fn test_softmax_is_stable_for_large_inputs() -> Result<(), Error> {
    let src = T::from_vec(vec![1000.0, 1001.0, 1002.0], [1, 3, 1, 1])?;
    let dest = T::zeros(src.shape())?;
    ops::softmax(&dest, &src)?;
    let host = dest.host()?;
    assert!(host.iter().all(|v| v.is_finite()));
    assert_relative_eq!(host[2], 0.665_240_94, epsilon = 1e-5);
    Ok(())
}

#[test]
fn test_in_place_forward_matches_out_of_place() -> Result<(), Error> {
    for (name, forward, _) in PAIRS {
        let src = away_from_zero([2, 3, 2, 2])?;
        let dest = T::zeros(src.shape())?;
        forward(&dest, &src)?;

        let in_place = src.duplicate()?;
        forward(&in_place, &in_place)?;
        assert_tensors_close(&in_place, &dest, 1e-6);

        // Out of place leaves the source alone.
        assert_tensors_close(&src, &away_from_zero([2, 3, 2, 2])?, 0.0);
        log::debug!("{} in-place check passed", name);
    }
    Ok(())
}

#[test]
fn test_gradients_match_numerical() -> Result<(), Error> {
    for (name, forward, backward) in PAIRS {
        let src = away_from_zero([2, 4, 2, 3])?;
        let gi = T::random_normal(src.shape(), 0.0, 1.0)?;
        let dest = T::zeros(src.shape())?;
        forward(&dest, &src)?;
        let grad = T::zeros(src.shape())?;
        backward(&grad, &dest, &gi)?;

        let objective = |s: &T| -> Result<f32, Error> {
            let out = T::zeros(s.shape())?;
            forward(&out, s)?;
            dot(&out, &gi)
        };
        check_gradient(objective, &src, &grad.host()?, 1e-3, 1e-2)
            .map_err(|e| Error::InternalLogicError(format!("{}: {}", name, e)))?;
    }
    Ok(())
}

#[test]
fn test_gradient_in_place_over_gradient_input() -> Result<(), Error> {
    for (_, forward, backward) in PAIRS {
        let src = away_from_zero([1, 3, 2, 2])?;
        let dest = T::zeros(src.shape())?;
        forward(&dest, &src)?;
        let gi = T::random_normal(src.shape(), 0.0, 1.0)?;

        let separate = T::zeros(src.shape())?;
        backward(&separate, &dest, &gi)?;
        backward(&gi, &dest, &gi)?;
        assert_tensors_close(&gi, &separate, 1e-6);
    }
    Ok(())
}

#[test]
fn test_relu_gradient_masks_non_positive_outputs() -> Result<(), Error> {
    let src = T::from_vec(vec![-1.0, 0.0, 2.0, 3.0], [1, 1, 2, 2])?;
    let dest = T::zeros(src.shape())?;
    ops::relu(&dest, &src)?;
    let gi = T::from_vec(vec![5.0; 4], [1, 1, 2, 2])?;
    let grad = T::from_vec(vec![f32::NAN; 4], [1, 1, 2, 2])?;
    ops::relu_gradient(&grad, &dest, &gi)?;
    assert_eq!(grad.host()?, vec![0.0, 0.0, 5.0, 5.0]);
    Ok(())
}

#[test]
fn test_activation_errors() -> Result<(), Error> {
    let src = T::zeros([1, 2, 2, 2])?;
    let wrong = T::zeros([1, 2, 2, 1])?;
    for (_, forward, backward) in PAIRS {
        assert!(matches!(forward(&wrong, &src), Err(Error::ShapeMismatch { .. })));
        let dest = T::zeros(src.shape())?;
        forward(&dest, &src)?;
        assert!(matches!(backward(&dest, &dest, &src), Err(Error::AliasingViolation { .. })));
        assert!(matches!(backward(&wrong, &dest, &src), Err(Error::ShapeMismatch { .. })));
    }
    Ok(())
}
