use rust_dnn_lib::{have_same_dimensions, is_same_object, CpuBackend, Device, Error, Tensor, TensorDescriptor};

type T = Tensor<CpuBackend>;

#[test]
fn test_any_zero_dimension_collapses_shape() -> Result<(), Error> {
    let t = T::zeros([3, 0, 2, 2])?;
    assert_eq!(t.shape(), [0, 0, 0, 0]);
    assert!(t.is_empty());

    let mut desc = TensorDescriptor::new();
    desc.set_size(2, 3, 0, 5);
    assert_eq!(desc.get_size(), (0, 0, 0, 0));
    assert_eq!(desc.element_count(), 0);
    Ok(())
}

#[test]
fn test_set_size_keeps_contents_when_count_is_unchanged() -> Result<(), Error> {
    let t = T::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [1, 2, 3, 1])?;
    t.set_size(1, 1, 2, 3)?;
    assert_eq!(t.shape(), [1, 1, 2, 3]);
    assert_eq!(t.host()?, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

    t.set_size(2, 2, 2, 2)?;
    assert_eq!(t.size(), 16);
    assert_eq!(t.host()?, vec![0.0; 16]);
    assert_eq!(t.layout().strides, [8, 4, 2, 1]);
    Ok(())
}

#[test]
fn test_handles_share_storage() -> Result<(), Error> {
    let a = T::from_vec(vec![1.0, 2.0], [1, 1, 1, 2])?;
    let b = a.clone();
    b.set_host(&[3.0, 4.0])?;
    assert_eq!(a.host()?, vec![3.0, 4.0]);
    assert!(is_same_object(&a, &b));
    assert_eq!(a.id(), b.id());

    let c = a.duplicate()?;
    assert!(!is_same_object(&a, &c));
    assert!(have_same_dimensions(&a, &c));
    assert_ne!(a.id(), c.id());
    assert!(!have_same_dimensions(&a, &T::zeros([1, 1, 2, 1])?));
    Ok(())
}

#[test]
fn test_constructor_validation() -> Result<(), Error> {
    assert!(matches!(T::from_vec(vec![1.0; 5], [1, 1, 2, 2]), Err(Error::ShapeMismatch { .. })));
    assert!(matches!(T::random_uniform([1, 1, 2, 2], 1.0, 1.0), Err(Error::InvalidOperation(_))));

    let u = T::random_uniform([2, 3, 4, 5], -0.5, 0.5)?;
    assert!(u.host()?.iter().all(|&v| (-0.5..0.5).contains(&v)));
    assert_eq!(u.device(), Device::Cpu);
    assert_eq!((u.num_samples(), u.k(), u.nr(), u.nc()), (2, 3, 4, 5));
    Ok(())
}
