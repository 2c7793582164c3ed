//! Expression assignment over distributed vectors.
//!
//! All tests need a GPU adapter; run them with `cargo test -- --ignored`.

use std::sync::Arc;

use haloconv::config::PlatformOptions;
use haloconv::device::Platform;
use haloconv::{CompilationService, DeviceVector, Expr, GeneralizedStencil, Stencil, StencilError, Transform};

fn setup(devices: usize) -> (Platform, Arc<CompilationService>) {
    (
        Platform::init(PlatformOptions::uniform(devices)).unwrap(),
        Arc::new(CompilationService::new()),
    )
}

#[test]
#[ignore = "Requires GPU"]
fn test_plain_convolution_term() {
    let (platform, service) = setup(2);
    let laplace = Stencil::from_weights(service, platform.queues(), &[1.0f32, -2.0, 1.0], 1).unwrap();
    let x = DeviceVector::from_slice(platform.queues(), &[1.0, 2.0, 4.0, 8.0, 16.0]).unwrap();
    let y = x.like().unwrap();

    y.assign(&laplace * &x).unwrap();
    assert_eq!(y.to_vec().unwrap(), vec![1.0, 1.0, 2.0, 4.0, -8.0]);
}

#[test]
#[ignore = "Requires GPU"]
fn test_explicit_euler_step() {
    let (platform, service) = setup(3);
    let laplace = Stencil::from_weights(service, platform.queues(), &[0.1f32, -0.2, 0.1], 1).unwrap();
    let u = DeviceVector::from_slice(platform.queues(), &[0.0, 0.0, 10.0, 0.0, 0.0, 0.0]).unwrap();
    let next = u.like().unwrap();

    next.assign(&u + &laplace * &u).unwrap();
    let got = next.to_vec().unwrap();
    let expected = [0.0, 1.0, 8.0, 1.0, 0.0, 0.0];
    for (g, e) in got.iter().zip(expected.iter()) {
        assert!((g - e).abs() < 1e-6, "{} vs {}", g, e);
    }
}

#[test]
#[ignore = "Requires GPU"]
fn test_difference_of_terms() {
    let (platform, service) = setup(2);
    let ident = Stencil::from_weights(service.clone(), platform.queues(), &[1.0f32], 0).unwrap();
    let shift = Stencil::from_weights(service, platform.queues(), &[0.0f32, 0.0, 1.0], 1).unwrap();
    let x = DeviceVector::from_slice(platform.queues(), &[1.0, 2.0, 3.0, 4.0]).unwrap();
    let z = DeviceVector::from_slice(platform.queues(), &[10.0; 4]).unwrap();
    let y = x.like().unwrap();

    y.assign(Expr::from(&z) - &ident * &x - &shift * &x).unwrap();
    assert_eq!(y.to_vec().unwrap(), vec![7.0, 5.0, 3.0, 2.0]);
}

#[test]
#[ignore = "Requires GPU"]
fn test_generalized_term() {
    let (platform, service) = setup(2);
    let gs = GeneralizedStencil::from_matrix(service, platform.queues(), 1, 2, 0, &[1.0f32, -1.0]).unwrap();
    let x = DeviceVector::from_slice(platform.queues(), &[0.0, 3.0, 1.0, 1.0]).unwrap();
    let z = DeviceVector::from_slice(platform.queues(), &[1.0; 4]).unwrap();
    let y = x.like().unwrap();

    y.assign(&z + gs.apply(Transform::Fabs, &x)).unwrap();
    assert_eq!(y.to_vec().unwrap(), vec![4.0, 3.0, 1.0, 1.0]);
}

#[test]
#[ignore = "Requires GPU"]
fn test_target_as_vector_term_is_not_copied() {
    let (platform, service) = setup(1);
    let double = Stencil::from_weights(service, platform.queues(), &[2i32], 0).unwrap();
    let x = DeviceVector::from_slice(platform.queues(), &[1, 2, 3]).unwrap();
    let acc = DeviceVector::from_slice(platform.queues(), &[10, 10, 10]).unwrap();

    acc.assign(&acc - &double * &x).unwrap();
    acc.assign(&acc - &double * &x).unwrap();
    assert_eq!(acc.to_vec().unwrap(), vec![6, 2, -2]);
}

#[test]
#[ignore = "Requires GPU"]
fn test_rejected_expressions() {
    let (platform, service) = setup(2);
    let s = Stencil::from_weights(service, platform.queues(), &[1.0f32], 0).unwrap();
    let x = DeviceVector::<f32>::new(platform.queues(), 4).unwrap();
    let z = x.like().unwrap();
    let y = x.like().unwrap();

    let two_vectors = Expr::from(&z) + &x;
    assert!(matches!(y.assign(two_vectors), Err(StencilError::UnsupportedExpression(_))));

    let negated = &s * &x - &z;
    assert!(matches!(y.assign(negated), Err(StencilError::UnsupportedExpression(_))));

    // Output aliasing the convolution input.
    assert!(matches!(y.assign(&s * &y), Err(StencilError::Device(_))));
}
