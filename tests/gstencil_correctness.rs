//! Numerical correctness of the generalized (banded matrix) filter.
//!
//! These tests verify:
//! - Results match a host reference for several transforms
//! - Multi-device results match the single-device result
//! - Partitions whose last work-group is partial
//! - Local memory exhaustion is reported instead of falling back
//!
//! All tests need a GPU adapter; run them with `cargo test -- --ignored`.

use std::sync::Arc;

use haloconv::config::{DeviceSpec, PlatformOptions};
use haloconv::device::Platform;
use haloconv::{CompilationService, DeviceVector, GeneralizedStencil, MatrixDescriptor, StencilError, Transform};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Transforms run in single precision on the device.
const EPSILON: f64 = 1e-4;

fn assert_approx_eq(a: &[f32], b: &[f64], tol: f64) {
    assert_eq!(a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        assert!((*x as f64 - y).abs() <= tol, "Mismatch at {}: {} vs {}", i, x, y);
    }
}

/// `y[i] = sum_r f(sum_c m[r][c] * x[clamp(i + c - center)])`.
fn reference(x: &[f32], matrix: &MatrixDescriptor<f32>, transform: Transform) -> Vec<f64> {
    let last = x.len() as isize - 1;
    let center = matrix.center() as isize;
    (0..x.len() as isize)
        .map(|i| {
            matrix
                .data()
                .chunks_exact(matrix.cols())
                .map(|row| {
                    let sum: f64 = row
                        .iter()
                        .enumerate()
                        .map(|(c, w)| *w as f64 * x[(i + c as isize - center).clamp(0, last) as usize] as f64)
                        .sum();
                    transform.eval(sum)
                })
                .sum()
        })
        .collect()
}

fn random_matrix(rng: &mut SmallRng, rows: usize, cols: usize, center: usize) -> MatrixDescriptor<f32> {
    let data = (0..rows * cols).map(|_| rng.gen_range(-0.5..0.5)).collect();
    MatrixDescriptor::new(rows, cols, center, data).unwrap()
}

fn run(platform: &Platform, matrix: &MatrixDescriptor<f32>, transform: Transform, x: &[f32], sizes: &[usize]) -> Vec<f32> {
    let service = Arc::new(CompilationService::new());
    let filter = GeneralizedStencil::new(service, platform.queues(), matrix.clone()).unwrap();
    let xv = DeviceVector::from_slice_partitioned(platform.queues(), x, sizes).unwrap();
    let yv = xv.like().unwrap();
    filter.convolve(transform, &xv, &yv, 0.0, 1.0).unwrap();
    yv.to_vec().unwrap()
}

#[test]
#[ignore = "Requires GPU"]
fn test_matches_reference_for_transforms() {
    let mut rng = SmallRng::seed_from_u64(21);
    let x: Vec<f32> = (0..257).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let matrix = random_matrix(&mut rng, 3, 5, 2);

    for transform in [Transform::Cos, Transform::Fabs, Transform::Exp, Transform::Tanh] {
        let expected = reference(&x, &matrix, transform);
        for devices in [1, 3] {
            let platform = Platform::init(PlatformOptions::uniform(devices)).unwrap();
            let sizes = haloconv::vector::even_partition(x.len(), devices);
            assert_approx_eq(&run(&platform, &matrix, transform, &x, &sizes), &expected, EPSILON);
        }
    }
}

#[test]
#[ignore = "Requires GPU"]
fn test_asymmetric_halo() {
    let mut rng = SmallRng::seed_from_u64(4);
    let x: Vec<f32> = (0..90).map(|_| rng.gen_range(0.0..2.0)).collect();
    let matrix = random_matrix(&mut rng, 2, 4, 3);
    assert_eq!(matrix.left_halo(), 3);
    assert_eq!(matrix.right_halo(), 0);

    let platform = Platform::init(PlatformOptions::uniform(4)).unwrap();
    let expected = reference(&x, &matrix, Transform::Cbrt);
    let sizes = haloconv::vector::even_partition(x.len(), 4);
    assert_approx_eq(&run(&platform, &matrix, Transform::Cbrt, &x, &sizes), &expected, EPSILON);
}

#[test]
#[ignore = "Requires GPU"]
fn test_blend_accumulates() {
    let platform = Platform::init(PlatformOptions::uniform(2)).unwrap();
    let service = Arc::new(CompilationService::new());
    let filter =
        GeneralizedStencil::from_matrix(service, platform.queues(), 1, 3, 1, &[1.0f32, 0.0, -1.0]).unwrap();

    let x = DeviceVector::from_slice(platform.queues(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
    let y = DeviceVector::from_slice(platform.queues(), &[1.0; 6]).unwrap();
    filter.convolve(Transform::Fabs, &x, &y, 2.0, 0.5).unwrap();
    // |x[i-1] - x[i+1]| is 1 at the clamped ends and 2 elsewhere.
    assert_eq!(y.to_vec().unwrap(), vec![2.5, 3.0, 3.0, 3.0, 3.0, 2.5]);
}

#[test]
#[ignore = "Requires GPU"]
fn test_two_row_sqrt() {
    let platform = Platform::init(PlatformOptions::uniform(2)).unwrap();
    let service = Arc::new(CompilationService::new());
    let filter =
        GeneralizedStencil::from_matrix(service, platform.queues(), 2, 2, 0, &[1.0f32, 1.0, 0.0, 1.0]).unwrap();
    let x = DeviceVector::from_slice(platform.queues(), &[1.0f32, 4.0, 9.0, 16.0]).unwrap();
    let y = x.like().unwrap();
    filter.convolve(Transform::Sqrt, &x, &y, 0.0, 1.0).unwrap();

    let got = y.to_vec().unwrap();
    let expected = [5.0f32.sqrt() + 2.0, 13.0f32.sqrt() + 3.0, 25.0f32.sqrt() + 4.0, 32.0f32.sqrt() + 4.0];
    for (g, e) in got.iter().zip(expected.iter()) {
        assert!((g - e).abs() < 1e-5, "{} vs {}", g, e);
    }
}

// =============================================================================
// Partial Last Work-Group
// =============================================================================

#[test]
#[ignore = "Requires GPU"]
fn test_partial_group_single_device() {
    let platform = Platform::init(PlatformOptions::uniform(1)).unwrap();
    let service = Arc::new(CompilationService::new());
    let filter = GeneralizedStencil::from_matrix(service, platform.queues(), 1, 3, 2, &[1.0f32; 3]).unwrap();
    assert_eq!(filter.work_group_size(Transform::Fabs, 0).unwrap(), 256);

    let x: Vec<f32> = (0..257).map(|i| i as f32).collect();
    let xv = DeviceVector::from_slice(platform.queues(), &x).unwrap();
    let yv = xv.like().unwrap();
    filter.convolve(Transform::Fabs, &xv, &yv, 0.0, 1.0).unwrap();
    let y = yv.to_vec().unwrap();
    assert_eq!(y[255], 762.0);
    assert_eq!(y[256], 765.0);
}

#[test]
#[ignore = "Requires GPU"]
fn test_partial_group_two_devices() {
    let platform = Platform::init(PlatformOptions::uniform(2)).unwrap();
    let matrix = MatrixDescriptor::new(1, 3, 2, vec![1.0f32; 3]).unwrap();
    let x: Vec<f32> = (0..260).map(|i| i as f32).collect();
    let y = run(&platform, &matrix, Transform::Fabs, &x, &[257, 3]);
    assert_eq!(y[256], 765.0);
    assert_approx_eq(&y, &reference(&x, &matrix, Transform::Fabs), 0.0);
}

#[test]
#[ignore = "Requires GPU"]
fn test_partial_group_random_parity() {
    let mut rng = SmallRng::seed_from_u64(257);
    let x: Vec<f32> = (0..771).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let matrix = random_matrix(&mut rng, 2, 7, 5);
    let expected = reference(&x, &matrix, Transform::Sin);

    let single = Platform::init(PlatformOptions::uniform(1)).unwrap();
    assert_approx_eq(&run(&single, &matrix, Transform::Sin, &x, &[771]), &expected, EPSILON);

    let triple = Platform::init(PlatformOptions::uniform(3)).unwrap();
    assert_approx_eq(&run(&triple, &matrix, Transform::Sin, &x, &[257, 258, 256]), &expected, EPSILON);
}

// =============================================================================
// Errors
// =============================================================================

#[test]
#[ignore = "Requires GPU"]
fn test_local_memory_exhausted() {
    let options = PlatformOptions::with_devices(vec![DeviceSpec::host(), DeviceSpec::with_local_mem("tiny", 64)]);
    let platform = Platform::init(options).unwrap();
    let service = Arc::new(CompilationService::new());
    // 16 local elements cannot hold a 5-wide group plus its window and weights.
    let filter = GeneralizedStencil::from_matrix(service, platform.queues(), 2, 5, 2, &[1.0f32; 10]).unwrap();

    let err = filter.work_group_size(Transform::Cos, 0).unwrap_err();
    assert!(matches!(err, StencilError::LocalMemoryExhausted { device: 1, .. }));

    let x = DeviceVector::<f32>::new(platform.queues(), 16).unwrap();
    let y = x.like().unwrap();
    assert!(matches!(
        filter.convolve(Transform::Cos, &x, &y, 0.0, 1.0),
        Err(StencilError::LocalMemoryExhausted { .. })
    ));
}

#[test]
#[ignore = "Requires GPU"]
fn test_partition_must_hold_both_halos() {
    let platform = Platform::init(PlatformOptions::uniform(2)).unwrap();
    let service = Arc::new(CompilationService::new());
    let filter = GeneralizedStencil::from_matrix(service, platform.queues(), 1, 5, 2, &[1.0f32; 5]).unwrap();

    let x = DeviceVector::<f32>::with_partition(platform.queues(), &[10, 3]).unwrap();
    let y = x.like().unwrap();
    assert!(matches!(
        filter.convolve(Transform::Cos, &x, &y, 0.0, 1.0),
        Err(StencilError::PartitionTooSmall {
            device: 1,
            size: 3,
            required: 4
        })
    ));
}
