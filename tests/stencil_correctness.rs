//! Numerical correctness of the plain stencil filter.
//!
//! These tests verify:
//! - Known results (Laplacian) on one and two devices
//! - Multi-device results match the single-device result
//! - Partitions whose last work-group is partial
//! - Edge clamping at the global boundaries
//! - The `alpha`/`beta` blend
//! - Fallback interior kernel on devices with little local memory
//!
//! All tests need a GPU adapter; run them with `cargo test -- --ignored`.

use std::sync::Arc;

use haloconv::config::{DeviceSpec, PlatformOptions};
use haloconv::device::Platform;
use haloconv::planner::{Plan, Strategy};
use haloconv::{CompilationService, Convolve, DeviceVector, Stencil, StencilError};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Tolerance for f32 results against an f64 reference.
const EPSILON: f64 = 1e-5;

fn assert_approx_eq(a: &[f32], b: &[f64], tol: f64) {
    assert_eq!(a.len(), b.len(), "Length mismatch: {} vs {}", a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        assert!(
            (*x as f64 - y).abs() <= tol,
            "Mismatch at {}: {} vs {} (tolerance {})",
            i,
            x,
            y,
            tol
        );
    }
}

/// `y[i] = sum_k w[k] * x[clamp(i + k - center)]`.
fn reference(x: &[f32], weights: &[f32], center: usize) -> Vec<f64> {
    let last = x.len() as isize - 1;
    (0..x.len() as isize)
        .map(|i| {
            weights
                .iter()
                .enumerate()
                .map(|(k, w)| *w as f64 * x[(i + k as isize - center as isize).clamp(0, last) as usize] as f64)
                .sum()
        })
        .collect()
}

fn random_vec(rng: &mut SmallRng, len: usize) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn ramp(len: usize) -> Vec<f32> {
    (0..len).map(|i| i as f32).collect()
}

fn run(platform: &Platform, weights: &[f32], center: usize, x: &[f32], sizes: &[usize]) -> Vec<f32> {
    let service = Arc::new(CompilationService::new());
    let stencil = Stencil::from_weights(service, platform.queues(), weights, center).unwrap();
    let xv = DeviceVector::from_slice_partitioned(platform.queues(), x, sizes).unwrap();
    let yv = xv.like().unwrap();
    stencil.apply(&xv, &yv).unwrap();
    yv.to_vec().unwrap()
}

fn tiny_devices(count: usize) -> PlatformOptions {
    PlatformOptions::with_devices(
        (0..count)
            .map(|i| DeviceSpec::with_local_mem(format!("tiny{}", i), 64))
            .collect(),
    )
}

// =============================================================================
// Known Results
// =============================================================================

#[test]
#[ignore = "Requires GPU"]
fn test_laplacian_single_device() {
    let platform = Platform::init(PlatformOptions::uniform(1)).unwrap();
    let x = [1.0, 2.0, 4.0, 8.0, 16.0];
    let y = run(&platform, &[1.0, -2.0, 1.0], 1, &x, &[5]);
    assert_eq!(y, vec![1.0, 1.0, 2.0, 4.0, -8.0]);
}

#[test]
#[ignore = "Requires GPU"]
fn test_laplacian_split_across_devices() {
    let platform = Platform::init(PlatformOptions::uniform(2)).unwrap();
    let x = [1.0, 2.0, 4.0, 8.0, 16.0];
    let y = run(&platform, &[1.0, -2.0, 1.0], 1, &x, &[3, 2]);
    assert_eq!(y, vec![1.0, 1.0, 2.0, 4.0, -8.0]);
}

#[test]
#[ignore = "Requires GPU"]
fn test_integer_elements_are_exact() {
    let platform = Platform::init(PlatformOptions::uniform(3)).unwrap();
    let service = Arc::new(CompilationService::new());
    let stencil = Stencil::from_weights(service, platform.queues(), &[1i32, 2, 3], 1).unwrap();

    let data: Vec<i32> = (0..9).collect();
    let x = DeviceVector::from_slice(platform.queues(), &data).unwrap();
    let y = x.like().unwrap();
    stencil.apply(&x, &y).unwrap();

    let expected: Vec<i32> = (0..9i32)
        .map(|i| (i - 1).max(0) + 2 * i + 3 * (i + 1).min(8))
        .collect();
    assert_eq!(y.to_vec().unwrap(), expected);
}

// =============================================================================
// Partial Last Work-Group
// =============================================================================

#[test]
#[ignore = "Requires GPU"]
fn test_partial_group_single_device_fast() {
    // 257 % 256 == 1 < left halo: the last output's left taps sit in slots
    // staged by lanes past the end of the partition.
    let platform = Platform::init(PlatformOptions::uniform(1)).unwrap();
    let service = Arc::new(CompilationService::new());
    let stencil = Stencil::from_weights(service, platform.queues(), &[1.0f32, 1.0, 1.0], 2).unwrap();
    assert_eq!(stencil.plan(0), Plan { strategy: Strategy::Fast, work_group_size: 256 });

    let x = ramp(257);
    let xv = DeviceVector::from_slice(platform.queues(), &x).unwrap();
    let yv = xv.like().unwrap();
    stencil.apply(&xv, &yv).unwrap();
    let y = yv.to_vec().unwrap();
    assert_eq!(y[256], 765.0);
    assert_approx_eq(&y, &reference(&x, &[1.0, 1.0, 1.0], 2), EPSILON);
}

#[test]
#[ignore = "Requires GPU"]
fn test_partial_group_two_devices_fast() {
    let platform = Platform::init(PlatformOptions::uniform(2)).unwrap();
    let x = ramp(260);
    let y = run(&platform, &[1.0, 1.0, 1.0], 2, &x, &[257, 3]);
    assert_eq!(y[256], 765.0);
    assert_approx_eq(&y, &reference(&x, &[1.0, 1.0, 1.0], 2), EPSILON);
}

#[test]
#[ignore = "Requires GPU"]
fn test_partial_group_fallback() {
    for devices in 1..=2 {
        let platform = Platform::init(tiny_devices(devices)).unwrap();
        let service = Arc::new(CompilationService::new());
        let stencil = Stencil::from_weights(service, platform.queues(), &[1.0f32, 1.0, 1.0], 2).unwrap();
        assert_eq!(stencil.plan(0).strategy, Strategy::Fallback);

        let x = ramp(256 + devices + 2);
        let sizes: Vec<usize> = if devices == 1 { vec![x.len()] } else { vec![257, 3] };
        let xv = DeviceVector::from_slice_partitioned(platform.queues(), &x, &sizes).unwrap();
        let yv = xv.like().unwrap();
        stencil.apply(&xv, &yv).unwrap();
        let y = yv.to_vec().unwrap();
        assert_eq!(y[256], 765.0);
        assert_approx_eq(&y, &reference(&x, &[1.0, 1.0, 1.0], 2), EPSILON);
    }
}

#[test]
#[ignore = "Requires GPU"]
fn test_partial_group_random_parity() {
    let mut rng = SmallRng::seed_from_u64(257);
    let x = random_vec(&mut rng, 771);
    let weights = random_vec(&mut rng, 7);
    let expected = reference(&x, &weights, 5);

    let single = Platform::init(PlatformOptions::uniform(1)).unwrap();
    assert_approx_eq(&run(&single, &weights, 5, &x, &[771]), &expected, EPSILON);

    let triple = Platform::init(PlatformOptions::uniform(3)).unwrap();
    assert_approx_eq(&run(&triple, &weights, 5, &x, &[257, 258, 256]), &expected, EPSILON);
}

// =============================================================================
// Multi-Device Parity
// =============================================================================

#[test]
#[ignore = "Requires GPU"]
fn test_random_parity_across_device_counts() {
    let mut rng = SmallRng::seed_from_u64(42);
    let len = 1000;
    let x = random_vec(&mut rng, len);
    let weights = random_vec(&mut rng, 7);
    let expected = reference(&x, &weights, 2);

    let single = Platform::init(PlatformOptions::uniform(1)).unwrap();
    assert_approx_eq(&run(&single, &weights, 2, &x, &[len]), &expected, EPSILON);

    for devices in 2..=4 {
        let platform = Platform::init(PlatformOptions::uniform(devices)).unwrap();
        let sizes = haloconv::vector::even_partition(len, devices);
        let y = run(&platform, &weights, 2, &x, &sizes);
        assert_approx_eq(&y, &expected, EPSILON);
    }
}

#[test]
#[ignore = "Requires GPU"]
fn test_uneven_partitions() {
    let mut rng = SmallRng::seed_from_u64(7);
    let x = random_vec(&mut rng, 300);
    let weights = random_vec(&mut rng, 5);
    let expected = reference(&x, &weights, 4);

    let platform = Platform::init(PlatformOptions::uniform(3)).unwrap();
    // Smallest partition equals the halo width.
    let y = run(&platform, &weights, 4, &x, &[4, 250, 46]);
    assert_approx_eq(&y, &expected, EPSILON);
}

#[test]
#[ignore = "Requires GPU"]
fn test_zero_halo_filter() {
    let platform = Platform::init(PlatformOptions::uniform(3)).unwrap();
    let x = ramp(10);
    // Empty middle partition is allowed without halos.
    let y = run(&platform, &[0.5], 0, &x, &[6, 0, 4]);
    let expected: Vec<f32> = x.iter().map(|v| v * 0.5).collect();
    assert_eq!(y, expected);
}

#[test]
#[ignore = "Requires GPU"]
fn test_shared_context() {
    let mut rng = SmallRng::seed_from_u64(3);
    let x = random_vec(&mut rng, 64);
    let weights = [0.25, 0.5, 0.25];

    let platform = Platform::init(PlatformOptions::shared(2)).unwrap();
    assert_eq!(platform.contexts().len(), 1);
    let y = run(&platform, &weights, 1, &x, &[32, 32]);
    assert_approx_eq(&y, &reference(&x, &weights, 1), EPSILON);
}

// =============================================================================
// Edges and Blend
// =============================================================================

#[test]
#[ignore = "Requires GPU"]
fn test_edges_clamp_to_end_values() {
    let platform = Platform::init(PlatformOptions::uniform(2)).unwrap();
    let x = [3.0, 0.0, 0.0, 0.0, 0.0, 5.0];
    // Pure shifts expose the clamped taps.
    assert_eq!(run(&platform, &[1.0, 0.0, 0.0], 2, &x, &[3, 3]), vec![3.0, 3.0, 3.0, 0.0, 0.0, 0.0]);
    assert_eq!(run(&platform, &[0.0, 0.0, 1.0], 0, &x, &[3, 3]), vec![0.0, 0.0, 0.0, 5.0, 5.0, 5.0]);
}

#[test]
#[ignore = "Requires GPU"]
fn test_alpha_beta_blend() {
    let mut rng = SmallRng::seed_from_u64(11);
    let len = 200;
    let x = random_vec(&mut rng, len);
    let y0 = random_vec(&mut rng, len);
    let weights = random_vec(&mut rng, 4);
    let conv = reference(&x, &weights, 1);

    let platform = Platform::init(PlatformOptions::uniform(3)).unwrap();
    let service = Arc::new(CompilationService::new());
    let stencil = Stencil::from_weights(service, platform.queues(), &weights, 1).unwrap();
    let xv = DeviceVector::from_slice(platform.queues(), &x).unwrap();
    let yv = DeviceVector::from_slice(platform.queues(), &y0).unwrap();

    stencil.convolve(&xv, &yv, 1.0, -0.5).unwrap();
    let expected: Vec<f64> = y0.iter().zip(&conv).map(|(y, c)| *y as f64 - 0.5 * c).collect();
    assert_approx_eq(&yv.to_vec().unwrap(), &expected, EPSILON);
}

#[test]
#[ignore = "Requires GPU"]
fn test_zero_alpha_ignores_output() {
    let platform = Platform::init(PlatformOptions::uniform(2)).unwrap();
    let service = Arc::new(CompilationService::new());
    let stencil = Stencil::from_weights(service, platform.queues(), &[1.0f32, 1.0], 0).unwrap();
    let x = DeviceVector::from_slice(platform.queues(), &[1.0, 2.0, 3.0, 4.0]).unwrap();
    let y = x.like().unwrap();
    y.fill(f32::NAN).unwrap();

    stencil.convolve(&x, &y, 0.0, 2.0).unwrap();
    assert_eq!(y.to_vec().unwrap(), vec![6.0, 10.0, 14.0, 16.0]);
}

#[test]
#[ignore = "Requires GPU"]
fn test_repeated_calls_are_stable() {
    let platform = Platform::init(PlatformOptions::uniform(2)).unwrap();
    let service = Arc::new(CompilationService::new());
    let stencil = Stencil::from_weights(service, platform.queues(), &[1.0f32, -2.0, 1.0], 1).unwrap();
    let x = DeviceVector::from_slice(platform.queues(), &[1.0, 2.0, 4.0, 8.0, 16.0]).unwrap();
    let y = x.like().unwrap();

    for _ in 0..5 {
        stencil.apply(&x, &y).unwrap();
    }
    assert_eq!(y.to_vec().unwrap(), vec![1.0, 1.0, 2.0, 4.0, -8.0]);
}

// =============================================================================
// Capacity Planning
// =============================================================================

#[test]
#[ignore = "Requires GPU"]
fn test_fallback_matches_fast_path() {
    let mut rng = SmallRng::seed_from_u64(5);
    let x = random_vec(&mut rng, 500);
    let weights = random_vec(&mut rng, 9);

    let platform = Platform::init(tiny_devices(2)).unwrap();
    let service = Arc::new(CompilationService::new());
    let stencil = Stencil::from_weights(service, platform.queues(), &weights, 4).unwrap();
    assert_eq!(stencil.plan(0).strategy, Strategy::Fallback);
    assert_eq!(stencil.plan(1).strategy, Strategy::Fallback);

    let xv = DeviceVector::from_slice(platform.queues(), &x).unwrap();
    let yv = xv.like().unwrap();
    stencil.apply(&xv, &yv).unwrap();
    assert_approx_eq(&yv.to_vec().unwrap(), &reference(&x, &weights, 4), EPSILON);
}

#[test]
#[ignore = "Requires GPU"]
fn test_heterogeneous_devices() {
    let mut rng = SmallRng::seed_from_u64(9);
    let x = random_vec(&mut rng, 400);
    let weights = random_vec(&mut rng, 5);

    let options = PlatformOptions::with_devices(vec![
        DeviceSpec::host(),
        DeviceSpec::with_local_mem("small", 64),
        DeviceSpec {
            name: "narrow".to_string(),
            max_work_group_size: 64,
            ..DeviceSpec::host()
        },
    ]);
    let platform = Platform::init(options).unwrap();
    let service = Arc::new(CompilationService::new());
    let stencil = Stencil::from_weights(service, platform.queues(), &weights, 2).unwrap();

    assert_eq!(stencil.plan(0).strategy, Strategy::Fast);
    assert_eq!(stencil.plan(1).strategy, Strategy::Fallback);
    assert_eq!(stencil.plan(2).strategy, Strategy::Fast);
    assert!(stencil.plan(2).work_group_size <= 64);

    let xv = DeviceVector::from_slice(platform.queues(), &x).unwrap();
    let yv = xv.like().unwrap();
    stencil.apply(&xv, &yv).unwrap();
    assert_approx_eq(&yv.to_vec().unwrap(), &reference(&x, &weights, 2), EPSILON);
}

// =============================================================================
// Errors
// =============================================================================

#[test]
#[ignore = "Requires GPU"]
fn test_partition_smaller_than_halo() {
    let platform = Platform::init(PlatformOptions::uniform(2)).unwrap();
    let service = Arc::new(CompilationService::new());
    let stencil = Stencil::from_weights(service, platform.queues(), &[1.0f32, 1.0, 1.0, 1.0], 3).unwrap();
    let x = DeviceVector::<f32>::with_partition(platform.queues(), &[8, 2]).unwrap();
    let y = x.like().unwrap();

    let err = stencil.apply(&x, &y).unwrap_err();
    assert!(matches!(
        err,
        StencilError::PartitionTooSmall {
            device: 1,
            size: 2,
            required: 3
        }
    ));
}

#[test]
#[ignore = "Requires GPU"]
fn test_in_place_convolution_rejected() {
    let platform = Platform::init(PlatformOptions::uniform(1)).unwrap();
    let service = Arc::new(CompilationService::new());
    let stencil = Stencil::from_weights(service, platform.queues(), &[1.0f32, 1.0], 0).unwrap();
    let x = DeviceVector::<f32>::new(platform.queues(), 4).unwrap();
    assert!(matches!(stencil.apply(&x, &x), Err(StencilError::Device(_))));
}

#[test]
#[ignore = "Requires GPU"]
fn test_mismatched_vectors_rejected() {
    let platform = Platform::init(PlatformOptions::uniform(2)).unwrap();
    let service = Arc::new(CompilationService::new());
    let stencil = Stencil::from_weights(service, platform.queues(), &[1.0f32], 0).unwrap();
    let x = DeviceVector::<f32>::new(platform.queues(), 4).unwrap();
    let y = DeviceVector::<f32>::new(platform.queues(), 6).unwrap();
    assert!(matches!(
        stencil.apply(&x, &y),
        Err(StencilError::ShapeMismatch { .. })
    ));

    let other = Platform::init(PlatformOptions::uniform(1)).unwrap();
    let z = DeviceVector::<f32>::new(other.queues(), 4).unwrap();
    assert!(stencil.apply(&z, &z.like().unwrap()).is_err());
}

#[test]
#[ignore = "Requires GPU"]
fn test_errors_do_not_poison_later_calls() {
    let platform = Platform::init(PlatformOptions::uniform(2)).unwrap();
    let service = Arc::new(CompilationService::new());
    let stencil = Stencil::from_weights(service, platform.queues(), &[1.0f32, -2.0, 1.0], 1).unwrap();
    let x = DeviceVector::from_slice(platform.queues(), &[1.0, 2.0, 4.0, 8.0, 16.0]).unwrap();
    let y = x.like().unwrap();

    // Each rejection is reported by the call that caused it.
    assert!(stencil.apply(&x, &x).is_err());
    let short = DeviceVector::<f32>::new(platform.queues(), 3).unwrap();
    assert!(stencil.apply(&x, &short).is_err());

    stencil.apply(&x, &y).unwrap();
    for queue in platform.queues() {
        queue.finish().unwrap();
    }
    assert_eq!(y.to_vec().unwrap(), vec![1.0, 1.0, 2.0, 4.0, -8.0]);
}
