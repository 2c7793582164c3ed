//! Validation of descriptors, device specs and platform options.

use std::sync::Arc;

use haloconv::config::{ConfigError, DeviceSpec, PlatformOptions};
use haloconv::device::Platform;
use haloconv::{CompilationService, FilterDescriptor, GeneralizedStencil, MatrixDescriptor, Stencil, StencilError};

#[test]
fn test_filter_descriptor_errors() {
    assert_eq!(FilterDescriptor::<f32>::new(vec![], 0).unwrap_err(), ConfigError::EmptyWeights);
    assert_eq!(
        FilterDescriptor::new(vec![1.0f32, 2.0], 2).unwrap_err(),
        ConfigError::CenterOutOfRange { center: 2, width: 2 }
    );
}

#[test]
fn test_matrix_descriptor_errors() {
    assert!(matches!(
        MatrixDescriptor::new(2, 3, 1, vec![0.0f32; 5]),
        Err(ConfigError::MatrixShape { rows: 2, cols: 3, len: 5 })
    ));
    assert!(matches!(
        MatrixDescriptor::new(1, 3, 3, vec![0.0f32; 3]),
        Err(ConfigError::CenterOutOfRange { .. })
    ));
}

#[test]
fn test_platform_errors() {
    let empty = PlatformOptions::with_devices(vec![]);
    assert!(matches!(
        Platform::init(empty),
        Err(StencilError::Config(ConfigError::EmptyQueueList))
    ));

    let broken = PlatformOptions {
        devices: vec![DeviceSpec {
            max_work_group_size: 0,
            ..DeviceSpec::host()
        }],
        ..PlatformOptions::shared(1)
    };
    assert!(matches!(
        Platform::init(broken),
        Err(StencilError::Config(ConfigError::InvalidDevice(_)))
    ));
}

#[test]
fn test_filters_need_queues() {
    let service = Arc::new(CompilationService::new());
    assert!(matches!(
        Stencil::from_weights(service.clone(), &[], &[1.0f32], 0),
        Err(StencilError::Config(ConfigError::EmptyQueueList))
    ));
    assert!(matches!(
        GeneralizedStencil::from_matrix(service, &[], 1, 1, 0, &[1.0f32]),
        Err(StencilError::Config(ConfigError::EmptyQueueList))
    ));
}

#[test]
fn test_error_messages() {
    let err: StencilError = ConfigError::CenterOutOfRange { center: 4, width: 3 }.into();
    assert_eq!(
        err.to_string(),
        "Configuration error: Center 4 is out of range for filter width 3"
    );
    let err = StencilError::partition_too_small(1, 2, 3);
    assert!(err.to_string().contains("device 1"));
}

#[cfg(feature = "serde")]
mod serde_roundtrip {
    use haloconv::config::{DeviceSpec, PlatformOptions};
    use haloconv::{FilterDescriptor, Transform};

    #[test]
    fn test_platform_options_json() {
        let options = PlatformOptions {
            adapter_name: Some("lavapipe".to_string()),
            ..PlatformOptions::with_devices(vec![DeviceSpec::host(), DeviceSpec::with_local_mem("small", 1024)])
        };
        let json = serde_json::to_string(&options).unwrap();
        let back: PlatformOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, options);
    }

    #[test]
    fn test_filter_and_transform_json() {
        let filter = FilterDescriptor::new(vec![0.25f64, 0.5, 0.25], 1).unwrap();
        let back: FilterDescriptor<f64> = serde_json::from_str(&serde_json::to_string(&filter).unwrap()).unwrap();
        assert_eq!(back, filter);

        let json = serde_json::to_string(&Transform::Log1p).unwrap();
        assert_eq!(serde_json::from_str::<Transform>(&json).unwrap(), Transform::Log1p);
    }
}
