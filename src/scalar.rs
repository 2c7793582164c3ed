//! Element types usable on devices.
//!
//! Every element type knows its WGSL name, its zero literal and the device
//! features it needs, so generated programs can be specialized by plain text
//! substitution.

use std::fmt::Debug;
use std::ops::{Add, Mul, Neg, Sub};

use bytemuck::Pod;

/// Device-side name of the index type.
pub const SIZE_T_NAME: &str = "u32";

/// A numeric element type that can live in device buffers.
pub trait Scalar:
    Pod
    + Debug
    + Default
    + PartialEq
    + PartialOrd
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Neg<Output = Self>
    + 'static
{
    /// Name of the type in device source.
    const DEVICE_NAME: &'static str;

    /// Zero literal in device source.
    const ZERO_LITERAL: &'static str;

    /// Device features a program over this type needs.
    const FEATURES: wgpu::Features;

    /// Additive identity.
    fn zero() -> Self;

    /// Multiplicative identity.
    fn one() -> Self;

    /// Lossy conversion from `f64`.
    fn from_f64(v: f64) -> Self;

    /// Lossy conversion to `f64`.
    fn to_f64(self) -> f64;

    /// Returns `true` unless the value equals zero.
    #[inline]
    fn is_nonzero(self) -> bool {
        self != Self::zero()
    }
}

/// Floating-point element types; the only ones transforms accept.
pub trait Real: Scalar {}

macro_rules! impl_scalar {
    ($ty:ty, $name:expr, $literal:expr, $features:expr, $zero:expr, $one:expr) => {
        impl Scalar for $ty {
            const DEVICE_NAME: &'static str = $name;
            const ZERO_LITERAL: &'static str = $literal;
            const FEATURES: wgpu::Features = $features;

            #[inline]
            fn zero() -> Self {
                $zero
            }

            #[inline]
            fn one() -> Self {
                $one
            }

            #[inline]
            fn from_f64(v: f64) -> Self {
                v as $ty
            }

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

impl_scalar!(f32, "f32", "0.0f", wgpu::Features::empty(), 0.0, 1.0);
impl_scalar!(f64, "f64", "0.0lf", wgpu::Features::SHADER_F64, 0.0, 1.0);
impl_scalar!(i32, "i32", "0i", wgpu::Features::empty(), 0, 1);
impl_scalar!(i64, "i64", "0li", wgpu::Features::SHADER_INT64, 0, 1);

impl Real for f32 {}
impl Real for f64 {}

/// Returns `true` if `name` is the device name of a supported element type.
pub fn is_supported_type(name: &str) -> bool {
    matches!(name, "f32" | "f64" | "i32" | "i64")
}
