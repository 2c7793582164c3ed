//! Catalogue of elementwise transforms for generalized filters.
//!
//! A [`Transform`] is a closed tag. All per-tag data lives in one lookup
//! table: the catalogue name, the WGSL expression the device evaluates and
//! a host reference evaluation.
//!
//! WGSL only guarantees `f32` transcendentals, so every transform except
//! `fabs` is evaluated in single precision and converted back to the
//! element type. The generated function looks like:
//!
//! ```text
//! fn transform(v: real) -> real {
//!     let t = f32(v);
//!     return real(sin(t));
//! }
//! ```

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use std::f64::consts::PI;

/// Unary numeric function applied to each row sum of a generalized filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[allow(missing_docs)]
pub enum Transform {
    Acos,
    Acosh,
    Acospi,
    Asin,
    Asinh,
    Asinpi,
    Atan,
    Atanh,
    Atanpi,
    Cbrt,
    Ceil,
    Cos,
    Cosh,
    Cospi,
    Erfc,
    Erf,
    Exp,
    Exp2,
    Exp10,
    Expm1,
    Fabs,
    Floor,
    Lgamma,
    Log,
    Log2,
    Log10,
    Log1p,
    Logb,
    Rint,
    Round,
    Rsqrt,
    Sin,
    Sinh,
    Sinpi,
    Sqrt,
    Tan,
    Tanh,
    Tanpi,
    Tgamma,
    Trunc,
}

struct Entry {
    tag: Transform,
    device_name: &'static str,
    wgsl: &'static str,
    eval: fn(f64) -> f64,
}

const PI_WGSL: &str = "const PI_F: f32 = 3.14159265358979323846;\n";

// Abramowitz and Stegun 7.1.26, absolute error below 1.5e-7.
const ERF_WGSL: &str = r#"fn erf_f(x: f32) -> f32 {
    let a = abs(x);
    let k = 1.0 / (1.0 + 0.3275911 * a);
    let poly = k * (0.254829592 + k * (-0.284496736 + k * (1.421413741 + k * (-1.453152027 + k * 1.061405429))));
    return sign(x) * (1.0 - poly * exp(-a * a));
}
"#;

// Lanczos approximation, g = 7, valid for z >= 0.5.
const LANCZOS_WGSL: &str = r#"fn lanczos_sum(x: f32) -> f32 {
    var a = 0.99999999999980993;
    a += 676.5203681218851 / (x + 1.0);
    a += -1259.1392167224028 / (x + 2.0);
    a += 771.32342877765313 / (x + 3.0);
    a += -176.61502916214059 / (x + 4.0);
    a += 12.507343278686905 / (x + 5.0);
    a += -0.13857109526572012 / (x + 6.0);
    a += 9.9843695780195716e-6 / (x + 7.0);
    a += 1.5056327351493116e-7 / (x + 8.0);
    return a;
}

fn lgamma_pos(z: f32) -> f32 {
    let x = z - 1.0;
    let t = x + 7.5;
    return 0.91893853320467274 + (x + 0.5) * log(t) - t + log(lanczos_sum(x));
}

fn gamma_pos(z: f32) -> f32 {
    let x = z - 1.0;
    let t = x + 7.5;
    let p = pow(t, 0.5 * (x + 0.5));
    return 2.5066282746310002 * p * (p * exp(-t)) * lanczos_sum(x);
}

fn lgamma_f(t: f32) -> f32 {
    if t < 0.5 {
        return log(PI_F / abs(sin(PI_F * t))) - lgamma_pos(1.0 - t);
    }
    return lgamma_pos(t);
}

fn tgamma_f(t: f32) -> f32 {
    if t < 0.5 {
        return PI_F / (sin(PI_F * t) * gamma_pos(1.0 - t));
    }
    return gamma_pos(t);
}
"#;

fn acospi(x: f64) -> f64 {
    libm::acos(x) / PI
}

fn asinpi(x: f64) -> f64 {
    libm::asin(x) / PI
}

fn atanpi(x: f64) -> f64 {
    libm::atan(x) / PI
}

fn cospi(x: f64) -> f64 {
    libm::cos(PI * x)
}

fn sinpi(x: f64) -> f64 {
    libm::sin(PI * x)
}

fn tanpi(x: f64) -> f64 {
    libm::tan(PI * x)
}

fn rsqrt(x: f64) -> f64 {
    1.0 / libm::sqrt(x)
}

fn logb(x: f64) -> f64 {
    if x == 0.0 {
        f64::NEG_INFINITY
    } else if !x.is_finite() {
        x.abs()
    } else {
        libm::ilogb(x) as f64
    }
}

const TABLE: &[Entry] = &[
    Entry { tag: Transform::Acos, device_name: "acos", wgsl: "acos(t)", eval: libm::acos },
    Entry { tag: Transform::Acosh, device_name: "acosh", wgsl: "acosh(t)", eval: libm::acosh },
    Entry { tag: Transform::Acospi, device_name: "acospi", wgsl: "acos(t) / PI_F", eval: acospi },
    Entry { tag: Transform::Asin, device_name: "asin", wgsl: "asin(t)", eval: libm::asin },
    Entry { tag: Transform::Asinh, device_name: "asinh", wgsl: "asinh(t)", eval: libm::asinh },
    Entry { tag: Transform::Asinpi, device_name: "asinpi", wgsl: "asin(t) / PI_F", eval: asinpi },
    Entry { tag: Transform::Atan, device_name: "atan", wgsl: "atan(t)", eval: libm::atan },
    Entry { tag: Transform::Atanh, device_name: "atanh", wgsl: "atanh(t)", eval: libm::atanh },
    Entry { tag: Transform::Atanpi, device_name: "atanpi", wgsl: "atan(t) / PI_F", eval: atanpi },
    Entry { tag: Transform::Cbrt, device_name: "cbrt", wgsl: "select(sign(t) * pow(abs(t), 1.0 / 3.0), t, t == 0.0)", eval: libm::cbrt },
    Entry { tag: Transform::Ceil, device_name: "ceil", wgsl: "ceil(t)", eval: libm::ceil },
    Entry { tag: Transform::Cos, device_name: "cos", wgsl: "cos(t)", eval: libm::cos },
    Entry { tag: Transform::Cosh, device_name: "cosh", wgsl: "cosh(t)", eval: libm::cosh },
    Entry { tag: Transform::Cospi, device_name: "cospi", wgsl: "cos(PI_F * t)", eval: cospi },
    Entry { tag: Transform::Erfc, device_name: "erfc", wgsl: "1.0 - erf_f(t)", eval: libm::erfc },
    Entry { tag: Transform::Erf, device_name: "erf", wgsl: "erf_f(t)", eval: libm::erf },
    Entry { tag: Transform::Exp, device_name: "exp", wgsl: "exp(t)", eval: libm::exp },
    Entry { tag: Transform::Exp2, device_name: "exp2", wgsl: "exp2(t)", eval: libm::exp2 },
    Entry { tag: Transform::Exp10, device_name: "exp10", wgsl: "exp2(t * 3.32192809488736234787)", eval: libm::exp10 },
    Entry { tag: Transform::Expm1, device_name: "expm1", wgsl: "select(exp(t) - 1.0, t + t * t * (0.5 + t / 6.0), abs(t) < 0.01)", eval: libm::expm1 },
    Entry { tag: Transform::Fabs, device_name: "fabs", wgsl: "abs(v)", eval: libm::fabs },
    Entry { tag: Transform::Floor, device_name: "floor", wgsl: "floor(t)", eval: libm::floor },
    Entry { tag: Transform::Lgamma, device_name: "lgamma", wgsl: "lgamma_f(t)", eval: libm::lgamma },
    Entry { tag: Transform::Log, device_name: "log", wgsl: "log(t)", eval: libm::log },
    Entry { tag: Transform::Log2, device_name: "log2", wgsl: "log2(t)", eval: libm::log2 },
    Entry { tag: Transform::Log10, device_name: "log10", wgsl: "log2(t) * 0.30102999566398119521", eval: libm::log10 },
    Entry { tag: Transform::Log1p, device_name: "log1p", wgsl: "select(log(1.0 + t) * t / ((1.0 + t) - 1.0), t, 1.0 + t == 1.0)", eval: libm::log1p },
    Entry { tag: Transform::Logb, device_name: "logb", wgsl: "select(f32(frexp(t).exp - 1), log2(abs(t)), t == 0.0 || abs(t) > 3.4028234e38 || t != t)", eval: logb },
    Entry { tag: Transform::Rint, device_name: "rint", wgsl: "round(t)", eval: libm::rint },
    Entry { tag: Transform::Round, device_name: "round", wgsl: "select(trunc(t), trunc(t) + sign(t), abs(t - trunc(t)) >= 0.5)", eval: libm::round },
    Entry { tag: Transform::Rsqrt, device_name: "rsqrt", wgsl: "inverseSqrt(t)", eval: rsqrt },
    Entry { tag: Transform::Sin, device_name: "sin", wgsl: "sin(t)", eval: libm::sin },
    Entry { tag: Transform::Sinh, device_name: "sinh", wgsl: "sinh(t)", eval: libm::sinh },
    Entry { tag: Transform::Sinpi, device_name: "sinpi", wgsl: "sin(PI_F * t)", eval: sinpi },
    Entry { tag: Transform::Sqrt, device_name: "sqrt", wgsl: "sqrt(t)", eval: libm::sqrt },
    Entry { tag: Transform::Tan, device_name: "tan", wgsl: "tan(t)", eval: libm::tan },
    Entry { tag: Transform::Tanh, device_name: "tanh", wgsl: "tanh(t)", eval: libm::tanh },
    Entry { tag: Transform::Tanpi, device_name: "tanpi", wgsl: "tan(PI_F * t)", eval: tanpi },
    Entry { tag: Transform::Tgamma, device_name: "tgamma", wgsl: "tgamma_f(t)", eval: libm::tgamma },
    Entry { tag: Transform::Trunc, device_name: "trunc", wgsl: "trunc(t)", eval: libm::trunc },
];

impl Transform {
    /// Every transform, in catalogue order.
    pub fn all() -> impl Iterator<Item = Transform> {
        TABLE.iter().map(|e| e.tag)
    }

    fn entry(self) -> &'static Entry {
        // The table lists variants in declaration order.
        &TABLE[self as usize]
    }

    /// Catalogue name, as used by OpenCL-style math libraries.
    pub fn device_name(self) -> &'static str {
        self.entry().device_name
    }

    /// WGSL expression of the transform over `t: f32` (or `v: real` for
    /// `fabs`).
    pub fn wgsl_expression(self) -> &'static str {
        self.entry().wgsl
    }

    /// Returns `true` if the device evaluates the transform in the element
    /// type itself rather than through `f32`.
    pub fn is_exact(self) -> bool {
        self == Transform::Fabs
    }

    /// WGSL defining `fn transform(v: real) -> real` and the helpers it
    /// needs. Expects `real` to be declared.
    pub fn device_source(self) -> String {
        let expr = self.wgsl_expression();
        let mut src = String::new();
        if expr.contains("PI_F") || matches!(self, Transform::Lgamma | Transform::Tgamma) {
            src.push_str(PI_WGSL);
        }
        if expr.contains("erf_f") {
            src.push_str(ERF_WGSL);
        }
        if expr.contains("gamma_f") {
            src.push_str(LANCZOS_WGSL);
        }
        src.push_str("fn transform(v: real) -> real {\n");
        if self.is_exact() {
            src.push_str(&format!("    return {};\n", expr));
        } else {
            src.push_str(&format!("    let t = f32(v);\n    return real({});\n", expr));
        }
        src.push_str("}\n");
        src
    }

    /// Looks a transform up by its device-side name.
    pub fn from_device_name(name: &str) -> Option<Transform> {
        TABLE.iter().find(|e| e.device_name == name).map(|e| e.tag)
    }

    /// Evaluates the transform on the host.
    #[inline]
    pub fn eval(self, x: f64) -> f64 {
        (self.entry().eval)(x)
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.device_name())
    }
}

impl FromStr for Transform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Transform::from_device_name(s).ok_or_else(|| format!("unknown transform `{}`", s))
    }
}
