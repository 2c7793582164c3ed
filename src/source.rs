//! WGSL source of the convolution kernels.
//!
//! Kernel bodies are written against a `real` element type. A program is
//! assembled as:
//!
//! 1. [`STANDARD_HEADER`] (banner only)
//! 2. the per-device header text from the build configuration
//! 3. the prelude: `alias real = <element>;`, `ZERO`, the work-group size
//!    and the workgroup scratch array `loc`
//! 4. for generalized programs, `fn transform(v: real) -> real`
//! 5. the launch uniform, the bindings and the kernel bodies
//!
//! Every program is generated text only; nothing is written to disk.
//!
//! # Bindings
//!
//! | Binding | Name | Access |
//! |---------|------|--------|
//! | 0 | `launch` | uniform |
//! | 1 | `x` | read |
//! | 2 | `s` | read |
//! | 3 | `y` | read_write |
//! | 4 | `h` | read |
//!
//! Every entry point runs `WORK_GROUP_SIZE` invocations per group; lanes at
//! or beyond `launch.block` stay idle but still reach each barrier.

use crate::config::MAX_WORK_GROUP_SIZE;
use crate::device::{prev_power_of_two, Device};
use crate::scalar::{Real, Scalar};
use crate::transform::Transform;

/// Interior kernel staging the window in local memory.
pub const STENCIL_INTERIOR_FAST: &str = "stencil_interior_fast";

/// Interior kernel reading global memory directly.
pub const STENCIL_INTERIOR_FALLBACK: &str = "stencil_interior_fallback";

/// Additive edge correction for the plain filter.
pub const STENCIL_BOUNDARY: &str = "stencil_boundary";

/// Interior kernel of the generalized filter.
pub const GSTENCIL_INTERIOR: &str = "gstencil_interior";

/// Edge kernel of the generalized filter.
pub const GSTENCIL_BOUNDARY: &str = "gstencil_boundary";

/// Banner opening every generated program.
pub const STANDARD_HEADER: &str = "// haloconv generated program\n";

/// Work-group size and scratch capacity baked into a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramLayout {
    /// `@workgroup_size` of every entry point.
    pub work_group_size: usize,
    /// Elements of the workgroup scratch array.
    pub local_capacity: usize,
}

impl ProgramLayout {
    /// Layout with explicit sizes (both at least 1).
    pub fn new(work_group_size: usize, local_capacity: usize) -> Self {
        Self {
            work_group_size: work_group_size.max(1),
            local_capacity: local_capacity.max(1),
        }
    }

    /// Layout fitting every device of a context for elements of
    /// `elem_size` bytes.
    pub fn for_devices(devices: &[Device], elem_size: usize) -> Self {
        let work_group_size = devices
            .iter()
            .map(Device::max_work_group_size)
            .fold(MAX_WORK_GROUP_SIZE, usize::min);
        let local_capacity = devices
            .iter()
            .map(|d| d.spec().available_local_mem() / elem_size.max(1))
            .min()
            .unwrap_or(0);
        Self::new(prev_power_of_two(work_group_size), local_capacity)
    }
}

/// Plain filter kernels.
///
/// # Local memory (fast kernel)
///
/// `[stencil: L][left halo][block][right halo]`, i.e.
/// `block + 2 * (lhalo + rhalo) + 1` elements.
pub const STENCIL_KERNELS: &str = r#"
struct Launch {
    block: u32,
    n: u32,
    lhalo: u32,
    rhalo: u32,
    has_left: u32,
    has_right: u32,
    alpha: real,
    beta: real,
}

@group(0) @binding(0) var<uniform> launch: Launch;
@group(0) @binding(1) var<storage, read> x: array<real>;
@group(0) @binding(2) var<storage, read> s: array<real>;
@group(0) @binding(3) var<storage, read_write> y: array<real>;
@group(0) @binding(4) var<storage, read> h: array<real>;

fn blend(g: u32, sum: real) {
    if launch.alpha != ZERO {
        y[g] = launch.alpha * y[g] + launch.beta * sum;
    } else {
        y[g] = launch.beta * sum;
    }
}

@compute @workgroup_size(WORK_GROUP_SIZE)
fn stencil_interior_fast(
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
) {
    let block = launch.block;
    let n = launch.n;
    let lhalo = launch.lhalo;
    let rhalo = launch.rhalo;
    let width = lhalo + rhalo + 1u;
    let base = width + lhalo;
    let l = lid.x;
    let g = wid.x * block + l;

    if l < block {
        for (var k = l; k < width; k += block) {
            loc[k] = s[k];
        }
        if g < n {
            loc[base + l] = x[g];
        }
        // Halo slots are keyed on the source index, not on g.
        if l < lhalo && g >= lhalo && g - lhalo < n {
            loc[base + l - lhalo] = x[g - lhalo];
        }
        if l + rhalo >= block && g + rhalo < n {
            loc[base + l + rhalo] = x[g + rhalo];
        }
    }

    workgroupBarrier();

    if l < block && g < n {
        var sum = ZERO;
        for (var k = 0u; k < width; k++) {
            let p = g + k;
            if p >= lhalo && p - lhalo < n {
                sum += loc[k] * loc[base + l + k - lhalo];
            }
        }
        blend(g, sum);
    }
}

@compute @workgroup_size(WORK_GROUP_SIZE)
fn stencil_interior_fallback(
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
) {
    let n = launch.n;
    let lhalo = launch.lhalo;
    let width = lhalo + launch.rhalo + 1u;
    let g = wid.x * launch.block + lid.x;
    if lid.x >= launch.block || g >= n {
        return;
    }

    var sum = ZERO;
    for (var k = 0u; k < width; k++) {
        let p = g + k;
        if p >= lhalo && p - lhalo < n {
            sum += s[k] * x[p - lhalo];
        }
    }
    blend(g, sum);
}

// One lane per edge output: lanes [0, lhalo) take the head of the
// partition, lanes [lhalo, lhalo + rhalo) the tail. Tail outputs that are
// also head outputs belong to the head lane.
@compute @workgroup_size(WORK_GROUP_SIZE)
fn stencil_boundary(
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
) {
    let n = launch.n;
    let lhalo = launch.lhalo;
    let rhalo = launch.rhalo;
    let width = lhalo + rhalo + 1u;
    let i = wid.x * launch.block + lid.x;
    if lid.x >= launch.block || i >= lhalo + rhalo {
        return;
    }

    var j = i;
    if i >= lhalo {
        j = n - rhalo + (i - lhalo);
        if j < lhalo {
            return;
        }
    }

    var sum = ZERO;
    for (var k = 0u; k < width; k++) {
        let p = j + k;
        if p < lhalo {
            var v = x[0];
            if launch.has_left != 0u {
                v = h[p];
            }
            sum += s[k] * v;
        } else if p >= n + lhalo {
            var v = x[n - 1u];
            if launch.has_right != 0u {
                v = h[p - n];
            }
            sum += s[k] * v;
        }
    }
    y[j] += launch.beta * sum;
}
"#;

/// Generalized filter kernels.
///
/// Output `i` is `sum_k F(sum_j S[k][j] * x[i + j - lhalo])` where `F` is
/// `transform`. The boundary kernel runs as a single work-group and reuses
/// one local window for both edges.
pub const GSTENCIL_KERNELS: &str = r#"
struct Launch {
    block: u32,
    n: u32,
    rows: u32,
    cols: u32,
    lhalo: u32,
    rhalo: u32,
    has_left: u32,
    has_right: u32,
    alpha: real,
    beta: real,
}

@group(0) @binding(0) var<uniform> launch: Launch;
@group(0) @binding(1) var<storage, read> x: array<real>;
@group(0) @binding(2) var<storage, read> s: array<real>;
@group(0) @binding(3) var<storage, read_write> y: array<real>;
@group(0) @binding(4) var<storage, read> h: array<real>;

fn blend(g: u32, sum: real) {
    if launch.alpha != ZERO {
        y[g] = launch.alpha * y[g] + launch.beta * sum;
    } else {
        y[g] = launch.beta * sum;
    }
}

@compute @workgroup_size(WORK_GROUP_SIZE)
fn gstencil_interior(
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
) {
    let block = launch.block;
    let n = launch.n;
    let rows = launch.rows;
    let cols = launch.cols;
    let lhalo = launch.lhalo;
    let rhalo = launch.rhalo;
    let taps = rows * cols;
    let base = taps + lhalo;
    let l = lid.x;
    let g = wid.x * block + l;

    if l < block {
        for (var k = l; k < taps; k += block) {
            loc[k] = s[k];
        }
        if g < n {
            loc[base + l] = x[g];
        }
        if l < lhalo && g >= lhalo && g - lhalo < n {
            loc[base + l - lhalo] = x[g - lhalo];
        }
        if l + rhalo >= block && g + rhalo < n {
            loc[base + l + rhalo] = x[g + rhalo];
        }
    }

    workgroupBarrier();

    if l < block && g >= lhalo && g + rhalo < n {
        var total = ZERO;
        for (var r = 0u; r < rows; r++) {
            var acc = ZERO;
            for (var c = 0u; c < cols; c++) {
                acc += loc[r * cols + c] * loc[base + l + c - lhalo];
            }
            total += transform(acc);
        }
        blend(g, total);
    }
}

fn row_sums(i: u32) -> real {
    var total = ZERO;
    for (var r = 0u; r < launch.rows; r++) {
        var acc = ZERO;
        for (var c = 0u; c < launch.cols; c++) {
            acc += s[r * launch.cols + c] * loc[i + c];
        }
        total += transform(acc);
    }
    return total;
}

@compute @workgroup_size(WORK_GROUP_SIZE)
fn gstencil_boundary(@builtin(local_invocation_id) lid: vec3<u32>) {
    let block = launch.block;
    let n = launch.n;
    let lhalo = launch.lhalo;
    let rhalo = launch.rhalo;
    let l = lid.x;

    if l < block {
        for (var i = l; i < 2u * lhalo + rhalo; i += block) {
            if i >= lhalo {
                loc[i] = x[i - lhalo];
            } else if launch.has_left != 0u {
                loc[i] = h[i];
            } else {
                loc[i] = x[0];
            }
        }
    }

    workgroupBarrier();

    if l < block {
        for (var i = l; i < lhalo; i += block) {
            blend(i, row_sums(i));
        }
    }

    workgroupBarrier();

    let start = n - rhalo - lhalo;
    if l < block {
        for (var i = l; i < lhalo + 2u * rhalo; i += block) {
            let p = start + i;
            if p < n {
                loc[i] = x[p];
            } else if launch.has_right != 0u {
                loc[i] = h[lhalo + p - n];
            } else {
                loc[i] = x[n - 1u];
            }
        }
    }

    workgroupBarrier();

    if l < block {
        for (var i = l; i < rhalo; i += block) {
            blend(n - rhalo + i, row_sums(i));
        }
    }
}
"#;

fn program_prologue<T: Scalar>(header: &str, layout: &ProgramLayout) -> String {
    let mut src = String::with_capacity(STANDARD_HEADER.len() + header.len() + 8192);
    src.push_str(STANDARD_HEADER);
    src.push_str(header);
    if !header.is_empty() && !header.ends_with('\n') {
        src.push('\n');
    }
    src.push_str(&format!(
        "\nalias real = {};\nconst ZERO: real = {};\nconst WORK_GROUP_SIZE: u32 = {}u;\nconst LOCAL_CAPACITY: u32 = {}u;\nvar<workgroup> loc: array<real, LOCAL_CAPACITY>;\n",
        T::DEVICE_NAME,
        T::ZERO_LITERAL,
        layout.work_group_size,
        layout.local_capacity
    ));
    src
}

/// Source of the plain filter program for element type `T`.
pub fn stencil_program<T: Scalar>(header: &str, layout: &ProgramLayout) -> String {
    let mut src = program_prologue::<T>(header, layout);
    src.push_str(STENCIL_KERNELS);
    src
}

/// Source of the generalized filter program for element type `T` and the
/// given transform.
pub fn gstencil_program<T: Real>(header: &str, layout: &ProgramLayout, transform: Transform) -> String {
    let mut src = program_prologue::<T>(header, layout);
    src.push_str(&transform.device_source());
    src.push_str(GSTENCIL_KERNELS);
    src
}
