//! Program building and kernel launches.
//!
//! [`Program::build`] compiles WGSL for one context:
//!
//! 1. The option string is parsed. `-D NAME[=VALUE]` appends
//!    `const NAME = VALUE;` to the source (`VALUE` defaults to `1`), `-w` is
//!    accepted and ignored, anything else fails the build.
//! 2. `naga` parses and validates the module against the features of the
//!    context's GPU.
//! 3. Every compute entry point is reflected: members of its uniform struct
//!    become scalar parameters, storage arrays become buffer parameters and
//!    its workgroup array becomes the local scratch parameter.
//! 4. A shader module, bind group layout and compute pipeline are created per
//!    entry point.
//!
//! Build failures carry a log with the offending source lines:
//!
//! ```text
//! error: expected ';', found 'fn'
//!   ┌─ wgsl:12:5
//! ```
//!
//! Kernels take named arguments. A uniform member called `block` is not a
//! parameter: the runtime fills it with the work-group size of the launch.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{AddressSpace, ArraySize, ScalarKind, StorageAccess, TypeInner};
use wgpu::util::DeviceExt;

use crate::device::buffer::BufferInner;
use crate::device::{round_up, Buffer, BufferId, Context, ContextId, Device, Event, ProgramId, Queue};
use crate::error::{StencilError, StencilResult};
use crate::scalar::{is_supported_type, Scalar};

/// Uniform member the runtime fills with the launch's work-group size.
pub const BLOCK_PARAM: &str = "block";

/// Kind of a kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// `i32` value.
    Int,
    /// `u32` value; also takes sizes and flags.
    UInt,
    /// Value of the program's element type.
    Real,
    /// Read-only storage array.
    Input,
    /// Read-write storage array.
    Output,
    /// Workgroup scratch array.
    Local,
}

/// A reflected kernel parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Name in the source.
    pub name: String,
    /// Parameter kind.
    pub kind: ParamKind,
    /// Byte offset inside the launch uniform for scalars, binding index for
    /// buffers, unused for local scratch.
    pub slot: u32,
}

#[derive(Clone)]
struct BufferArg {
    id: BufferId,
    context: ContextId,
    element: &'static str,
    inner: Arc<BufferInner>,
}

#[derive(Clone)]
enum ArgValue {
    Size(u64),
    Int(i32),
    UInt(u32),
    Flag(bool),
    Real { element: &'static str, bytes: Vec<u8> },
    Buffer(BufferArg),
    Local { element: &'static str, elements: usize, bytes: usize },
}

/// A kernel argument, bound by name.
#[derive(Clone)]
pub struct KernelArg(ArgValue);

impl KernelArg {
    /// Index or length, passed as `u32`.
    pub fn size(value: usize) -> Self {
        KernelArg(ArgValue::Size(value as u64))
    }

    /// `i32` argument.
    pub fn int(value: i32) -> Self {
        KernelArg(ArgValue::Int(value))
    }

    /// `u32` argument.
    pub fn uint(value: u32) -> Self {
        KernelArg(ArgValue::UInt(value))
    }

    /// Boolean flag, passed as `u32`.
    pub fn flag(value: bool) -> Self {
        KernelArg(ArgValue::Flag(value))
    }

    /// Scalar argument of element type `T`.
    pub fn real<T: Scalar>(value: T) -> Self {
        KernelArg(ArgValue::Real {
            element: T::DEVICE_NAME,
            bytes: bytemuck::bytes_of(&value).to_vec(),
        })
    }

    /// Buffer argument, bound as input or output by the kernel signature.
    pub fn buffer<T: Scalar>(buffer: &Buffer<T>) -> Self {
        KernelArg(ArgValue::Buffer(BufferArg {
            id: buffer.id(),
            context: buffer.context_id(),
            element: T::DEVICE_NAME,
            inner: Arc::clone(buffer.inner()),
        }))
    }

    /// Local scratch of `elements` values of `T`.
    pub fn local<T: Scalar>(elements: usize) -> Self {
        KernelArg(ArgValue::Local {
            element: T::DEVICE_NAME,
            elements,
            bytes: elements * std::mem::size_of::<T>(),
        })
    }
}

impl fmt::Debug for KernelArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            ArgValue::Size(v) => write!(f, "Size({})", v),
            ArgValue::Int(v) => write!(f, "Int({})", v),
            ArgValue::UInt(v) => write!(f, "UInt({})", v),
            ArgValue::Flag(v) => write!(f, "Flag({})", v),
            ArgValue::Real { element, .. } => write!(f, "Real({})", element),
            ArgValue::Buffer(b) => write!(f, "Buffer({} of {})", b.id, b.element),
            ArgValue::Local { element, elements, .. } => write!(f, "Local({} x {})", elements, element),
        }
    }
}

/// Launch uniform of an entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UniformSlot {
    pub(crate) binding: u32,
    pub(crate) size: u64,
}

/// Reflected interface of one compute entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EntryLayout {
    pub(crate) name: String,
    pub(crate) work_group_size: usize,
    pub(crate) params: Vec<Param>,
    pub(crate) uniform: Option<UniformSlot>,
    pub(crate) block_offset: Option<u32>,
    pub(crate) local_capacity: usize,
}

/// Result of parsing, validating and reflecting a WGSL module.
#[derive(Debug, Clone)]
pub(crate) struct Analysis {
    pub(crate) element: Option<&'static str>,
    pub(crate) entries: Vec<EntryLayout>,
}

/// `naga` capabilities matching the `wgpu` features of a device.
pub(crate) fn capabilities(features: wgpu::Features) -> Capabilities {
    let mut caps = Capabilities::empty();
    if features.contains(wgpu::Features::SHADER_F64) {
        caps |= Capabilities::FLOAT64;
    }
    if features.contains(wgpu::Features::SHADER_INT64) {
        caps |= Capabilities::SHADER_INT64;
    }
    caps
}

fn scalar_name(scalar: naga::Scalar) -> Option<&'static str> {
    match (scalar.kind, scalar.width) {
        (ScalarKind::Float, 4) => Some("f32"),
        (ScalarKind::Float, 8) => Some("f64"),
        (ScalarKind::Sint, 4) => Some("i32"),
        (ScalarKind::Sint, 8) => Some("i64"),
        (ScalarKind::Uint, 4) => Some("u32"),
        _ => None,
    }
}

fn scalar_of(module: &naga::Module, ty: naga::Handle<naga::Type>) -> Option<&'static str> {
    match module.types[ty].inner {
        TypeInner::Scalar(scalar) => scalar_name(scalar),
        _ => None,
    }
}

/// Element name and fixed length (if any) of an array type.
fn array_of(module: &naga::Module, ty: naga::Handle<naga::Type>) -> Option<(&'static str, Option<u32>)> {
    match module.types[ty].inner {
        TypeInner::Array { base, size, .. } => {
            let len = match size {
                ArraySize::Constant(n) => Some(n.get()),
                _ => None,
            };
            Some((scalar_of(module, base)?, len))
        }
        _ => None,
    }
}

/// Parses, validates and reflects `source`.
///
/// Errors are returned as a build log.
pub(crate) fn analyze(source: &str, features: wgpu::Features) -> Result<Analysis, String> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;
    let info = Validator::new(ValidationFlags::all(), capabilities(features))
        .validate(&module)
        .map_err(|e| e.emit_to_string(source))?;

    let mut log = Vec::new();
    let mut element: Option<&'static str> = None;
    for (_, var) in module.global_variables.iter() {
        if !matches!(var.space, AddressSpace::Storage { .. }) {
            continue;
        }
        let name = var.name.as_deref().unwrap_or("<unnamed>");
        match array_of(&module, var.ty) {
            Some((ty, _)) if is_supported_type(ty) => match element {
                Some(e) if e != ty => log.push(format!(
                    "error: storage array '{}' holds {}, program element type is {}",
                    name, ty, e
                )),
                _ => element = Some(ty),
            },
            _ => log.push(format!("error: storage variable '{}' is not an array of a supported type", name)),
        }
    }

    let mut entries = Vec::new();
    for (index, entry) in module.entry_points.iter().enumerate() {
        if entry.stage != naga::ShaderStage::Compute {
            continue;
        }
        let fn_info = info.get_entry_point(index);
        let mut layout = EntryLayout {
            name: entry.name.clone(),
            work_group_size: entry.workgroup_size[0] as usize,
            params: Vec::new(),
            uniform: None,
            block_offset: None,
            local_capacity: 0,
        };
        let mut buffers = Vec::new();

        for (handle, var) in module.global_variables.iter() {
            if fn_info[handle].is_empty() {
                continue;
            }
            let name = var.name.clone().unwrap_or_default();
            let binding = match (&var.space, &var.binding) {
                (AddressSpace::Uniform | AddressSpace::Storage { .. }, Some(b)) if b.group == 0 => b.binding,
                (AddressSpace::Uniform | AddressSpace::Storage { .. }, _) => {
                    log.push(format!("error: '{}' of '{}' must be bound in group 0", name, entry.name));
                    continue;
                }
                _ => 0,
            };

            match var.space {
                AddressSpace::Uniform => {
                    if layout.uniform.is_some() {
                        log.push(format!("error: '{}' uses more than one uniform", entry.name));
                        continue;
                    }
                    let TypeInner::Struct { ref members, span } = module.types[var.ty].inner else {
                        log.push(format!("error: uniform '{}' must be a struct", name));
                        continue;
                    };
                    layout.uniform = Some(UniformSlot {
                        binding,
                        size: round_up(span as usize, 16) as u64,
                    });
                    for member in members {
                        let member_name = member.name.clone().unwrap_or_default();
                        let ty = scalar_of(&module, member.ty);
                        if member_name == BLOCK_PARAM {
                            if ty == Some("u32") {
                                layout.block_offset = Some(member.offset);
                            } else {
                                log.push(format!("error: '{}' must be u32", BLOCK_PARAM));
                            }
                            continue;
                        }
                        let kind = match ty {
                            Some(t) if Some(t) == element => ParamKind::Real,
                            Some("u32") => ParamKind::UInt,
                            Some("i32") => ParamKind::Int,
                            _ => {
                                log.push(format!("error: parameter '{}' has an unsupported type", member_name));
                                continue;
                            }
                        };
                        layout.params.push(Param {
                            name: member_name,
                            kind,
                            slot: member.offset,
                        });
                    }
                }
                AddressSpace::Storage { access } => {
                    let kind = if access.contains(StorageAccess::STORE) {
                        ParamKind::Output
                    } else {
                        ParamKind::Input
                    };
                    buffers.push(Param { name, kind, slot: binding });
                }
                AddressSpace::WorkGroup => match array_of(&module, var.ty) {
                    Some((ty, Some(len))) if Some(ty) == element && layout.local_capacity == 0 => {
                        layout.local_capacity = len as usize;
                        buffers.push(Param {
                            name,
                            kind: ParamKind::Local,
                            slot: 0,
                        });
                    }
                    _ => log.push(format!(
                        "error: workgroup variable '{}' of '{}' must be the only array of the element type",
                        name, entry.name
                    )),
                },
                _ => {}
            }
        }

        buffers.sort_by_key(|p| (p.kind == ParamKind::Local, p.slot));
        layout.params.extend(buffers);
        entries.push(layout);
    }

    if log.is_empty() {
        Ok(Analysis { element, entries })
    } else {
        Err(log.join("\n"))
    }
}

/// Parses `-D` definitions out of an option string, keeping their order.
fn parse_options(options: &str) -> Result<Vec<(String, String)>, String> {
    let mut defines = Vec::new();
    let mut log = Vec::new();
    let mut define = |def: &str, log: &mut Vec<String>| {
        let (name, value) = def.split_once('=').unwrap_or((def, "1"));
        let valid = name.chars().next().map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid && !value.is_empty() {
            defines.push((name.to_string(), value.to_string()));
        } else {
            log.push(format!("error: invalid macro definition '{}'", def));
        }
    };

    let mut tokens = options.split_whitespace();
    while let Some(token) = tokens.next() {
        match token {
            "-D" => match tokens.next() {
                Some(def) => define(def, &mut log),
                None => log.push("error: macro name missing after '-D'".to_string()),
            },
            "-w" => {}
            _ if token.len() > 2 && token.starts_with("-D") => define(&token[2..], &mut log),
            _ => log.push(format!("error: invalid build option '{}'", token)),
        }
    }

    if log.is_empty() {
        Ok(defines)
    } else {
        Err(log.join("\n"))
    }
}

fn apply_defines(source: &str, defines: &[(String, String)]) -> String {
    let mut full = String::with_capacity(source.len() + 32 * defines.len());
    full.push_str(source);
    if !full.is_empty() && !full.ends_with('\n') {
        full.push('\n');
    }
    for (name, value) in defines {
        full.push_str(&format!("const {} = {};\n", name, value));
    }
    full
}

struct KernelInfo {
    layout: EntryLayout,
    bind_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

fn create_kernel(device: &wgpu::Device, module: &wgpu::ShaderModule, layout: EntryLayout) -> KernelInfo {
    let mut entries = Vec::new();
    if let Some(uniform) = layout.uniform {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: uniform.binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
    }
    for param in &layout.params {
        let read_only = match param.kind {
            ParamKind::Input => true,
            ParamKind::Output => false,
            _ => continue,
        };
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: param.slot,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
    }

    let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&layout.name),
        entries: &entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&layout.name),
        bind_group_layouts: &[&bind_layout],
        push_constant_ranges: &[],
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(&layout.name),
        layout: Some(&pipeline_layout),
        module,
        entry_point: Some(&layout.name),
        compilation_options: Default::default(),
        cache: None,
    });

    KernelInfo {
        layout,
        bind_layout,
        pipeline,
    }
}

struct ProgramInner {
    id: ProgramId,
    context: Context,
    source: String,
    options: String,
    element: Option<&'static str>,
    defines: HashMap<String, String>,
    kernels: HashMap<String, Arc<KernelInfo>>,
}

/// A program built for one context.
#[derive(Clone)]
pub struct Program {
    inner: Arc<ProgramInner>,
}

impl Program {
    /// Builds `source` with the given option string.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::Compile`] carrying the build log.
    pub fn build(context: &Context, source: &str, options: &str) -> StencilResult<Program> {
        let fail = |log: String| StencilError::compile(context.id().to_string(), log);

        let defines = parse_options(options).map_err(fail)?;
        let full = apply_defines(source, &defines);
        let gpu = context.gpu();
        let analysis = analyze(&full, gpu.features()).map_err(fail)?;

        let kernels = gpu
            .checked("Pipeline creation", |device, _| {
                let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some("haloconv program"),
                    source: wgpu::ShaderSource::Wgsl(full.as_str().into()),
                });
                analysis
                    .entries
                    .into_iter()
                    .map(|layout| (layout.name.clone(), Arc::new(create_kernel(device, &module, layout))))
                    .collect::<HashMap<_, _>>()
            })
            .map_err(|e| fail(e.to_string()))?;

        Ok(Program {
            inner: Arc::new(ProgramInner {
                id: ProgramId::fresh(),
                context: context.clone(),
                source: full,
                options: options.to_string(),
                element: analysis.element,
                defines: defines.into_iter().collect(),
                kernels,
            }),
        })
    }

    /// Process-unique identity.
    pub fn id(&self) -> ProgramId {
        self.inner.id
    }

    /// Context the program was built for.
    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    /// Source the program was built from, including `-D` definitions.
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    /// Option string the program was built with.
    pub fn options(&self) -> &str {
        &self.inner.options
    }

    /// Element type of the program's storage arrays, if it has any.
    pub fn element_type(&self) -> Option<&str> {
        self.inner.element
    }

    /// Value of a constant defined through the option string.
    pub fn define(&self, name: &str) -> Option<&str> {
        self.inner.defines.get(name).map(String::as_str)
    }

    /// Names of all entry points, sorted.
    pub fn entry_points(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.inner.kernels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Looks up an entry point.
    pub fn kernel(&self, name: &str) -> StencilResult<Kernel> {
        let info = self
            .inner
            .kernels
            .get(name)
            .cloned()
            .ok_or_else(|| StencilError::device(format!("Invalid kernel name: '{}'", name)))?;
        Ok(Kernel {
            program: self.clone(),
            info,
        })
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("id", &self.id())
            .field("context", &self.context().id())
            .field("element", &self.element_type())
            .field("entry_points", &self.entry_points())
            .finish()
    }
}

/// A compiled entry point.
#[derive(Clone)]
pub struct Kernel {
    program: Program,
    info: Arc<KernelInfo>,
}

impl Kernel {
    /// Entry point name.
    pub fn name(&self) -> &str {
        &self.info.layout.name
    }

    /// Program the kernel belongs to.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Parameters in binding order: scalars, buffers, local scratch.
    pub fn params(&self) -> &[Param] {
        &self.info.layout.params
    }

    /// Largest work-group this kernel can be launched with on `device`.
    pub fn work_group_size(&self, device: &Device) -> usize {
        device.max_work_group_size().min(self.info.layout.work_group_size)
    }

    /// Local memory (bytes) the kernel occupies on `device` before its
    /// local scratch argument.
    pub fn local_mem_size(&self, device: &Device) -> usize {
        device.spec().reserved_local_mem
    }

    /// Elements the kernel's local scratch can hold; zero without one.
    pub fn local_capacity(&self) -> usize {
        self.info.layout.local_capacity
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name())
            .field("program", &self.program.id())
            .finish()
    }
}

/// Work-group size the runtime picks when none is given: the largest
/// divisor of `global` within `limit`.
fn default_local(global: usize, limit: usize) -> usize {
    (1..=limit.min(global).max(1))
        .rev()
        .find(|l| global % l == 0)
        .unwrap_or(1)
}

fn put(bytes: &mut [u8], offset: u32, value: &[u8]) -> StencilResult<()> {
    let start = offset as usize;
    bytes
        .get_mut(start..start + value.len())
        .ok_or_else(|| StencilError::device(format!("Invalid arg value: offset {} is outside the launch uniform", offset)))?
        .copy_from_slice(value);
    Ok(())
}

impl Queue {
    /// Enqueues `kernel` over `global` work-items with named arguments.
    ///
    /// `local` is the work-group size; `None` lets the runtime choose.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::Device`] at the call if an argument is
    /// unknown, missing or of the wrong kind, a buffer belongs to another
    /// context, an output buffer is also bound elsewhere, the work-group size
    /// is invalid, the local scratch request exceeds capacity, or `wgpu`
    /// rejects the dispatch.
    pub fn enqueue_kernel(
        &self,
        kernel: &Kernel,
        global: usize,
        local: Option<usize>,
        args: &[(&str, KernelArg)],
    ) -> StencilResult<Event> {
        let name = kernel.name();
        let program = kernel.program();
        if program.context().id() != self.context().id() {
            return Err(StencilError::device(format!(
                "Invalid kernel: '{}' was built for {}, queue submits into {}",
                name,
                program.context().id(),
                self.context().id()
            )));
        }

        let params = kernel.params();
        for (i, (arg_name, _)) in args.iter().enumerate() {
            if !params.iter().any(|p| p.name == *arg_name) {
                return Err(StencilError::device(format!(
                    "Invalid kernel args: '{}' has no parameter '{}'",
                    name, arg_name
                )));
            }
            if args[..i].iter().any(|(other, _)| other == arg_name) {
                return Err(StencilError::device(format!(
                    "Invalid kernel args: '{}' is given twice",
                    arg_name
                )));
            }
        }

        let layout = &kernel.info.layout;
        let element = program.element_type().unwrap_or_default();
        let mut uniform = vec![0u8; layout.uniform.map_or(0, |u| u.size as usize)];
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut bindings: Vec<(u32, Arc<BufferInner>)> = Vec::new();
        let mut local_bytes = 0usize;

        for param in params {
            let arg = args
                .iter()
                .find(|(n, _)| *n == param.name)
                .map(|(_, a)| a)
                .ok_or_else(|| {
                    StencilError::device(format!("Invalid kernel args: '{}' is missing '{}'", name, param.name))
                })?;

            let mismatch = || {
                StencilError::device(format!(
                    "Invalid arg value: '{}' of '{}' expects {:?} of '{}', got {:?}",
                    param.name, name, param.kind, element, arg
                ))
            };

            match (&arg.0, param.kind) {
                (ArgValue::UInt(v), ParamKind::UInt) => put(&mut uniform, param.slot, bytemuck::bytes_of(v))?,
                (ArgValue::Size(v), ParamKind::UInt) => {
                    let v = u32::try_from(*v)
                        .map_err(|_| StencilError::device(format!("Invalid arg value: '{}' = {} exceeds u32", param.name, v)))?;
                    put(&mut uniform, param.slot, bytemuck::bytes_of(&v))?;
                }
                (ArgValue::Flag(v), ParamKind::UInt) => put(&mut uniform, param.slot, bytemuck::bytes_of(&u32::from(*v)))?,
                (ArgValue::Int(v), ParamKind::Int) => put(&mut uniform, param.slot, bytemuck::bytes_of(v))?,
                (ArgValue::Real { element: e, bytes }, ParamKind::Real) if *e == element => {
                    put(&mut uniform, param.slot, bytes)?
                }
                (ArgValue::Buffer(b), ParamKind::Input | ParamKind::Output) if b.element == element => {
                    if b.context != self.context().id() {
                        return Err(StencilError::device(format!(
                            "Invalid mem object: '{}' of '{}' belongs to {}",
                            param.name, name, b.context
                        )));
                    }
                    if param.kind == ParamKind::Output {
                        outputs.push(b.id);
                    } else {
                        inputs.push(b.id);
                    }
                    bindings.push((param.slot, Arc::clone(&b.inner)));
                }
                (ArgValue::Local { element: e, elements, bytes }, ParamKind::Local) if *e == element => {
                    if *elements > layout.local_capacity {
                        return Err(StencilError::device(format!(
                            "Out of resources: '{}' asks for {} local elements, '{}' holds {}",
                            param.name, elements, name, layout.local_capacity
                        )));
                    }
                    local_bytes += bytes;
                }
                _ => return Err(mismatch()),
            }
        }

        for (i, out) in outputs.iter().enumerate() {
            if inputs.contains(out) || outputs[..i].contains(out) {
                return Err(StencilError::device(format!(
                    "Mem copy overlap: {} is bound as output of '{}' and used by another argument",
                    out, name
                )));
            }
        }

        let device = self.device();
        let limit = kernel.work_group_size(device);
        let local = local.unwrap_or_else(|| default_local(global, limit));
        if local == 0 || local > limit || global % local != 0 {
            return Err(StencilError::device(format!(
                "Invalid work group size: global {}, local {}, limit {}",
                global, local, limit
            )));
        }
        let groups = global / local;
        let max_groups = self.context().limits().max_compute_workgroups_per_dimension as usize;
        if groups > max_groups {
            return Err(StencilError::device(format!(
                "Invalid global work size: {} work-groups exceed the limit of {}",
                groups, max_groups
            )));
        }

        let required = local_bytes + kernel.local_mem_size(device);
        if required > device.local_mem_size() {
            return Err(StencilError::device(format!(
                "Out of resources: '{}' needs {} bytes of local memory, {} has {}",
                name,
                required,
                device.name(),
                device.local_mem_size()
            )));
        }

        if let Some(offset) = layout.block_offset {
            put(&mut uniform, offset, bytemuck::bytes_of(&(local as u32)))?;
        }
        if groups == 0 {
            self.wait_for(&[])?;
            return Ok(Event::completed());
        }

        let info = &kernel.info;
        let (_, event) = self.submit_with(name, &[], |device, encoder| {
            let uniform_buffer = layout.uniform.map(|slot| {
                let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("haloconv launch"),
                    contents: &uniform,
                    usage: wgpu::BufferUsages::UNIFORM,
                });
                (slot.binding, buffer)
            });

            let mut entries = Vec::with_capacity(bindings.len() + 1);
            if let Some((binding, buffer)) = &uniform_buffer {
                entries.push(wgpu::BindGroupEntry {
                    binding: *binding,
                    resource: buffer.as_entire_binding(),
                });
            }
            for (binding, inner) in &bindings {
                entries.push(wgpu::BindGroupEntry {
                    binding: *binding,
                    resource: inner.raw.as_entire_binding(),
                });
            }
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(name),
                layout: &info.bind_layout,
                entries: &entries,
            });

            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(name),
                timestamp_writes: None,
            });
            pass.set_pipeline(&info.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups as u32, 1, 1);
        })?;
        Ok(event)
    }
}
