//! WasmInstance — a running compute module instance.
//!
//! Wraps a `wasmtime::Instance` with its `Store` and marshals [`Value`]s in
//! and out of exported functions.
//!
//! # Calling convention
//!
//! - `init()` runs once per instance before any other export.
//! - `init_thread_pool(size: i32) -> i32` runs on pool workers only; a
//!   non-zero result rejects the pool.
//! - Array arguments are copied into guest memory through
//!   `alloc(bytes: i32) -> i32` (little-endian `i32` elements) and passed as
//!   two parameters, `(ptr, len)`. When the guest exports
//!   `dealloc(ptr: i32, bytes: i32)`, the copies are released after the call.
//! - Results are zero or one numeric value.

use rshrink_core::{Value, Variant};
use tracing::{debug, warn};
use wasmtime::{ExternType, Func, FuncType, Instance, Module, Store, Val, ValType};

use crate::engine::{ComputeEngine, InstanceState};
use crate::error::{CallError, CallResult};
use crate::limiter::ComputeLimiter;

pub const INIT_EXPORT: &str = "init";
pub const INIT_THREAD_POOL_EXPORT: &str = "init_thread_pool";
pub const ALLOC_EXPORT: &str = "alloc";
pub const DEALLOC_EXPORT: &str = "dealloc";
pub const MEMORY_EXPORT: &str = "memory";

/// ABI exports that are not part of the module's callable surface.
const RESERVED_EXPORTS: &[&str] = &[INIT_EXPORT, INIT_THREAD_POOL_EXPORT, ALLOC_EXPORT, DEALLOC_EXPORT];

/// Epoch deadline for stores that are not under a startup watch.
const NO_DEADLINE: u64 = u64::MAX / 2;

/// A compiled compute module, ready to be instantiated.
///
/// Compilation is expensive, instantiation is cheap: pool workers share one
/// `CompiledModule` and each create their own instance.
#[derive(Clone)]
pub struct CompiledModule {
    engine: ComputeEngine,
    module: Module,
    name: String,
}

impl CompiledModule {
    /// Compile a module from binary or text bytes.
    pub fn from_bytes(engine: ComputeEngine, name: &str, bytes: &[u8]) -> anyhow::Result<Self> {
        let module = Module::new(engine.engine(), bytes)?;
        tracing::info!(%name, variant = %engine.variant(), "compiled compute module");
        Ok(Self {
            engine,
            module,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variant(&self) -> Variant {
        self.engine.variant()
    }

    pub fn engine(&self) -> &ComputeEngine {
        &self.engine
    }

    /// Exported function names, excluding the calling-convention exports.
    pub fn exports(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .module
            .exports()
            .filter(|export| matches!(export.ty(), ExternType::Func(_)))
            .map(|export| export.name().to_string())
            .filter(|name| !RESERVED_EXPORTS.contains(&name.as_str()))
            .collect();
        names.sort();
        names
    }
}

/// A guest-memory copy made for one call.
#[derive(Debug, Clone, Copy)]
struct Allocation {
    ptr: i32,
    bytes: i32,
}

/// A lowered argument before it is matched against the export's signature.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Int(i64),
    Float(f64),
}

/// A running compute module instance with its store.
pub struct WasmInstance {
    store: Store<InstanceState>,
    instance: Instance,
    module_name: String,
}

impl WasmInstance {
    /// Instantiate a compiled module with a fresh store and limiter.
    pub fn new(module: &CompiledModule, memory_limit: usize) -> anyhow::Result<Self> {
        let state = InstanceState {
            limiter: ComputeLimiter::new(memory_limit),
        };
        let mut store = Store::new(module.engine.engine(), state);
        store.limiter(|state| &mut state.limiter);
        if module.engine.interruptible() {
            store.set_epoch_deadline(NO_DEADLINE);
        }

        let instance = module
            .engine
            .linker()
            .instantiate(&mut store, &module.module)?;

        debug!(name = %module.name, "compute instance created");

        Ok(Self {
            store,
            instance,
            module_name: module.name.clone(),
        })
    }

    /// Peak linear-memory size granted to this instance, in bytes.
    pub fn peak_memory(&self) -> usize {
        self.store.data().limiter.peak_memory()
    }

    /// Trap running guest code at the engine's next epoch increment.
    ///
    /// Only has an effect on interruptible engines.
    pub(crate) fn arm_interrupt(&mut self) {
        self.store.set_epoch_deadline(1);
    }

    pub(crate) fn disarm_interrupt(&mut self) {
        self.store.set_epoch_deadline(NO_DEADLINE);
    }

    /// Run the module's `init` export if it has one.
    ///
    /// Returns whether an `init` export was found.
    pub fn run_init(&mut self) -> CallResult<bool> {
        let Some(func) = self.instance.get_func(&mut self.store, INIT_EXPORT) else {
            return Ok(false);
        };
        let init = func
            .typed::<(), ()>(&self.store)
            .map_err(|e| signature(INIT_EXPORT, format!("{e:#}")))?;
        init.call(&mut self.store, ())
            .map_err(|e| trap(INIT_EXPORT, e))?;
        Ok(true)
    }

    /// Tell the instance the size of the pool it belongs to.
    ///
    /// Returns the guest's status code, or `None` when the module has no
    /// `init_thread_pool` export.
    pub fn init_thread_pool(&mut self, size: usize) -> CallResult<Option<i32>> {
        let Some(func) = self.instance.get_func(&mut self.store, INIT_THREAD_POOL_EXPORT) else {
            return Ok(None);
        };
        let init_pool = func
            .typed::<i32, i32>(&self.store)
            .map_err(|e| signature(INIT_THREAD_POOL_EXPORT, format!("{e:#}")))?;
        let size = i32::try_from(size)
            .map_err(|_| signature(INIT_THREAD_POOL_EXPORT, format!("pool size {size} out of range")))?;
        let code = init_pool
            .call(&mut self.store, size)
            .map_err(|e| trap(INIT_THREAD_POOL_EXPORT, e))?;
        Ok(Some(code))
    }

    /// Call an exported function.
    pub fn invoke(&mut self, export: &str, args: &[Value]) -> CallResult<Value> {
        let func = self
            .instance
            .get_func(&mut self.store, export)
            .ok_or_else(|| CallError::MissingExport(export.to_string()))?;

        let mut scratch = Vec::new();
        let result = self.call_with(func, export, args, &mut scratch);
        self.release(&scratch);
        result
    }

    fn call_with(
        &mut self,
        func: Func,
        export: &str,
        args: &[Value],
        scratch: &mut Vec<Allocation>,
    ) -> CallResult<Value> {
        let ty = func.ty(&self.store);
        let result_count = ty.results().len();
        if result_count > 1 {
            return Err(signature(export, "multi-value results are not supported"));
        }

        let slots = self.lower(export, args, scratch)?;
        let params = bind_params(export, &ty, &slots)?;

        let mut results = vec![Val::I32(0); result_count];
        func.call(&mut self.store, &params, &mut results)
            .map_err(|e| trap(export, e))?;

        lift(export, &results)
    }

    fn lower(
        &mut self,
        export: &str,
        args: &[Value],
        scratch: &mut Vec<Allocation>,
    ) -> CallResult<Vec<Slot>> {
        let mut slots = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Value::Unit => return Err(signature(export, "unit cannot be passed as an argument")),
                Value::Bool(b) => slots.push(Slot::Int(i64::from(*b))),
                Value::Int(v) => slots.push(Slot::Int(*v)),
                Value::Float(v) => slots.push(Slot::Float(*v)),
                Value::Array(items) => {
                    let allocation = self.write_array(export, items, scratch)?;
                    slots.push(Slot::Int(i64::from(allocation.ptr)));
                    slots.push(Slot::Int(i64::from(allocation.bytes / 4)));
                }
            }
        }
        Ok(slots)
    }

    /// Copy `items` into guest memory. The allocation lands in `scratch` as
    /// soon as `alloc` returns, so it is released even if the copy fails.
    fn write_array(
        &mut self,
        export: &str,
        items: &[i32],
        scratch: &mut Vec<Allocation>,
    ) -> CallResult<Allocation> {
        let bytes: Vec<u8> = items.iter().flat_map(|v| v.to_le_bytes()).collect();
        let size = i32::try_from(bytes.len()).map_err(|_| {
            CallError::Memory(format!("array of {} elements does not fit guest memory", items.len()))
        })?;

        let alloc = self
            .instance
            .get_typed_func::<i32, i32>(&mut self.store, ALLOC_EXPORT)
            .map_err(|e| {
                signature(export, format!("array arguments need an `alloc(i32) -> i32` export: {e:#}"))
            })?;
        let memory = self
            .instance
            .get_memory(&mut self.store, MEMORY_EXPORT)
            .ok_or_else(|| signature(export, "array arguments need an exported `memory`"))?;

        let ptr = alloc
            .call(&mut self.store, size)
            .map_err(|e| trap(ALLOC_EXPORT, e))?;
        let allocation = Allocation { ptr, bytes: size };
        scratch.push(allocation);

        let offset = usize::try_from(ptr)
            .map_err(|_| CallError::Memory(format!("alloc returned invalid pointer {ptr}")))?;
        memory
            .write(&mut self.store, offset, &bytes)
            .map_err(|e| CallError::Memory(format!("writing {size} bytes at {offset}: {e}")))?;

        Ok(allocation)
    }

    fn release(&mut self, scratch: &[Allocation]) {
        if scratch.is_empty() {
            return;
        }
        let Ok(dealloc) = self
            .instance
            .get_typed_func::<(i32, i32), ()>(&mut self.store, DEALLOC_EXPORT)
        else {
            return;
        };
        // Reverse order keeps stack-style allocators happy.
        for allocation in scratch.iter().rev() {
            if let Err(e) = dealloc.call(&mut self.store, (allocation.ptr, allocation.bytes)) {
                warn!(module = %self.module_name, error = %e, "dealloc trapped");
                break;
            }
        }
    }
}

fn bind_params(export: &str, ty: &FuncType, slots: &[Slot]) -> CallResult<Vec<Val>> {
    let expected = ty.params().len();
    if expected != slots.len() {
        return Err(signature(
            export,
            format!("expected {expected} parameters, got {}", slots.len()),
        ));
    }

    ty.params()
        .zip(slots)
        .enumerate()
        .map(|(index, (param, slot))| match (param, *slot) {
            (ValType::I32, Slot::Int(v)) => i32::try_from(v)
                .map(Val::I32)
                .map_err(|_| signature(export, format!("parameter {index}: {v} does not fit i32"))),
            (ValType::I64, Slot::Int(v)) => Ok(Val::I64(v)),
            (ValType::F32, Slot::Int(v)) => Ok(Val::F32((v as f32).to_bits())),
            (ValType::F32, Slot::Float(v)) => Ok(Val::F32((v as f32).to_bits())),
            (ValType::F64, Slot::Int(v)) => Ok(Val::F64((v as f64).to_bits())),
            (ValType::F64, Slot::Float(v)) => Ok(Val::F64(v.to_bits())),
            (param, slot) => Err(signature(
                export,
                format!("parameter {index}: cannot pass {slot:?} as {param:?}"),
            )),
        })
        .collect()
}

fn lift(export: &str, results: &[Val]) -> CallResult<Value> {
    match results {
        [] => Ok(Value::Unit),
        [Val::I32(v)] => Ok(Value::Int(i64::from(*v))),
        [Val::I64(v)] => Ok(Value::Int(*v)),
        [Val::F32(bits)] => Ok(Value::Float(f64::from(f32::from_bits(*bits)))),
        [Val::F64(bits)] => Ok(Value::Float(f64::from_bits(*bits))),
        _ => Err(signature(export, "unsupported result type")),
    }
}

fn signature(export: &str, reason: impl Into<String>) -> CallError {
    CallError::Signature {
        export: export.to_string(),
        reason: reason.into(),
    }
}

fn trap(export: &str, error: impl std::fmt::Display) -> CallError {
    CallError::Trap {
        export: export.to_string(),
        message: format!("{error:#}"),
    }
}

/// Shared handle to a compiled module plus the per-instance memory limit.
///
/// Pool workers use it to create their own instances.
#[derive(Clone)]
pub struct InstanceFactory {
    module: CompiledModule,
    memory_limit: usize,
}

impl InstanceFactory {
    pub fn new(module: CompiledModule, memory_limit: usize) -> Self {
        Self {
            module,
            memory_limit,
        }
    }

    pub fn create_instance(&self) -> anyhow::Result<WasmInstance> {
        WasmInstance::new(&self.module, self.memory_limit)
    }

    pub fn module(&self) -> &CompiledModule {
        &self.module
    }

    /// Per-instance linear-memory cap, in bytes.
    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::DEFAULT_MEMORY_LIMIT;

    const ADDER: &str = r#"
        (module
          (memory (export "memory") 1)
          (global $heap (mut i32) (i32.const 64))
          (func (export "alloc") (param $size i32) (result i32)
            (local $ptr i32)
            (local.set $ptr (global.get $heap))
            (global.set $heap (i32.add (global.get $heap) (local.get $size)))
            (local.get $ptr))
          (func (export "dealloc") (param $ptr i32) (param $size i32)
            (global.set $heap (local.get $ptr)))
          (func (export "heap") (result i32) (global.get $heap))
          (func (export "add") (param i32 i32) (result i32)
            (i32.add (local.get 0) (local.get 1)))
          (func (export "half") (param f64) (result f64)
            (f64.div (local.get 0) (f64.const 2)))
          (func (export "first") (param $ptr i32) (param $len i32) (result i32)
            (i32.load (local.get $ptr)))
          (func (export "noop")))
    "#;

    fn instance(wat: &str) -> WasmInstance {
        let engine = ComputeEngine::new(Variant::SingleThread).unwrap();
        let module = CompiledModule::from_bytes(engine, "test", wat.as_bytes()).unwrap();
        WasmInstance::new(&module, DEFAULT_MEMORY_LIMIT).unwrap()
    }

    #[test]
    fn exports_hide_calling_convention() {
        let engine = ComputeEngine::new(Variant::SingleThread).unwrap();
        let module = CompiledModule::from_bytes(engine, "test", ADDER.as_bytes()).unwrap();
        assert_eq!(module.exports(), vec!["add", "first", "half", "heap", "noop"]);
    }

    #[test]
    fn invokes_scalar_export() {
        let mut instance = instance(ADDER);
        let result = instance.invoke("add", &[Value::Int(2), Value::Int(40)]).unwrap();
        assert_eq!(result, Value::Int(42));
    }

    #[test]
    fn invokes_float_export_with_int_argument() {
        let mut instance = instance(ADDER);
        assert_eq!(instance.invoke("half", &[Value::Int(5)]).unwrap(), Value::Float(2.5));
    }

    #[test]
    fn unit_result() {
        let mut instance = instance(ADDER);
        assert_eq!(instance.invoke("noop", &[]).unwrap(), Value::Unit);
    }

    #[test]
    fn array_arguments_are_copied_and_released() {
        let mut instance = instance(ADDER);
        let result = instance
            .invoke("first", &[Value::Array(vec![7, 8, 9])])
            .unwrap();
        assert_eq!(result, Value::Int(7));
        // dealloc rewound the bump allocator
        assert_eq!(instance.invoke("heap", &[]).unwrap(), Value::Int(64));
    }

    #[test]
    fn failed_array_copy_still_deallocates() {
        // alloc hands out a pointer past the single page of memory
        let mut instance = instance(
            r#"
            (module
              (memory (export "memory") 1)
              (global $freed (mut i32) (i32.const -1))
              (func (export "alloc") (param i32) (result i32) (i32.const 70000))
              (func (export "dealloc") (param $ptr i32) (param $size i32)
                (global.set $freed (local.get $ptr)))
              (func (export "freed") (result i32) (global.get $freed))
              (func (export "first") (param i32 i32) (result i32) (i32.const 0)))
            "#,
        );
        let err = instance.invoke("first", &[Value::Array(vec![1, 2])]).unwrap_err();
        assert!(matches!(err, CallError::Memory(_)));
        assert_eq!(instance.invoke("freed", &[]).unwrap(), Value::Int(70000));
    }

    #[test]
    fn peak_memory_follows_growth() {
        let mut instance = instance(
            r#"
            (module
              (memory 1)
              (func (export "grow") (param i32) (result i32)
                (memory.grow (local.get 0))))
            "#,
        );
        assert_eq!(instance.peak_memory(), 65536);
        assert_eq!(instance.invoke("grow", &[Value::Int(2)]).unwrap(), Value::Int(1));
        assert_eq!(instance.peak_memory(), 3 * 65536);
    }

    #[test]
    fn growth_past_the_cap_fails_in_the_guest() {
        let engine = ComputeEngine::new(Variant::SingleThread).unwrap();
        let module = CompiledModule::from_bytes(
            engine,
            "capped",
            br#"(module (memory 1) (func (export "grow") (param i32) (result i32) (memory.grow (local.get 0))))"#,
        )
        .unwrap();
        let mut instance = WasmInstance::new(&module, 2 * 65536).unwrap();
        assert_eq!(instance.invoke("grow", &[Value::Int(4)]).unwrap(), Value::Int(-1));
        assert_eq!(instance.peak_memory(), 65536);
    }

    #[test]
    fn missing_export() {
        let mut instance = instance(ADDER);
        let err = instance.invoke("nope", &[]).unwrap_err();
        assert!(matches!(err, CallError::MissingExport(name) if name == "nope"));
    }

    #[test]
    fn wrong_arity_is_a_signature_error() {
        let mut instance = instance(ADDER);
        let err = instance.invoke("add", &[Value::Int(1)]).unwrap_err();
        assert!(matches!(err, CallError::Signature { .. }));
    }

    #[test]
    fn out_of_range_int_is_rejected() {
        let mut instance = instance(ADDER);
        let err = instance
            .invoke("add", &[Value::Int(i64::MAX), Value::Int(1)])
            .unwrap_err();
        assert!(err.to_string().contains("does not fit i32"));
    }

    #[test]
    fn float_into_i32_is_rejected() {
        let mut instance = instance(ADDER);
        let err = instance
            .invoke("add", &[Value::Float(1.5), Value::Int(1)])
            .unwrap_err();
        assert!(matches!(err, CallError::Signature { .. }));
    }

    #[test]
    fn arrays_need_alloc_export() {
        let mut instance = instance(
            r#"(module (func (export "len") (param i32 i32) (result i32) (local.get 1)))"#,
        );
        let err = instance.invoke("len", &[Value::Array(vec![1])]).unwrap_err();
        assert!(err.to_string().contains("alloc"));
    }

    #[test]
    fn init_is_optional() {
        let mut instance = instance(ADDER);
        assert!(!instance.run_init().unwrap());
        assert_eq!(instance.init_thread_pool(4).unwrap(), None);
    }

    #[test]
    fn trapping_init_is_reported() {
        let mut instance = instance(r#"(module (func (export "init") unreachable))"#);
        let err = instance.run_init().unwrap_err();
        assert!(matches!(err, CallError::Trap { export, .. } if export == "init"));
    }
}
