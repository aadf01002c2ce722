//! rshrink-runtime — loads the compute module and negotiates its variants.
//!
//! The runtime turns a WebAssembly compute module into a
//! [`CapabilityBundle`]:
//!
//! - **Feature probing**: decides whether shared-memory threads are usable
//! - **Module loading**: compiles and initializes an independent copy of the
//!   module per variant
//! - **Thread pool**: one OS thread per worker, each with its own instance
//! - **Bundle building**: runs both paths concurrently; a failed
//!   multi-thread path degrades to single-thread instead of failing
//! - **Resource limiting**: caps memory and table growth per instance and
//!   reports each handle's peak memory
//!
//! # Architecture
//!
//! ```text
//! BundleBuilder
//!   ├── FeatureProbe (HostProbe / ThreadMode)
//!   ├── ModuleLoader ── ComputeEngine + CompiledModule ── ModuleHandle
//!   └── init_pool ── ThreadPool
//!       └── worker threads, one WasmInstance each
//! ```

pub mod bundle;
pub mod engine;
pub mod error;
pub mod handle;
pub mod instance;
pub mod limiter;
pub mod loader;
pub mod options;
pub mod pool;
pub mod probe;

pub use bundle::{BundleBuilder, CapabilityBundle, MultiThread, Unavailable};
pub use error::{CallError, ModuleLoadError, ThreadPoolError};
pub use handle::ModuleHandle;
pub use limiter::MemoryUsage;
pub use loader::{ModuleLoader, ModuleSource};
pub use options::RuntimeOptions;
pub use pool::{FALLBACK_POOL_SIZE, PoolSize, host_concurrency, init_pool};
pub use probe::{FeatureProbe, HostProbe};
