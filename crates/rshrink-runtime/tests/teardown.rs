//! Pool threads must not outlive the handle or bundle that started them.
//!
//! Counts live `rshrink-pool-*` threads through `/proc/self/task`, so this
//! suite only runs on Linux. It lives in its own test binary: other suites
//! start pools concurrently and would skew the count.

#![cfg(target_os = "linux")]

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use rshrink_core::{ThreadMode, Variant};
use rshrink_runtime::{BundleBuilder, ModuleLoadError, ModuleLoader, ModuleSource, PoolSize, init_pool};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../tests/fixtures")
        .join(name)
}

fn live_pool_threads() -> usize {
    std::fs::read_dir("/proc/self/task")
        .unwrap()
        .filter_map(Result::ok)
        .filter(|task| {
            std::fs::read_to_string(task.path().join("comm"))
                .map(|name| name.starts_with("rshrink-pool"))
                .unwrap_or(false)
        })
        .count()
}

#[tokio::test]
async fn failed_build_leaves_no_pool_threads() {
    let loader = ModuleLoader::new("threads-only", ModuleSource::file(fixture("threads-only.wat")));
    let size = NonZeroUsize::new(2).unwrap();

    // The multi-thread variant compiles on its own and gets a pool.
    let mut handle = loader.load(Variant::MultiThread).await.unwrap();
    init_pool(&mut handle, size).await.unwrap();
    assert_eq!(live_pool_threads(), 2);
    drop(handle);
    assert_eq!(live_pool_threads(), 0);

    // The single-thread engine rejects the shared memory, failing the build
    // after the multi-thread path has started its pool.
    let err = BundleBuilder::new(loader, ThreadMode::Force)
        .with_pool_size(PoolSize::Fixed(size))
        .build()
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ModuleLoadError::Compile(_)));
    assert_eq!(live_pool_threads(), 0);
}
