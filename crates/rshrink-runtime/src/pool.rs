//! Thread pool — dedicated OS threads, each owning an instance of the
//! multi-thread compute module.
//!
//! Jobs are handed out through a shared channel: whichever worker is idle
//! picks up the next job. Replies travel back over a per-job `oneshot`, so
//! async callers can await results without blocking the runtime.
//!
//! Worker startup runs guest code (`init`, `init_thread_pool`) under an epoch
//! deadline. A pool dropped before every worker reported ready bumps the
//! engine epoch, so a worker stuck in the guest traps and can be joined.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use rshrink_core::Variant;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use wasmtime::Engine;

use crate::error::{CallError, ThreadPoolError};
use crate::handle::ModuleHandle;
use crate::instance::{InstanceFactory, WasmInstance};

/// Pool size used when the host does not report its concurrency.
pub const FALLBACK_POOL_SIZE: NonZeroUsize = match NonZeroUsize::new(4) {
    Some(size) => size,
    None => unreachable!(),
};

/// Logical concurrency reported by the host, or [`FALLBACK_POOL_SIZE`].
pub fn host_concurrency() -> NonZeroUsize {
    match thread::available_parallelism() {
        Ok(n) => n,
        Err(e) => {
            warn!(
                error = %e,
                fallback = FALLBACK_POOL_SIZE.get(),
                "host concurrency unavailable, using fallback pool size"
            );
            FALLBACK_POOL_SIZE
        }
    }
}

/// How many workers the multi-thread variant gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolSize {
    /// Match host concurrency.
    #[default]
    Auto,
    Fixed(NonZeroUsize),
}

impl PoolSize {
    pub fn resolve(self) -> NonZeroUsize {
        match self {
            PoolSize::Auto => host_concurrency(),
            PoolSize::Fixed(size) => size,
        }
    }
}

type Job = Box<dyn FnOnce(&mut WasmInstance) + Send + 'static>;

enum Message {
    Run(Job),
    Terminate,
}

struct PoolWorker {
    index: usize,
    thread: Option<thread::JoinHandle<()>>,
}

/// A fixed-size set of worker threads with one compute instance each.
///
/// Dropping the pool terminates and joins every worker.
pub struct ThreadPool {
    workers: Vec<PoolWorker>,
    sender: mpsc::Sender<Message>,
    engine: Engine,
    /// Set while workers may still be inside startup guest code.
    starting: Option<Arc<AtomicBool>>,
    peak_memory: Arc<AtomicUsize>,
}

impl ThreadPool {
    /// Start `size` workers and wait until every one of them has
    /// instantiated and initialized its instance.
    ///
    /// Workers raise `peak_memory` to their instance's peak after startup
    /// and after every job.
    pub async fn start(
        factory: &InstanceFactory,
        size: NonZeroUsize,
        peak_memory: Arc<AtomicUsize>,
    ) -> Result<Self, ThreadPoolError> {
        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let abandoned = Arc::new(AtomicBool::new(false));

        let mut pool = ThreadPool {
            workers: Vec::with_capacity(size.get()),
            sender,
            engine: factory.module().engine().engine().clone(),
            starting: Some(Arc::clone(&abandoned)),
            peak_memory: Arc::clone(&peak_memory),
        };
        let mut ready = Vec::with_capacity(size.get());

        for index in 0..size.get() {
            let (ready_tx, ready_rx) = oneshot::channel();
            let startup = Startup {
                index,
                size,
                factory: factory.clone(),
                abandoned: Arc::clone(&abandoned),
                peak_memory: Arc::clone(&peak_memory),
            };
            let receiver = Arc::clone(&receiver);
            let thread = thread::Builder::new()
                .name(format!("rshrink-pool-{index}"))
                .spawn(move || run_worker(startup, receiver, ready_tx))
                .map_err(ThreadPoolError::Spawn)?;
            pool.workers.push(PoolWorker {
                index,
                thread: Some(thread),
            });
            ready.push(ready_rx);
        }

        for (index, ready_rx) in ready.into_iter().enumerate() {
            match ready_rx.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    return Err(ThreadPoolError::WorkerStart {
                        index,
                        reason: "worker exited during startup".to_string(),
                    });
                }
            }
        }
        pool.starting = None;

        info!(
            module = %factory.module().name(),
            size = size.get(),
            "thread pool started"
        );
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job on the pool and return the receiver for its result.
    pub fn submit<R, F>(&self, job: F) -> Result<oneshot::Receiver<R>, CallError>
    where
        F: FnOnce(&mut WasmInstance) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let peak_memory = Arc::clone(&self.peak_memory);
        self.sender
            .send(Message::Run(Box::new(move |instance: &mut WasmInstance| {
                let result = job(instance);
                peak_memory.fetch_max(instance.peak_memory(), Ordering::Relaxed);
                let _ = tx.send(result);
            })))
            .map_err(|_| CallError::PoolClosed)?;
        Ok(rx)
    }

    /// Run a job on the next idle worker.
    pub async fn run<R, F>(&self, job: F) -> Result<R, CallError>
    where
        F: FnOnce(&mut WasmInstance) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit(job)?.await.map_err(|_| CallError::PoolClosed)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Two loops: every worker gets a Terminate before any join.
        for _ in &self.workers {
            let _ = self.sender.send(Message::Terminate);
        }

        if let Some(abandoned) = self.starting.take() {
            abandoned.store(true, Ordering::SeqCst);
            self.engine.increment_epoch();
            debug!("interrupting pool workers still starting");
        }

        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    warn!(worker = worker.index, "pool worker panicked");
                }
            }
        }

        debug!(size = self.workers.len(), "thread pool shut down");
    }
}

/// What a worker needs to bring up its instance.
struct Startup {
    index: usize,
    size: NonZeroUsize,
    factory: InstanceFactory,
    abandoned: Arc<AtomicBool>,
    peak_memory: Arc<AtomicUsize>,
}

fn run_worker(
    startup: Startup,
    receiver: Arc<Mutex<mpsc::Receiver<Message>>>,
    ready: oneshot::Sender<Result<(), ThreadPoolError>>,
) {
    let index = startup.index;
    let mut instance = match start_instance(&startup) {
        Ok(instance) => {
            startup
                .peak_memory
                .fetch_max(instance.peak_memory(), Ordering::Relaxed);
            let _ = ready.send(Ok(()));
            instance
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    debug!(worker = index, "pool worker ready");

    loop {
        // The guard is dropped as soon as `recv` returns, so other workers
        // can pick up jobs while this one runs.
        let message = match receiver.lock() {
            Ok(guard) => guard.recv(),
            Err(_) => break,
        };

        match message {
            Ok(Message::Run(job)) => job(&mut instance),
            Ok(Message::Terminate) | Err(_) => break,
        }
    }

    debug!(worker = index, "pool worker stopped");
}

fn start_instance(startup: &Startup) -> Result<WasmInstance, ThreadPoolError> {
    let index = startup.index;
    let worker_start = |reason: String| ThreadPoolError::WorkerStart { index, reason };

    let mut instance = startup
        .factory
        .create_instance()
        .map_err(|e| worker_start(format!("{e:#}")))?;

    // Arm before checking the flag: a drop that lands after the check bumps
    // the epoch past this deadline.
    instance.arm_interrupt();
    if startup.abandoned.load(Ordering::SeqCst) {
        return Err(worker_start("pool dropped during startup".to_string()));
    }

    instance
        .run_init()
        .map_err(|e| worker_start(e.to_string()))?;

    match instance.init_thread_pool(startup.size.get()) {
        Ok(None) | Ok(Some(0)) => {
            instance.disarm_interrupt();
            Ok(instance)
        }
        Ok(Some(code)) => Err(ThreadPoolError::Rejected { code }),
        Err(e) => Err(worker_start(e.to_string())),
    }
}

/// Start a thread pool for `handle` and register it there.
///
/// Until this completes the handle only runs calls on its primary instance.
pub async fn init_pool(handle: &mut ModuleHandle, size: NonZeroUsize) -> Result<(), ThreadPoolError> {
    if handle.variant() != Variant::MultiThread {
        return Err(ThreadPoolError::NotThreaded);
    }
    let pool = ThreadPool::start(handle.factory(), size, handle.peak_memory_counter()).await?;
    handle.attach_pool(pool);
    Ok(())
}
