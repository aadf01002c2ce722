//! Worker — owns the capability bundle on a dedicated OS thread.
//!
//! ```text
//! main thread                         worker thread (current-thread runtime)
//!   RemoteProxy ── Envelope ──▶ serve loop ──▶ task per request
//!        ▲                          │             │ waits for readiness
//!        └──── oneshot reply ───────┼─────────────┘
//!                                   └── build task ─▶ watch<Option<Readiness>>
//! ```
//!
//! Requests are accepted as soon as the worker exists. Each one waits until
//! the bundle build has finished, so a caller never sees a "not ready"
//! error.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::thread;

use rshrink_core::Variant;
use rshrink_runtime::{BundleBuilder, CapabilityBundle, FeatureProbe, ModuleHandle, RuntimeOptions};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::BridgeError;
use crate::protocol::{Envelope, HandlersInfo, RemoteError, Request, Response};
use crate::proxy::RemoteProxy;

/// Outcome of the bundle build, shared with every waiting request.
type Readiness = Result<Arc<CapabilityBundle>, RemoteError>;

/// Handle to a running worker thread.
///
/// Dropping it signals the worker to stop without waiting; use
/// [`Worker::terminate`] to wait until the bundle and its pool threads are
/// gone.
pub struct Worker {
    proxy: RemoteProxy,
    shutdown: watch::Sender<bool>,
    done: Option<oneshot::Receiver<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    /// Spawn a worker that builds its bundle from `options`.
    pub fn spawn(options: RuntimeOptions) -> Result<Self, BridgeError> {
        Self::spawn_with(options.bundle_builder())
    }

    /// Spawn a worker around an already configured bundle builder.
    pub fn spawn_with<P>(builder: BundleBuilder<P>) -> Result<Self, BridgeError>
    where
        P: FeatureProbe + 'static,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .thread_name("rshrink-worker-blocking")
            .build()
            .map_err(BridgeError::Spawn)?;

        let (sender, requests) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = oneshot::channel();

        let thread = thread::Builder::new()
            .name("rshrink-worker".to_string())
            .spawn(move || {
                runtime.block_on(serve(builder, requests, shutdown_rx));
                // Waits for outstanding blocking tasks before reporting.
                drop(runtime);
                debug!("worker stopped");
                let _ = done_tx.send(());
            })
            .map_err(BridgeError::Spawn)?;

        info!("worker spawned");
        Ok(Self {
            proxy: RemoteProxy::new(sender, Arc::new(AtomicU64::new(1))),
            shutdown: shutdown_tx,
            done: Some(done_rx),
            thread: Some(thread),
        })
    }

    /// A proxy for sending requests to this worker.
    pub fn proxy(&self) -> RemoteProxy {
        self.proxy.clone()
    }

    /// Stop the worker and wait until it has dropped its bundle.
    ///
    /// Requests still in flight resolve to [`BridgeError::Terminated`].
    pub async fn terminate(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(done) = self.done.take() {
            let _ = done.await;
        }
        if let Some(thread) = self.thread.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => {}
                _ => warn!("worker thread panicked"),
            }
        }
        info!("worker terminated");
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn serve<P>(
    builder: BundleBuilder<P>,
    mut requests: mpsc::UnboundedReceiver<Envelope>,
    mut shutdown: watch::Receiver<bool>,
) where
    P: FeatureProbe + 'static,
{
    let (ready_tx, ready_rx) = watch::channel::<Option<Readiness>>(None);
    let mut build = tokio::spawn(builder.build());
    let mut building = true;
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            built = &mut build, if building => {
                building = false;
                let readiness = match built {
                    Ok(Ok(bundle)) => {
                        info!(supports_threads = bundle.supports_threads(), "worker ready");
                        Ok(Arc::new(bundle))
                    }
                    Ok(Err(err)) => {
                        error!(error = %err, "worker failed to build its capability bundle");
                        Err(RemoteError::BuildFailed { reason: err.to_string() })
                    }
                    Err(join) => {
                        error!(error = %join, "bundle build task aborted");
                        Err(RemoteError::BuildFailed { reason: join.to_string() })
                    }
                };
                ready_tx.send_replace(Some(readiness));
            }
            envelope = requests.recv() => match envelope {
                Some(envelope) => {
                    let span = info_span!("request", id = envelope.id, kind = envelope.request.kind());
                    in_flight.spawn(handle(envelope, ready_rx.clone()).instrument(span));
                }
                None => {
                    debug!("all proxies dropped");
                    break;
                }
            },
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            _ = shutdown.changed() => {
                debug!("shutdown signal received");
                break;
            }
        }
    }

    // Queued and in-flight requests lose their reply channels here, which
    // their callers observe as `Terminated`.
    requests.close();
    drop(requests);
    in_flight.shutdown().await;
    if building {
        build.abort();
        let _ = build.await;
    }
    // Last references to the bundle; its pool threads are joined here.
    drop(ready_rx);
    drop(ready_tx);
}

async fn handle(envelope: Envelope, mut readiness: watch::Receiver<Option<Readiness>>) {
    let Envelope { id, request, reply } = envelope;

    let ready = match readiness.wait_for(Option::is_some).await {
        Ok(state) => state.clone(),
        Err(_) => return,
    };
    let Some(ready) = ready else {
        return;
    };

    let result = match ready {
        Ok(bundle) => dispatch(&bundle, request).await,
        Err(err) => Err(err),
    };
    if reply.send(result).is_err() {
        debug!(id, "caller dropped before the reply");
    }
}

async fn dispatch(bundle: &CapabilityBundle, request: Request) -> Result<Response, RemoteError> {
    match request {
        Request::Handlers => Ok(Response::Handlers(HandlersInfo::from(bundle))),
        Request::Call {
            variant,
            export,
            args,
        } => {
            let handle = variant_handle(bundle, variant)?;
            handle
                .call(&export, args)
                .await
                .map(Response::Value)
                .map_err(|err| RemoteError::call(&export, &err))
        }
        Request::CallMany {
            variant,
            export,
            batches,
        } => {
            let handle = variant_handle(bundle, variant)?;
            let results = handle
                .call_many(&export, batches)
                .await
                .into_iter()
                .map(|result| result.map_err(|err| RemoteError::call(&export, &err)))
                .collect();
            Ok(Response::Values(results))
        }
    }
}

fn variant_handle(bundle: &CapabilityBundle, variant: Variant) -> Result<&ModuleHandle, RemoteError> {
    bundle
        .variant(variant)
        .ok_or_else(|| RemoteError::VariantUnavailable {
            variant,
            reason: bundle
                .unavailable()
                .map(ToString::to_string)
                .unwrap_or_else(|| "not initialized".to_string()),
        })
}
