// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The ingestion fabric: one OS thread, one current-thread runtime, one
//! `LocalSet`, owning every Telegram client in the process.
//!
//! Telegram sessions are pinned to the loop that created them and break
//! when driven from another. [`FabricHandle::submit`] is therefore the
//! only bridge: other threads (the HTTP gateway, the scheduler) enqueue a
//! job and block on the returned future, mirroring the
//! run-coroutine-on-external-loop discipline this design requires.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use grapevine_core::GrapevineError;
use grapevine_core::traits::{Cache, TelegramConnector};
use grapevine_core::types::TelegramCredentials;
use grapevine_store::Database;
use grapevine_vault::Vault;

use crate::registry::SessionRegistry;

/// How long shutdown waits for in-flight jobs.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Everything needed to build the registry on the fabric thread.
pub struct FabricSeed {
    pub connector: Arc<dyn TelegramConnector>,
    pub db: Database,
    pub vault: Arc<Vault>,
    pub cache: Arc<dyn Cache>,
    pub sessions_dir: PathBuf,
    pub master_credentials: Option<TelegramCredentials>,
}

/// State visible to jobs running on the fabric thread.
pub struct FabricContext {
    pub registry: Rc<SessionRegistry>,
}

type FabricJob = Box<dyn FnOnce(Rc<FabricContext>) -> LocalBoxFuture<'static, ()> + Send>;

/// Cross-thread handle into the ingestion loop.
#[derive(Clone)]
pub struct FabricHandle {
    tx: mpsc::UnboundedSender<FabricJob>,
    thread_id: ThreadId,
}

impl FabricHandle {
    /// Run `f` on the ingestion loop and await its result.
    ///
    /// The closure is sent across threads; the future it builds runs
    /// entirely on the fabric thread, so it may touch loop-pinned state.
    pub async fn submit<F, Fut, T>(&self, f: F) -> Result<T, GrapevineError>
    where
        F: FnOnce(Rc<FabricContext>) -> Fut + Send + 'static,
        Fut: Future<Output = T> + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: FabricJob = Box::new(move |ctx| {
            Box::pin(async move {
                let _ = tx.send(f(ctx).await);
            })
        });
        self.tx
            .send(job)
            .map_err(|_| GrapevineError::Internal("ingestion loop is gone".to_string()))?;
        rx.await
            .map_err(|_| GrapevineError::Internal("ingestion job dropped".to_string()))
    }

    /// The ingestion loop's thread id, for pinning assertions.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }
}

/// The running ingestion loop.
pub struct Fabric {
    handle: FabricHandle,
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl Fabric {
    /// Spawn the fabric thread and build the session registry on it.
    pub fn spawn(seed: FabricSeed) -> Result<Self, GrapevineError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<FabricJob>();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<ThreadId>();

        let join = std::thread::Builder::new()
            .name("grapevine-ingest".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!(error = %e, "failed to build ingestion runtime");
                        return;
                    }
                };
                let _ = ready_tx.send(std::thread::current().id());

                let local = tokio::task::LocalSet::new();
                local.block_on(&runtime, async move {
                    let registry = Rc::new(SessionRegistry::new(
                        seed.connector,
                        seed.db,
                        seed.vault,
                        seed.cache,
                        seed.sessions_dir,
                        seed.master_credentials,
                    ));
                    let ctx = Rc::new(FabricContext { registry });
                    let in_flight = Rc::new(RefCell::new(0usize));

                    info!("ingestion loop started");
                    loop {
                        tokio::select! {
                            _ = &mut shutdown_rx => break,
                            job = rx.recv() => {
                                let Some(job) = job else { break };
                                let ctx = Rc::clone(&ctx);
                                let in_flight = Rc::clone(&in_flight);
                                *in_flight.borrow_mut() += 1;
                                tokio::task::spawn_local(async move {
                                    job(ctx).await;
                                    *in_flight.borrow_mut() -= 1;
                                });
                            }
                        }
                    }

                    // Channel closed: drain in-flight jobs within the grace
                    // period, then let everything drop.
                    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
                    while *in_flight.borrow() > 0 && tokio::time::Instant::now() < deadline {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                    let leftover = *in_flight.borrow();
                    if leftover > 0 {
                        warn!(leftover, "shutdown grace expired with jobs in flight");
                    }
                    ctx.registry.disconnect_all().await;
                    info!("ingestion loop stopped");
                });
            })
            .map_err(|e| GrapevineError::Internal(format!("failed to spawn fabric: {e}")))?;

        let thread_id = ready_rx
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| GrapevineError::Internal("ingestion loop failed to start".to_string()))?;

        Ok(Self {
            handle: FabricHandle { tx, thread_id },
            shutdown_tx: Some(shutdown_tx),
            join: Some(join),
        })
    }

    /// A cloneable handle for other threads.
    pub fn handle(&self) -> FabricHandle {
        self.handle.clone()
    }

    /// Stop accepting jobs, drain in-flight work within the grace period,
    /// and join the loop thread. Jobs submitted through outstanding handle
    /// clones after this point fail with an error.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
