use crate::{
    handoff::{RegularSync, SyncStatusQuery},
    sync::{InitialSync, SyncOutcome},
    InitialSyncConfig,
};
use bc_db::BlockStore;
use bc_p2p::P2pApi;
use bp_utils::{
    service::{BeaconServiceId, Service, ServiceContext, ServiceId, ServiceRunner},
    AbortOnDrop,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio_util::sync::CancellationToken;

/// Cooperative stop signal for the initial sync. Only the first call to [StopHandle::stop] has an effect,
/// and it may be called before the service has even started.
#[derive(Clone, Default)]
pub struct StopHandle {
    token: CancellationToken,
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    /// Returns false if the service was already stopped.
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        tracing::info!("Stopping initial sync");
        self.token.cancel();
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct InitialSyncService {
    p2p: Arc<dyn P2pApi>,
    store: Arc<dyn BlockStore>,
    status_query: Arc<dyn SyncStatusQuery>,
    regular_sync: Arc<dyn RegularSync>,
    config: InitialSyncConfig,
    stop: StopHandle,
}

impl InitialSyncService {
    pub fn new(
        p2p: Arc<dyn P2pApi>,
        store: Arc<dyn BlockStore>,
        status_query: Arc<dyn SyncStatusQuery>,
        regular_sync: Arc<dyn RegularSync>,
        config: InitialSyncConfig,
    ) -> Self {
        Self { p2p, store, status_query, regular_sync, config, stop: StopHandle::default() }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// See [StopHandle::stop].
    pub fn stop(&self) -> bool {
        self.stop.stop()
    }

    /// Queries the sync status, then syncs unless the chain is already synced.
    ///
    /// A failing status query is logged and treated as not synced.
    pub async fn run(&self, ctx: ServiceContext) -> SyncOutcome {
        if self.stop.is_stopped() {
            tracing::debug!("Initial sync was stopped before it started");
            return SyncOutcome::Cancelled;
        }

        let mut ctx = ctx.child();
        let ctx1 = ctx.clone();
        let token = self.stop.token.clone();
        let _stopper = AbortOnDrop::spawn(async move {
            token.cancelled().await;
            ctx1.cancel_local();
        });

        match ctx.run_until_cancelled(self.status_query.is_synced()).await {
            None => return SyncOutcome::Cancelled,
            Some(Ok(true)) => {
                tracing::info!("Chain fully synced, exiting initial sync");
                return SyncOutcome::AlreadySynced;
            }
            Some(Ok(false)) => {}
            Some(Err(err)) => tracing::error!("Could not query the sync status, syncing anyway: {err:#}"),
        }

        tracing::info!("⏳ Starting initial sync");
        let sync = InitialSync::new(
            Arc::clone(&self.p2p),
            Arc::clone(&self.store),
            Arc::clone(&self.regular_sync),
            self.config.clone(),
        );
        sync.run(ctx).await
    }
}

#[async_trait::async_trait]
impl Service for InitialSyncService {
    async fn start<'a>(&mut self, runner: ServiceRunner<'a>) -> anyhow::Result<()> {
        let this = self.clone();
        runner.service_loop(move |ctx| async move {
            let outcome = this.run(ctx).await;
            tracing::debug!("Initial sync ended: {outcome:?}");
            anyhow::Ok(())
        });
        Ok(())
    }
}

impl ServiceId for InitialSyncService {
    #[inline(always)]
    fn svc_id(&self) -> BeaconServiceId {
        BeaconServiceId::InitialSync
    }
}
