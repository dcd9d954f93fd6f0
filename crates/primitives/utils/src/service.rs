//! Beacon node services.
//!
//! The node is split into services which each run as their own non-blocking asynchronous task: peer-to-peer
//! networking, initial sync... Services are started by a [ServiceMonitor] and stopped
//! cooperatively through their [ServiceContext].
//!
//! # The [Service] trait
//!
//! A service is started with [Service::start], which receives a [ServiceRunner]. The service should hand its main
//! loop to [ServiceRunner::service_loop]. That future must only complete once the service has _finished_
//! execution, as this is how the [ServiceMonitor] knows the service is no longer running.
//!
//! ```rust
//! # use bp_utils::service::{BeaconServiceId, Service, ServiceId, ServiceRunner};
//! pub struct MyService;
//!
//! #[async_trait::async_trait]
//! impl Service for MyService {
//!     async fn start<'a>(&mut self, runner: ServiceRunner<'a>) -> anyhow::Result<()> {
//!         runner.service_loop(move |mut ctx| async move {
//!             ctx.run_until_cancelled(tokio::time::sleep(std::time::Duration::MAX)).await;
//!             anyhow::Ok(())
//!         });
//!         anyhow::Ok(())
//!     }
//! }
//!
//! impl ServiceId for MyService {
//!     fn svc_id(&self) -> BeaconServiceId {
//!         BeaconServiceId::P2p
//!     }
//! }
//! ```
//!
//! # Cancellation
//!
//! Every service gets a [ServiceContext]. Cancellation is cooperative: services must check
//! [ServiceContext::is_cancelled] or race [ServiceContext::cancelled] at every point where they could block.
//!
//! - [ServiceContext::cancel_global]: cancels all services.
//! - [ServiceContext::cancel_local]: cancels this service and all its children.
//!
//! Services which do not shut down within [SERVICE_GRACE_PERIOD] after cancellation are forcefully dropped.

use anyhow::Context;
use futures::Future;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Debug, Display},
    panic,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::task::JoinSet;

/// Maximum duration a service is allowed to take to shutdown, after which it
/// will be forcefully cancelled
pub const SERVICE_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// The core [Service]s available in the beacon node.
///
/// [BeaconServiceId::Monitor] is the [ServiceMonitor] itself, it is always
/// running and does not occupy a bit in the [ServiceMask].
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeaconServiceId {
    #[default]
    #[serde(skip)]
    Monitor,
    P2p,
    InitialSync,
}

impl BeaconServiceId {
    const ALL: [BeaconServiceId; 2] = [BeaconServiceId::P2p, BeaconServiceId::InitialSync];

    /// Bit associated to this service in a [ServiceMask]. The monitor has none.
    pub fn bit(&self) -> u64 {
        match self {
            Self::Monitor => 0,
            Self::P2p => 1 << 0,
            Self::InitialSync => 1 << 1,
        }
    }
}

impl Display for BeaconServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Monitor => "monitor",
                Self::P2p => "p2p",
                Self::InitialSync => "initial sync",
            }
        )
    }
}

// A boolean status enum, for clarity's sake
#[derive(PartialEq, Eq, Clone, Copy, Default, Debug, Serialize, Deserialize)]
pub enum ServiceStatus {
    On,
    #[default]
    Off,
}

impl From<bool> for ServiceStatus {
    fn from(value: bool) -> Self {
        match value {
            true => Self::On,
            false => Self::Off,
        }
    }
}

impl ServiceStatus {
    #[inline(always)]
    pub fn is_on(&self) -> bool {
        self == &ServiceStatus::On
    }

    #[inline(always)]
    pub fn is_off(&self) -> bool {
        self == &ServiceStatus::Off
    }
}

/// An atomic bitmask of each [BeaconServiceId]'s status with strong
/// [Ordering::SeqCst] cross-thread ordering of operations.
#[repr(transparent)]
#[derive(Default, Debug)]
pub struct ServiceMask(AtomicU64);

impl ServiceMask {
    #[inline(always)]
    pub fn status(&self, svc: impl ServiceId) -> ServiceStatus {
        (self.value() & svc.svc_id().bit() > 0).into()
    }

    #[inline(always)]
    pub fn is_active_some(&self) -> bool {
        self.value() > 0
    }

    /// Returns the previous status of the service.
    #[inline(always)]
    pub fn activate(&self, svc: impl ServiceId) -> ServiceStatus {
        let bit = svc.svc_id().bit();
        let prev = self.0.fetch_or(bit, Ordering::SeqCst);
        (prev & bit > 0).into()
    }

    /// Returns the previous status of the service.
    #[inline(always)]
    pub fn deactivate(&self, svc: impl ServiceId) -> ServiceStatus {
        let bit = svc.svc_id().bit();
        let prev = self.0.fetch_and(!bit, Ordering::SeqCst);
        (prev & bit > 0).into()
    }

    pub fn active_set(&self) -> Vec<BeaconServiceId> {
        let state = self.value();
        BeaconServiceId::ALL.into_iter().filter(|svc| state & svc.bit() > 0).collect()
    }

    fn value(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cancellation context associated to a [Service].
///
/// All contexts derived from the same root context are in the same _global scope_: any of them can cancel every
/// other with [ServiceContext::cancel_global]. [ServiceContext::child] creates a new _local scope_, which can be
/// cancelled with [ServiceContext::cancel_local] without affecting the parent.
///
/// > A parent service can always cancel all of its child services, but a child
/// > service cannot cancel its parent service.
#[derive(Clone)]
pub struct ServiceContext {
    token_global: tokio_util::sync::CancellationToken,
    token_local: Option<tokio_util::sync::CancellationToken>,
    services: Arc<ServiceMask>,
    id: BeaconServiceId,
}

impl Default for ServiceContext {
    fn default() -> Self {
        Self {
            token_global: tokio_util::sync::CancellationToken::new(),
            token_local: None,
            services: Arc::new(ServiceMask::default()),
            id: BeaconServiceId::Monitor,
        }
    }
}

impl ServiceContext {
    /// Creates a new [Default] [ServiceContext]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new [Default] [ServiceContext] with the state of its services
    /// set to the specified value.
    pub fn new_with_services(services: Arc<ServiceMask>) -> Self {
        Self { services, ..Default::default() }
    }

    /// Stops all services under the same global context scope.
    pub fn cancel_global(&self) {
        tracing::info!("🔌 Gracefully shutting down node");

        self.token_global.cancel();
    }

    /// Stops all services under the same local context scope.
    ///
    /// A local context is created by calling [ServiceContext::child] and allows
    /// you to reduce the scope of cancellation only to those services which
    /// will use the new context.
    pub fn cancel_local(&self) {
        self.token_local.as_ref().unwrap_or(&self.token_global).cancel();
    }

    /// A future which completes when the service associated to this
    /// [ServiceContext] is cancelled.
    ///
    /// A service is cancelled after calling [ServiceContext::cancel_local] or
    /// [ServiceContext::cancel_global].
    ///
    /// Use this to race against other futures in a [tokio::select] or keep a
    /// coroutine alive for as long as the service itself.
    #[inline(always)]
    pub async fn cancelled(&mut self) {
        let token_global = &self.token_global;
        let token_local = self.token_local.as_ref().unwrap_or(&self.token_global);

        tokio::select! {
            _ = token_global.cancelled() => {},
            _ = token_local.cancelled() => {},
        }
    }

    /// Checks if the service associated to this [ServiceContext] was cancelled.
    ///
    /// This is only suitable for synchronous checks, or alongside futures which cannot block the service. When
    /// waiting on a channel whose updates may be sparse, race [ServiceContext::cancelled] instead.
    #[inline(always)]
    pub fn is_cancelled(&self) -> bool {
        self.token_global.is_cancelled() || self.token_local.as_ref().map(|t| t.is_cancelled()).unwrap_or(false)
    }

    /// Runs a [Future] until the [Service] associated to this [ServiceContext]
    /// is cancelled.
    ///
    /// The future must be cancel-safe, as it will be dropped at whatever point it is at when the service is
    /// cancelled.
    ///
    /// # Returns
    ///
    /// The return value of the future wrapped in [Some], or [None] if the
    /// service was cancelled.
    pub async fn run_until_cancelled<T, F>(&mut self, f: F) -> Option<T>
    where
        T: Sized + Send + Sync,
        F: Future<Output = T>,
    {
        tokio::select! {
            res = f => Some(res),
            _ = self.cancelled() => None
        }
    }

    /// The id of the [Service] associated to this [ServiceContext]
    pub fn id(&self) -> BeaconServiceId {
        self.id
    }

    /// Sets the id of this [ServiceContext]
    pub fn with_id(mut self, id: impl ServiceId) -> Self {
        self.id = id.svc_id();
        self
    }

    /// Creates a new [ServiceContext] as a child of the current context.
    ///
    /// Any [Service] which uses this new context will be able to cancel the
    /// services in the same local scope as itself, and any further child
    /// services, without affecting the rest of the global scope.
    pub fn child(&self) -> Self {
        let token_local = self.token_local.as_ref().unwrap_or(&self.token_global).child_token();

        Self { token_local: Some(token_local), ..Clone::clone(self) }
    }

    /// Atomically checks if a [Service] is running.
    #[inline(always)]
    pub fn service_status(&self, svc: impl ServiceId) -> ServiceStatus {
        self.services.status(svc)
    }
}

/// A service of the beacon node.
///
/// Services should be started with [ServiceRunner::service_loop].
#[async_trait::async_trait]
pub trait Service: 'static + Send + Sync + ServiceId {
    /// Default impl does not start any task.
    async fn start<'a>(&mut self, _runner: ServiceRunner<'a>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Allows a [Service] to identify itself
pub trait ServiceId {
    fn svc_id(&self) -> BeaconServiceId;
}

impl ServiceId for BeaconServiceId {
    #[inline(always)]
    fn svc_id(&self) -> BeaconServiceId {
        *self
    }
}

#[async_trait::async_trait]
impl Service for Box<dyn Service> {
    async fn start<'a>(&mut self, runner: ServiceRunner<'a>) -> anyhow::Result<()> {
        self.as_mut().start(runner).await
    }
}

impl ServiceId for Box<dyn Service> {
    #[inline(always)]
    fn svc_id(&self) -> BeaconServiceId {
        self.as_ref().svc_id()
    }
}

/// Wrapper around a [tokio::task::JoinSet] and a [ServiceContext].
///
/// Used to enforce certain shutdown behavior onto [Service]s which are started
/// with [ServiceRunner::service_loop]
pub struct ServiceRunner<'a> {
    ctx: ServiceContext,
    join_set: &'a mut JoinSet<anyhow::Result<BeaconServiceId>>,
}

impl<'a> ServiceRunner<'a> {
    fn new(ctx: ServiceContext, join_set: &'a mut JoinSet<anyhow::Result<BeaconServiceId>>) -> Self {
        Self { ctx, join_set }
    }

    /// The main loop of a [Service].
    ///
    /// The future passed to this function should complete _only once the
    /// service completes or is cancelled_.
    ///
    /// > **Caution**
    /// > Services have up to [SERVICE_GRACE_PERIOD] to gracefully shutdown
    /// > after being cancelled before they are forcefully dropped.
    #[tracing::instrument(skip(self, runner), fields(module = "Service"))]
    pub fn service_loop<F, E>(self, runner: impl FnOnce(ServiceContext) -> F + Send + 'static)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<anyhow::Error> + Send,
    {
        let Self { ctx, join_set } = self;
        join_set.spawn(async move {
            let id = ctx.id();
            if id != BeaconServiceId::Monitor {
                tracing::debug!("Starting service with id: {id}");
            }

            // Only fires if a service forgot a cancellation check somewhere.
            let ctx1 = ctx.clone();
            tokio::select! {
                res = runner(ctx) => res.map_err(Into::into)?,
                _ = Self::stopper(ctx1, id) => {},
            }

            if id != BeaconServiceId::Monitor {
                tracing::debug!("Shutting down service with id: {id}");
            }

            Ok(id)
        });
    }

    async fn stopper(mut ctx: ServiceContext, id: BeaconServiceId) {
        ctx.cancelled().await;
        tokio::time::sleep(SERVICE_GRACE_PERIOD).await;

        tracing::warn!("⚠️  Forcefully shutting down service: {id}");
    }
}

/// Orchestrates the execution of the node's [Service]s.
///
/// Services are registered with [ServiceMonitor::with] and are inactive by
/// default. Only services marked with [ServiceMonitor::activate] are started by
/// [ServiceMonitor::start], which then runs until every started service has
/// completed. `SIGINT` and `SIGTERM` cancel all services.
#[derive(Default)]
pub struct ServiceMonitor {
    services: Vec<Box<dyn Service>>,
    join_set: JoinSet<anyhow::Result<BeaconServiceId>>,
    status: Arc<ServiceMask>,
    ctx: ServiceContext,
}

impl ServiceMonitor {
    /// Registers a [Service] to the [ServiceMonitor]. This service is
    /// _inactive_ by default.
    pub fn with(mut self, svc: impl Service) -> anyhow::Result<Self> {
        let id = svc.svc_id();
        if self.services.iter().any(|s| s.svc_id() == id) {
            anyhow::bail!("Service {id} has already been added");
        }
        self.services.push(Box::new(svc));
        anyhow::Ok(self)
    }

    /// Marks a [Service] as active, meaning it will be started automatically
    /// when calling [ServiceMonitor::start].
    pub fn activate(&self, id: impl ServiceId) {
        self.status.activate(id);
    }

    /// Global context of the monitor. Cancelling it stops every service.
    pub fn ctx(&self) -> ServiceContext {
        self.ctx.clone()
    }

    /// Starts all active [Service]s and runs them to completion.
    #[tracing::instrument(skip(self), fields(module = "Service"))]
    pub async fn start(mut self) -> anyhow::Result<()> {
        let ctx = ServiceContext { services: Arc::clone(&self.status), ..self.ctx.clone() };

        for svc in self.services.iter_mut() {
            let id = svc.svc_id();
            if self.status.status(id).is_off() {
                continue;
            }
            let runner = ServiceRunner::new(ctx.child().with_id(id), &mut self.join_set);
            svc.start(runner).await.with_context(|| format!("Starting service {id}"))?;
        }

        if !self.status.is_active_some() {
            tracing::warn!("No service was activated, shutting down");
            return Ok(());
        }

        // SIGINT & SIGTERM
        let signal_ctx = ctx.clone();
        let signals = bp_signal_task(signal_ctx);

        tracing::debug!("Running services: {:?}", self.status.active_set());
        while self.status.is_active_some() {
            let Some(result) = self.join_set.join_next().await else { break };
            match result {
                Ok(result) => {
                    let id = result?;
                    if id == BeaconServiceId::Monitor {
                        continue;
                    }
                    tracing::debug!("Service {id} has shut down");
                    self.status.deactivate(id);
                }
                Err(panic_error) if panic_error.is_panic() => {
                    // bubble up panics too
                    panic::resume_unwind(panic_error.into_panic());
                }
                Err(_task_cancelled_error) => {}
            }
            tracing::debug!("Services still active: {:?}", self.status.active_set());
        }

        signals.abort();
        Ok(())
    }
}

fn bp_signal_task(ctx: ServiceContext) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let sigint = tokio::signal::ctrl_c();
        let sigterm = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => signal.recv().await,
                Err(_) => core::future::pending().await, // SIGTERM not supported
            }
        };

        let mut ctx1 = ctx.clone();
        tokio::select! {
            _ = sigint => ctx.cancel_global(),
            _ = sigterm => ctx.cancel_global(),
            _ = ctx1.cancelled() => {},
        };
    })
}
