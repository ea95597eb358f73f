use std::sync::Arc;

use tokio::runtime::{Handle, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

#[derive(Clone)]
pub struct AppContext {
    pub rt: AnyRuntime,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub enum AnyRuntime {
    Tokio(Arc<Runtime>),
    TokioHandle(Handle),
}

impl AnyRuntime {
    pub fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        match self {
            AnyRuntime::Tokio(rt) => rt.block_on(fut),
            AnyRuntime::TokioHandle(handle) => handle.block_on(fut),
        }
    }

    pub fn spawn<F>(&self, fut: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match self {
            AnyRuntime::Tokio(rt) => rt.spawn(fut),
            AnyRuntime::TokioHandle(handle) => handle.spawn(fut),
        }
    }
}

impl AppContext {
    pub fn new() -> std::io::Result<Self> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        Ok(Self::new_with_runtime(AnyRuntime::Tokio(Arc::new(rt))))
    }

    pub fn new_with_runtime(rt: AnyRuntime) -> Self {
        Self {
            rt,
            shutdown: CancellationToken::new(),
        }
    }

    /// Every long-running loop selects on this token. Child tokens are
    /// cancelled along with it but can also be cancelled on their own.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// This is typically only called from main or tests, it stops the system gracefully
    #[instrument(skip(self), fields(subsys = "AppContext"))]
    pub fn kill(&self) {
        self.shutdown.cancel();
    }

    pub fn killed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
