//! Mutation engine - tagged state machine per attempt
//!
//! ```text
//! mutate(vars) ──▶ attempt #n: Pending ──▶ Success(data) | Error(err)
//!                      │
//!                      └── visible to observers while n is the latest attempt
//! ```
//!
//! Every call starts a new attempt. Starting an attempt makes it the one
//! observers see; an earlier attempt keeps running and resolves its own
//! [`AttemptHandle`], but no longer updates the visible state. The work
//! function receives an [`AttemptGuard`] to check whether it is still the
//! latest attempt before committing shared effects.
//!
//! | Status | `variables` | `data` | `error` |
//! |--------|-------------|--------|---------|
//! | Idle | - | - | - |
//! | Pending | set | - | - |
//! | Success | set | set | - |
//! | Error | set | - | set |

mod connect;
mod disconnect;

pub use connect::{use_connect, ConnectArgs, UseConnect, UseConnectConfig};
pub use disconnect::{use_disconnect, UseDisconnect, UseDisconnectConfig};

use crate::errors::{ConnectError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    #[default]
    Idle,
    Pending,
    Success,
    Error,
}

impl MutationStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, MutationStatus::Success | MutationStatus::Error)
    }
}

/// Snapshot of one attempt. Attempt `0` is the idle state.
#[derive(Debug, Clone)]
pub struct MutationState<V, T> {
    pub attempt: u64,
    pub status: MutationStatus,
    pub variables: Option<V>,
    pub data: Option<T>,
    pub error: Option<ConnectError>,
}

impl<V, T> Default for MutationState<V, T> {
    fn default() -> Self {
        Self { attempt: 0, status: MutationStatus::Idle, variables: None, data: None, error: None }
    }
}

pub type OnMutate<V> = Arc<dyn Fn(&V) + Send + Sync>;
pub type OnSuccess<V, T> = Arc<dyn Fn(&T, &V) + Send + Sync>;
pub type OnError<V> = Arc<dyn Fn(&ConnectError, &V) + Send + Sync>;
pub type OnSettled<V, T> = Arc<dyn Fn(Option<&T>, Option<&ConnectError>, &V) + Send + Sync>;

/// Lifecycle callbacks, invoked for every attempt.
pub struct MutationConfig<V, T> {
    pub on_mutate: Option<OnMutate<V>>,
    pub on_success: Option<OnSuccess<V, T>>,
    pub on_error: Option<OnError<V>>,
    pub on_settled: Option<OnSettled<V, T>>,
}

impl<V, T> Default for MutationConfig<V, T> {
    fn default() -> Self {
        Self { on_mutate: None, on_success: None, on_error: None, on_settled: None }
    }
}

impl<V, T> Clone for MutationConfig<V, T> {
    fn clone(&self) -> Self {
        Self {
            on_mutate: self.on_mutate.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            on_settled: self.on_settled.clone(),
        }
    }
}

impl<V, T> MutationConfig<V, T> {
    pub fn new() -> Self { Self::default() }

    pub fn on_mutate(mut self, f: impl Fn(&V) + Send + Sync + 'static) -> Self {
        self.on_mutate = Some(Arc::new(f));
        self
    }

    pub fn on_success(mut self, f: impl Fn(&T, &V) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&ConnectError, &V) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_settled(mut self, f: impl Fn(Option<&T>, Option<&ConnectError>, &V) + Send + Sync + 'static) -> Self {
        self.on_settled = Some(Arc::new(f));
        self
    }
}

impl<V, T> std::fmt::Debug for MutationConfig<V, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationConfig")
            .field("on_mutate", &self.on_mutate.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_settled", &self.on_settled.is_some())
            .finish()
    }
}

/// Passed to the work function of an attempt.
#[derive(Debug, Clone)]
pub struct AttemptGuard {
    id: u64,
    latest: Arc<AtomicU64>,
}

impl AttemptGuard {
    pub fn id(&self) -> u64 { self.id }

    /// No attempt was started after this one.
    pub fn is_latest(&self) -> bool {
        self.latest.load(Ordering::SeqCst) == self.id
    }
}

/// Observes a single attempt, whether or not it is still visible.
pub struct AttemptHandle<V, T> {
    id: u64,
    rx: watch::Receiver<MutationState<V, T>>,
}

impl<V: Clone, T: Clone> AttemptHandle<V, T> {
    pub fn id(&self) -> u64 { self.id }
    pub fn state(&self) -> MutationState<V, T> { self.rx.borrow().clone() }
    pub fn status(&self) -> MutationStatus { self.rx.borrow().status }
    pub fn data(&self) -> Option<T> { self.rx.borrow().data.clone() }
    pub fn error(&self) -> Option<ConnectError> { self.rx.borrow().error.clone() }
    pub fn variables(&self) -> Option<V> { self.rx.borrow().variables.clone() }

    /// Wait for the attempt to resolve.
    pub async fn settled(&mut self) -> MutationState<V, T> {
        let settled = self.rx.wait_for(|s| s.status.is_settled()).await.map(|s| s.clone());
        match settled {
            Ok(state) => state,
            // Sender gone without settling: the task was aborted.
            Err(_) => self.rx.borrow().clone(),
        }
    }

    /// Wait for the attempt and return its outcome.
    pub async fn result(&mut self) -> Result<T> {
        let state = self.settled().await;
        match (state.data, state.error) {
            (Some(data), _) => Ok(data),
            (None, Some(error)) => Err(error),
            (None, None) => Err(ConnectError::Provider("attempt aborted".into())),
        }
    }
}

struct Shared<V, T> {
    key: &'static str,
    next_id: AtomicU64,
    latest: Arc<AtomicU64>,
    visible: AtomicU64,
    state: watch::Sender<MutationState<V, T>>,
    config: MutationConfig<V, T>,
}

struct Attempt<V, T> {
    guard: AttemptGuard,
    tx: watch::Sender<MutationState<V, T>>,
    variables: V,
}

/// Runs attempts and exposes the visible one.
pub struct Mutation<V, T> {
    shared: Arc<Shared<V, T>>,
}

impl<V, T> Clone for Mutation<V, T> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<V, T> Mutation<V, T>
where
    V: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// `key` names the mutation in logs.
    pub fn new(key: &'static str, config: MutationConfig<V, T>) -> Self {
        let (state, _) = watch::channel(MutationState::default());
        Self {
            shared: Arc::new(Shared {
                key,
                next_id: AtomicU64::new(0),
                latest: Arc::new(AtomicU64::new(0)),
                visible: AtomicU64::new(0),
                state,
                config,
            }),
        }
    }

    pub fn key(&self) -> &'static str { self.shared.key }
    pub fn state(&self) -> MutationState<V, T> { self.shared.state.borrow().clone() }
    pub fn status(&self) -> MutationStatus { self.shared.state.borrow().status }
    pub fn data(&self) -> Option<T> { self.shared.state.borrow().data.clone() }
    pub fn error(&self) -> Option<ConnectError> { self.shared.state.borrow().error.clone() }
    pub fn variables(&self) -> Option<V> { self.shared.state.borrow().variables.clone() }

    pub fn is_idle(&self) -> bool { self.status() == MutationStatus::Idle }
    pub fn is_loading(&self) -> bool { self.status() == MutationStatus::Pending }
    pub fn is_success(&self) -> bool { self.status() == MutationStatus::Success }
    pub fn is_error(&self) -> bool { self.status() == MutationStatus::Error }

    /// Receiver of the visible state.
    pub fn watch(&self) -> watch::Receiver<MutationState<V, T>> { self.shared.state.subscribe() }

    /// Hide the current attempt. In-flight work is not cancelled.
    pub fn reset(&self) {
        self.shared.visible.store(0, Ordering::SeqCst);
        self.shared.state.send_replace(MutationState::default());
    }

    /// Start an attempt and drive it on the tokio runtime.
    pub fn mutate<F, Fut>(&self, variables: V, f: F) -> AttemptHandle<V, T>
    where
        F: FnOnce(V, AttemptGuard) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (attempt, handle) = self.begin(variables);
        let this = self.clone();
        tokio::spawn(async move {
            let _ = this.execute(attempt, f).await;
        });
        handle
    }

    /// Start an attempt and await its outcome.
    pub async fn mutate_async<F, Fut>(&self, variables: V, f: F) -> Result<T>
    where
        F: FnOnce(V, AttemptGuard) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (attempt, _handle) = self.begin(variables);
        self.execute(attempt, f).await
    }

    fn begin(&self, variables: V) -> (Attempt<V, T>, AttemptHandle<V, T>) {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.latest.store(id, Ordering::SeqCst);
        self.shared.visible.store(id, Ordering::SeqCst);

        let pending = MutationState {
            attempt: id,
            status: MutationStatus::Pending,
            variables: Some(variables.clone()),
            data: None,
            error: None,
        };
        let (tx, rx) = watch::channel(pending.clone());
        self.publish(pending);
        debug!(mutation = self.shared.key, attempt = id, "mutation started");

        if let Some(on_mutate) = &self.shared.config.on_mutate {
            on_mutate(&variables);
        }
        let guard = AttemptGuard { id, latest: self.shared.latest.clone() };
        (Attempt { guard, tx, variables }, AttemptHandle { id, rx })
    }

    async fn execute<F, Fut>(&self, attempt: Attempt<V, T>, f: F) -> Result<T>
    where
        F: FnOnce(V, AttemptGuard) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Attempt { guard, tx, variables } = attempt;
        let id = guard.id();
        let result = f(variables.clone(), guard).await;

        let settled = MutationState {
            attempt: id,
            status: if result.is_ok() { MutationStatus::Success } else { MutationStatus::Error },
            variables: Some(variables.clone()),
            data: result.as_ref().ok().cloned(),
            error: result.as_ref().err().cloned(),
        };
        tx.send_replace(settled.clone());
        self.publish(settled);

        let config = &self.shared.config;
        match &result {
            Ok(data) => {
                debug!(mutation = self.shared.key, attempt = id, "mutation succeeded");
                if let Some(on_success) = &config.on_success {
                    on_success(data, &variables);
                }
            }
            Err(error) => {
                debug!(mutation = self.shared.key, attempt = id, %error, "mutation failed");
                if let Some(on_error) = &config.on_error {
                    on_error(error, &variables);
                }
            }
        }
        if let Some(on_settled) = &config.on_settled {
            on_settled(result.as_ref().ok(), result.as_ref().err(), &variables);
        }
        result
    }

    /// Replace the visible state if `state` belongs to the visible attempt.
    fn publish(&self, state: MutationState<V, T>) {
        let visible = &self.shared.visible;
        self.shared.state.send_if_modified(|current| {
            if visible.load(Ordering::SeqCst) != state.attempt {
                return false;
            }
            *current = state;
            true
        });
    }
}
