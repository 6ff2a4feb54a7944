//! The RPC manager: correlates outbound requests with inbound responses.
//!
//! Each call gets a fresh correlation id, which travels as the request's
//! `rtype` and comes back as the response's `etype`. Until the answer
//! arrives the call sits in a pending table:
//!
//! ```text
//!                 ┌──complete()──→ [Fulfilled | Failed]
//! issue() ──→ [Pending] ──timer──→ [TimedOut]
//!                 └──cancel()────→ [Cancelled]
//! ```
//!
//! All four outcomes are terminal and exactly one is reached: whichever of
//! `complete`, `cancel` or the timer removes the entry from the table
//! first wins, and the others find nothing and do nothing.
//!
//! # Concurrency note
//!
//! The table is one `HashMap` behind one mutex. The lock is held only to
//! insert or remove an entry; waking the caller and aborting the timer
//! happen after it's released.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use vmp_protocol::{Map, RpcRequest, RpcResponse, Value};

use crate::{RpcConfig, RpcError};

type Outcome = Result<RpcResponse, RpcError>;

/// One in-flight call.
struct PendingRequest {
    tx: oneshot::Sender<Outcome>,
    /// `None` until the request has been sent.
    timer: Option<JoinHandle<()>>,
    /// Method name, for logging.
    method: String,
    issued_at: Instant,
}

impl PendingRequest {
    /// Stops the timer and hands the outcome to the waiting caller.
    fn resolve(mut self, outcome: Outcome) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        // The caller may have stopped waiting. Nothing to do then.
        let _ = self.tx.send(outcome);
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    issued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
}

/// A snapshot of the manager's lifetime counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RpcStats {
    /// Requests that became pending.
    pub issued: u64,
    /// Requests answered with a success.
    pub completed: u64,
    /// Requests answered with an error.
    pub failed: u64,
    pub timed_out: u64,
    /// Requests cancelled explicitly or abandoned by their caller.
    pub cancelled: u64,
}

// ---------------------------------------------------------------------------
// RpcManager
// ---------------------------------------------------------------------------

struct Inner {
    pending: Mutex<HashMap<String, PendingRequest>>,
    config: RpcConfig,
    counters: Counters,
}

impl Inner {
    fn take(&self, id: &str) -> Option<PendingRequest> {
        self.pending.lock().remove(id)
    }

    fn expire(&self, id: &str, timeout: Duration) {
        let Some(mut entry) = self.take(id) else {
            return;
        };
        // This runs on the timer task itself; detach rather than abort.
        entry.timer = None;
        self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(%id, method = %entry.method, ?timeout, "rpc request timed out");
        entry.resolve(Err(RpcError::Timeout {
            id: id.to_owned(),
            timeout,
        }));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for entry in self.pending.get_mut().values_mut() {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
    }
}

/// Tracks every in-flight RPC call for one connection.
///
/// Cloning is cheap and every clone sees the same table, so one clone can
/// sit in the inbound dispatch loop while others issue calls.
///
/// The manager owns correlation only. Delivery is the caller's business:
/// [`issue`](Self::issue) hands the request to a synchronous `send`
/// function and never touches a transport itself.
#[derive(Clone)]
pub struct RpcManager {
    inner: Arc<Inner>,
}

impl Default for RpcManager {
    fn default() -> Self {
        Self::new(RpcConfig::default())
    }
}

impl std::fmt::Debug for RpcManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcManager")
            .field("config", &self.inner.config)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl RpcManager {
    pub fn new(config: RpcConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(HashMap::new()),
                config,
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    /// Issues a call and returns a handle that resolves with the answer.
    ///
    /// The request is registered as pending, then passed to `send`. If
    /// `send` fails the entry is removed again and no timer ever starts.
    /// Otherwise the timeout (`timeout`, or the configured default) starts
    /// counting once `send` returns.
    ///
    /// Must be called from inside a Tokio runtime, which drives the timer.
    ///
    /// # Errors
    /// - [`RpcError::Send`] if `send` fails
    /// - [`RpcError::NoRuntime`] outside a Tokio runtime
    pub fn issue<F, E>(
        &self,
        method: impl Into<String>,
        args: Option<Vec<Value>>,
        kwargs: Option<Map>,
        timeout: Option<Duration>,
        send: F,
    ) -> Result<ResponseHandle, RpcError>
    where
        F: FnOnce(&RpcRequest) -> Result<(), E>,
        E: Display,
    {
        let method = method.into();
        let id = generate_id(&self.inner.config.id_prefix);
        let timeout = timeout.unwrap_or(self.inner.config.default_timeout);

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| RpcError::NoRuntime { id: id.clone() })?;

        let mut request = RpcRequest::new(method.clone(), id.clone());
        request.args = args;
        request.kwargs = kwargs;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(
            id.clone(),
            PendingRequest {
                tx,
                timer: None,
                method: method.clone(),
                issued_at: Instant::now(),
            },
        );

        if let Err(err) = send(&request) {
            self.inner.take(&id);
            let reason = err.to_string();
            tracing::warn!(%id, %method, %reason, "rpc send failed");
            return Err(RpcError::Send { id, reason });
        }

        self.inner.counters.issued.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%id, %method, ?timeout, "rpc request issued");

        let weak = Arc::downgrade(&self.inner);
        let timer_id = id.clone();
        let timer = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire(&timer_id, timeout);
            }
        });

        // A response may already have arrived while `send` ran.
        match self.inner.pending.lock().get_mut(&id) {
            Some(entry) => entry.timer = Some(timer),
            None => timer.abort(),
        }

        Ok(ResponseHandle {
            id,
            rx,
            manager: Arc::downgrade(&self.inner),
            resolved: false,
        })
    }

    /// Issues a call and waits for the answer.
    ///
    /// A response carrying an error resolves to [`RpcError::Remote`].
    pub async fn call<F, E>(
        &self,
        method: impl Into<String>,
        args: Option<Vec<Value>>,
        kwargs: Option<Map>,
        timeout: Option<Duration>,
        send: F,
    ) -> Result<RpcResponse, RpcError>
    where
        F: FnOnce(&RpcRequest) -> Result<(), E>,
        E: Display,
    {
        self.issue(method, args, kwargs, timeout, send)?.await
    }

    /// Delivers a response to the call it answers.
    ///
    /// Returns `false` if no call is pending under `response.etype`. That
    /// isn't an error: a shared dispatch loop can offer every inbound
    /// message here first and fall through to other handlers.
    pub fn complete(&self, response: RpcResponse) -> bool {
        let Some(entry) = self.inner.take(&response.etype) else {
            tracing::debug!(etype = %response.etype, "no pending request for response");
            return false;
        };

        let id = response.etype.clone();
        let elapsed_ms = entry.issued_at.elapsed().as_millis() as u64;
        let outcome = match response.error_message() {
            Some(message) => {
                self.inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    %id,
                    method = %entry.method,
                    elapsed_ms,
                    %message,
                    "rpc request failed remotely"
                );
                Err(RpcError::Remote { id, message })
            }
            None => {
                self.inner.counters.completed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%id, method = %entry.method, elapsed_ms, "rpc request completed");
                Ok(response)
            }
        };
        entry.resolve(outcome);
        true
    }

    /// Fails a pending call whose answer arrived but couldn't be read.
    /// Returns `false` if nothing is pending under `id`.
    pub fn reject(&self, id: &str, reason: impl Into<String>) -> bool {
        let Some(entry) = self.inner.take(id) else {
            return false;
        };
        let reason = reason.into();
        self.inner.counters.failed.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(%id, method = %entry.method, %reason, "rpc response unreadable");
        entry.resolve(Err(RpcError::Malformed {
            id: id.to_owned(),
            reason,
        }));
        true
    }

    /// Cancels one pending call. Returns `false` if it had already
    /// resolved (or never existed).
    pub fn cancel(&self, id: &str) -> bool {
        let Some(entry) = self.inner.take(id) else {
            return false;
        };
        self.inner.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%id, method = %entry.method, "rpc request cancelled");
        entry.resolve(Err(RpcError::Cancelled { id: id.to_owned() }));
        true
    }

    /// Cancels every pending call, e.g. on disconnect. Returns how many
    /// were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(String, PendingRequest)> = self.inner.pending.lock().drain().collect();
        let count = drained.len();

        for (id, entry) in drained {
            entry.resolve(Err(RpcError::Cancelled { id }));
        }
        self.inner
            .counters
            .cancelled
            .fetch_add(count as u64, Ordering::Relaxed);

        if count > 0 {
            tracing::info!(count, "cancelled all pending rpc requests");
        }
        count
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.inner.pending.lock().contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn stats(&self) -> RpcStats {
        let c = &self.inner.counters;
        RpcStats {
            issued: c.issued.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// ResponseHandle
// ---------------------------------------------------------------------------

/// The caller's side of one pending call. Await it for the answer.
///
/// Dropping an unresolved handle withdraws the call: its entry is removed
/// and a late response will find nothing.
#[must_use = "dropping the handle withdraws the call"]
pub struct ResponseHandle {
    id: String,
    rx: oneshot::Receiver<Outcome>,
    manager: Weak<Inner>,
    resolved: bool,
}

impl ResponseHandle {
    /// The correlation id, as sent in the request's `rtype`.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("id", &self.id)
            .field("resolved", &self.resolved)
            .finish()
    }
}

impl Future for ResponseHandle {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let outcome = match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(outcome)) => outcome,
            // The sender only disappears without a word when the manager
            // itself is dropped.
            Poll::Ready(Err(_)) => Err(RpcError::Closed {
                id: this.id.clone(),
            }),
        };
        this.resolved = true;
        Poll::Ready(outcome)
    }
}

impl Drop for ResponseHandle {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        let Some(inner) = self.manager.upgrade() else {
            return;
        };
        if let Some(mut entry) = inner.take(&self.id) {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
            inner.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                id = %self.id,
                method = %entry.method,
                "rpc request abandoned by caller"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `prefix` followed by 32 lowercase hex characters (128 random bits).
fn generate_id(prefix: &str) -> String {
    let bytes: [u8; 16] = rand::rng().random();
    let mut id = String::with_capacity(prefix.len() + 32);
    id.push_str(prefix);
    for b in bytes {
        id.push_str(&format!("{b:02x}"));
    }
    id
}

/// Generates a correlation id with the default `rpc-` prefix.
pub fn generate_request_id() -> String {
    generate_id(&RpcConfig::default().id_prefix)
}

/// Builds a request with a fresh correlation id, without tracking it.
pub fn create_rpc_request(
    method: impl Into<String>,
    args: Option<Vec<Value>>,
    kwargs: Option<Map>,
) -> RpcRequest {
    let mut request = RpcRequest::new(method, generate_request_id());
    request.args = args;
    request.kwargs = kwargs;
    request
}

/// Builds the response to `request_id` from a handler's result.
pub fn create_rpc_response<E: Display>(
    request_id: impl Into<String>,
    result: Result<Value, E>,
) -> RpcResponse {
    RpcResponse::from_result(request_id, result)
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for `RpcManager`, named `test_{function}_{scenario}_{expected}`.
    //!
    //! Timeout tests run with `start_paused = true`: Tokio's clock only
    //! moves when every task is idle, and then jumps straight to the next
    //! timer, so a 50ms timeout costs no wall-clock time.

    use std::convert::Infallible;

    use super::*;

    // -- Helpers ----------------------------------------------------------

    fn sent_ok(_: &RpcRequest) -> Result<(), Infallible> {
        Ok(())
    }

    fn issue(manager: &RpcManager, timeout_ms: u64) -> ResponseHandle {
        manager
            .issue(
                "render",
                None,
                None,
                Some(Duration::from_millis(timeout_ms)),
                sent_ok,
            )
            .expect("issue should succeed")
    }

    // =====================================================================
    // ids
    // =====================================================================

    #[test]
    fn test_generate_request_id_prefix_and_hex() {
        let id = generate_request_id();
        let hex = id.strip_prefix("rpc-").expect("rpc- prefix");
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_generate_request_id_is_unique() {
        assert_ne!(generate_request_id(), generate_request_id());
    }

    #[test]
    fn test_create_rpc_request_sets_correlation_id() {
        let request = create_rpc_request("render", Some(vec![Value::from(1)]), None);
        assert_eq!(request.etype, "render");
        assert!(request.rtype.starts_with("rpc-"));
        assert_eq!(request.args, Some(vec![Value::from(1)]));
    }

    #[test]
    fn test_create_rpc_response_maps_result() {
        let ok = create_rpc_response("rpc-1", Ok::<_, String>(Value::from(2)));
        assert_eq!(ok.ok, Some(true));
        let err = create_rpc_response("rpc-1", Err("bad"));
        assert_eq!(err.error.as_deref(), Some("bad"));
    }

    // =====================================================================
    // issue()
    // =====================================================================

    #[tokio::test]
    async fn test_issue_sends_request_with_correlation_id() {
        let manager = RpcManager::default();
        let mut sent = None;

        let handle = manager
            .issue("render", None, None, None, |request: &RpcRequest| {
                sent = Some(request.clone());
                Ok::<_, Infallible>(())
            })
            .unwrap();

        let sent = sent.expect("send was called");
        assert_eq!(sent.etype, "render");
        assert_eq!(sent.rtype, handle.id());
        assert!(manager.is_pending(handle.id()));
        assert_eq!(manager.stats().issued, 1);
    }

    #[tokio::test]
    async fn test_issue_send_failure_removes_entry() {
        let manager = RpcManager::default();

        let err = manager
            .issue("render", None, None, None, |_: &RpcRequest| Err("socket closed"))
            .unwrap_err();

        assert!(matches!(&err, RpcError::Send { reason, .. } if reason == "socket closed"));
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(manager.stats().issued, 0);
    }

    #[test]
    fn test_issue_outside_runtime_fails() {
        let manager = RpcManager::default();
        let err = manager.issue("render", None, None, None, sent_ok).unwrap_err();
        assert!(matches!(err, RpcError::NoRuntime { .. }));
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_issue_response_during_send_is_delivered() {
        let manager = RpcManager::default();
        let responder = manager.clone();

        let handle = manager
            .issue("echo", None, None, None, |request: &RpcRequest| {
                responder.complete(RpcResponse::success(request.rtype.clone(), "fast"));
                Ok::<_, Infallible>(())
            })
            .unwrap();

        let response = handle.await.unwrap();
        assert_eq!(response.data, Some(Value::from("fast")));
    }

    // =====================================================================
    // complete()
    // =====================================================================

    #[tokio::test]
    async fn test_complete_resolves_caller() {
        let manager = RpcManager::default();
        let handle = issue(&manager, 1000);
        let id = handle.id().to_owned();

        assert!(manager.complete(RpcResponse::success(id.clone(), 42)));

        let response = handle.await.unwrap();
        assert_eq!(response.etype, id);
        assert_eq!(response.data, Some(Value::from(42)));
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(manager.stats().completed, 1);
    }

    #[tokio::test]
    async fn test_complete_unknown_id_returns_false() {
        let manager = RpcManager::default();
        assert!(!manager.complete(RpcResponse::success("rpc-nobody", 1)));
    }

    #[tokio::test]
    async fn test_complete_error_response_fails_caller() {
        let manager = RpcManager::default();
        let handle = issue(&manager, 1000);
        let id = handle.id().to_owned();

        assert!(manager.complete(RpcResponse::failure(id.clone(), "no such method")));

        assert_eq!(
            handle.await.unwrap_err(),
            RpcError::Remote {
                id,
                message: "no such method".into()
            }
        );
        assert_eq!(manager.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_complete_twice_second_returns_false() {
        let manager = RpcManager::default();
        let handle = issue(&manager, 1000);
        let id = handle.id().to_owned();

        assert!(manager.complete(RpcResponse::success(id.clone(), 1)));
        assert!(!manager.complete(RpcResponse::success(id, 2)));
        assert_eq!(handle.await.unwrap().data, Some(Value::from(1)));
    }

    #[tokio::test]
    async fn test_reject_fails_caller_as_malformed() {
        let manager = RpcManager::default();
        let handle = issue(&manager, 1000);
        let id = handle.id().to_owned();

        assert!(manager.reject(&id, "ok must be a bool"));
        assert!(!manager.reject(&id, "again"));

        assert_eq!(
            handle.await.unwrap_err(),
            RpcError::Malformed {
                id,
                reason: "ok must be a bool".into()
            }
        );
        assert_eq!(manager.stats().failed, 1);
        assert_eq!(manager.pending_count(), 0);
    }

    // =====================================================================
    // cancel() / cancel_all()
    // =====================================================================

    #[tokio::test]
    async fn test_cancel_twice_second_returns_false() {
        let manager = RpcManager::default();
        let handle = issue(&manager, 1000);
        let id = handle.id().to_owned();

        assert!(manager.cancel(&id));
        assert!(!manager.cancel(&id));

        assert_eq!(handle.await.unwrap_err(), RpcError::Cancelled { id });
        assert_eq!(manager.stats().cancelled, 1);
    }

    #[tokio::test]
    async fn test_cancel_leaves_other_requests_pending() {
        let manager = RpcManager::default();
        let a = issue(&manager, 1000);
        let b = issue(&manager, 1000);

        assert!(manager.cancel(a.id()));
        assert!(manager.is_pending(b.id()));
        assert!(a.await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_all_fails_every_caller() {
        let manager = RpcManager::default();
        let handles: Vec<_> = (0..3).map(|_| issue(&manager, 1000)).collect();

        assert_eq!(manager.cancel_all(), 3);
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(manager.cancel_all(), 0);

        for handle in handles {
            assert!(matches!(handle.await, Err(RpcError::Cancelled { .. })));
        }
    }

    // =====================================================================
    // timeout
    // =====================================================================

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_once_and_late_complete_is_ignored() {
        let manager = RpcManager::default();
        let handle = issue(&manager, 50);
        let id = handle.id().to_owned();

        let err = handle.await.unwrap_err();

        assert_eq!(
            err,
            RpcError::Timeout {
                id: id.clone(),
                timeout: Duration::from_millis(50)
            }
        );
        assert!(err.is_retryable());
        assert!(!manager.is_pending(&id));
        assert!(!manager.complete(RpcResponse::success(id.clone(), 1)));
        assert!(!manager.cancel(&id));
        assert_eq!(manager.stats().timed_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_uses_configured_default() {
        let manager = RpcManager::new(RpcConfig {
            default_timeout: Duration::from_secs(2),
            ..RpcConfig::default()
        });
        let started = Instant::now();

        let handle = manager.issue("slow", None, None, None, sent_ok).unwrap();
        assert!(matches!(handle.await, Err(RpcError::Timeout { .. })));
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_before_timeout_stops_timer() {
        let manager = RpcManager::default();
        let handle = issue(&manager, 50);
        let id = handle.id().to_owned();

        assert!(manager.complete(RpcResponse::success(id, 1)));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(handle.await.is_ok());
        assert_eq!(manager.stats().timed_out, 0);
    }

    // =====================================================================
    // ResponseHandle
    // =====================================================================

    #[tokio::test]
    async fn test_drop_handle_withdraws_request() {
        let manager = RpcManager::default();
        let handle = issue(&manager, 1000);
        let id = handle.id().to_owned();

        drop(handle);

        assert!(!manager.is_pending(&id));
        assert!(!manager.complete(RpcResponse::success(id, 1)));
    }

    #[tokio::test]
    async fn test_manager_dropped_resolves_closed() {
        let manager = RpcManager::default();
        let handle = issue(&manager, 1000);

        drop(manager);

        assert!(matches!(handle.await, Err(RpcError::Closed { .. })));
    }
}
