//! Bounded retry with reconnect for transport calls.
//!
//! Three pieces compose here:
//! - [`classify`]: a fixed rule table deciding whether an error is transient
//! - [`RetryPolicy`]: attempt budget, delay, and the retry/give-up decision
//! - [`reconnect`]: tears the session down and opens a fresh one
//!
//! [`execute_with_retry`] runs one operation under those rules. Every call owns
//! its own attempt counter, so nested or sequential calls never interfere.

use super::{RemoteEntry, Transport, TransportError, TransportErrorKind};
use futures_util::future::BoxFuture;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Error kinds that indicate a broken or unreachable session.
const TRANSIENT_KINDS: &[TransportErrorKind] = &[
    TransportErrorKind::ConnectionReset,
    TransportErrorKind::ConnectionRefused,
    TransportErrorKind::Timeout,
    TransportErrorKind::Dns,
    TransportErrorKind::Disconnected,
];

/// Message fragments that mark an otherwise unclassified error as a
/// connection problem. Matched case-insensitively.
const CONNECTION_MARKERS: &[&str] = &[
    "connection",
    "timed out",
    "timeout",
    "reset",
    "refused",
    "broken pipe",
    "getaddrinfo",
    "not connected",
    "socket",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Fatal,
}

/// Classify a transport error as transient (worth reconnecting for) or fatal.
pub fn classify(err: &TransportError) -> ErrorClass {
    if TRANSIENT_KINDS.contains(&err.kind) {
        return ErrorClass::Transient;
    }

    if err.kind == TransportErrorKind::Other {
        let message = err.message.to_lowercase();
        if CONNECTION_MARKERS.iter().any(|marker| message.contains(marker)) {
            return ErrorClass::Transient;
        }
    }

    ErrorClass::Fatal
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, reconnect, and run the operation again.
    Retry { delay: Duration },
    /// Transient failure with no attempts left.
    Exhausted,
    /// Hand the error back to the caller unchanged.
    Propagate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub reconnect: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(1000),
            reconnect: true,
        }
    }
}

impl RetryPolicy {
    /// Decide the follow-up for a failure on `attempt` (1-based).
    pub fn decide(&self, attempt: u32, class: ErrorClass) -> RetryDecision {
        match class {
            ErrorClass::Fatal => RetryDecision::Propagate,
            ErrorClass::Transient if !self.reconnect => RetryDecision::Propagate,
            ErrorClass::Transient if attempt < self.max_attempts => RetryDecision::Retry { delay: self.delay },
            ErrorClass::Transient => RetryDecision::Exhausted,
        }
    }

    /// A failed reconnect ends the operation when no later attempt could
    /// retry again.
    pub fn reconnect_failure_is_final(&self, attempt: u32) -> bool {
        attempt + 1 >= self.max_attempts
    }
}

/// Replace the transport session with a fresh one.
pub async fn reconnect<T: Transport + ?Sized>(transport: &mut T) -> Result<(), TransportError> {
    transport.close().await;
    transport.connect().await
}

fn exhausted(label: &str, attempts: u32, last: Option<&TransportError>) -> TransportError {
    let message = match last {
        Some(err) => format!("{} failed after {} attempts: {}", label, attempts, err),
        None => format!("{} failed after {} attempts", label, attempts),
    };
    TransportError::new(TransportErrorKind::RetriesExhausted, message)
}

/// Run `op` against `transport`, retrying transient failures per `policy`.
pub async fn execute_with_retry<T, R, F>(
    transport: &mut T,
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<R, TransportError>
where
    T: Transport + ?Sized,
    F: for<'a> FnMut(&'a mut T) -> BoxFuture<'a, Result<R, TransportError>>,
{
    // Failed attempts after a failed reconnect only report "not connected"
    let mut first_transient: Option<TransportError> = None;

    for attempt in 1..=policy.max_attempts {
        let err = match op(&mut *transport).await {
            Ok(value) => {
                if attempt > 1 {
                    info!("{} succeeded on attempt {}/{}", label, attempt, policy.max_attempts);
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        match policy.decide(attempt, classify(&err)) {
            RetryDecision::Propagate => return Err(err),
            RetryDecision::Exhausted => return Err(exhausted(label, policy.max_attempts, Some(&err))),
            RetryDecision::Retry { delay } => {
                warn!(
                    "Connection problem during {} (attempt {}/{}): {}. Reconnecting in {}ms...",
                    label,
                    attempt,
                    policy.max_attempts,
                    err,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                let original = first_transient.get_or_insert(err);

                if let Err(reconnect_err) = reconnect(&mut *transport).await {
                    warn!("Reconnect during {} failed: {}", label, reconnect_err);
                    if policy.reconnect_failure_is_final(attempt) {
                        return Err(original.clone());
                    }
                }
            }
        }
    }

    Err(exhausted(label, policy.max_attempts, None))
}

/// A transport paired with a retry policy, exposing the transport operations
/// with retry applied.
pub struct RetryExecutor<'t, T: Transport + ?Sized> {
    transport: &'t mut T,
    policy: RetryPolicy,
}

impl<'t, T: Transport + ?Sized> RetryExecutor<'t, T> {
    pub fn new(transport: &'t mut T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub async fn execute<R, F>(&mut self, label: &str, op: F) -> Result<R, TransportError>
    where
        F: for<'a> FnMut(&'a mut T) -> BoxFuture<'a, Result<R, TransportError>>,
    {
        execute_with_retry(&mut *self.transport, &self.policy, label, op).await
    }

    pub async fn list_directory(&mut self, path: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let label = format!("list {}", path);
        self.execute(&label, |t| {
            let path = path.to_string();
            Box::pin(async move { t.list_directory(&path).await })
        })
        .await
    }

    pub async fn file_size(&mut self, path: &str) -> Result<Option<u64>, TransportError> {
        let label = format!("size {}", path);
        self.execute(&label, |t| {
            let path = path.to_string();
            Box::pin(async move { t.file_size(&path).await })
        })
        .await
    }

    pub async fn upload_file(&mut self, local_path: &Path, remote_path: &str) -> Result<(), TransportError> {
        let label = format!("upload {}", remote_path);
        self.execute(&label, |t| {
            let local_path = local_path.to_path_buf();
            let remote_path = remote_path.to_string();
            Box::pin(async move { t.upload_file(&local_path, &remote_path).await })
        })
        .await
    }

    pub async fn download_file(&mut self, remote_path: &str, local_path: &Path) -> Result<(), TransportError> {
        let label = format!("download {}", remote_path);
        self.execute(&label, |t| {
            let local_path = local_path.to_path_buf();
            let remote_path = remote_path.to_string();
            Box::pin(async move { t.download_file(&remote_path, &local_path).await })
        })
        .await
    }

    pub async fn delete_file(&mut self, path: &str) -> Result<(), TransportError> {
        let label = format!("delete {}", path);
        self.execute(&label, |t| {
            let path = path.to_string();
            Box::pin(async move { t.delete_file(&path).await })
        })
        .await
    }

    pub async fn remove_empty_directory(&mut self, path: &str) -> Result<(), TransportError> {
        let label = format!("rmdir {}", path);
        self.execute(&label, |t| {
            let path = path.to_string();
            Box::pin(async move { t.remove_empty_directory(&path).await })
        })
        .await
    }

    pub async fn ensure_directory_exists(&mut self, path: &str) -> Result<(), TransportError> {
        let label = format!("mkdir {}", path);
        self.execute(&label, |t| {
            let path = path.to_string();
            Box::pin(async move { t.ensure_directory_exists(&path).await })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeTransport;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_attempts: u32, reconnect: bool) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(1),
            reconnect,
        }
    }

    fn reset() -> TransportError {
        TransportError::new(TransportErrorKind::ConnectionReset, "connection reset by peer")
    }

    #[test]
    fn test_classify_rule_table() {
        assert_eq!(classify(&reset()), ErrorClass::Transient);
        assert_eq!(
            classify(&TransportError::new(TransportErrorKind::Dns, "lookup failed")),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(&TransportError::new(TransportErrorKind::PermissionDenied, "connection denied")),
            ErrorClass::Fatal
        );
        assert_eq!(
            classify(&TransportError::new(TransportErrorKind::Other, "Control socket closed")),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(&TransportError::new(TransportErrorKind::Other, "quota exceeded")),
            ErrorClass::Fatal
        );
        assert_eq!(
            classify(&TransportError::new(TransportErrorKind::RetriesExhausted, "timeout")),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_policy_decisions() {
        let p = policy(3, true);
        assert_eq!(
            p.decide(1, ErrorClass::Transient),
            RetryDecision::Retry { delay: Duration::from_millis(1) }
        );
        assert_eq!(
            p.decide(2, ErrorClass::Transient),
            RetryDecision::Retry { delay: Duration::from_millis(1) }
        );
        assert_eq!(p.decide(3, ErrorClass::Transient), RetryDecision::Exhausted);
        assert_eq!(p.decide(1, ErrorClass::Fatal), RetryDecision::Propagate);
        assert_eq!(policy(3, false).decide(1, ErrorClass::Transient), RetryDecision::Propagate);

        assert!(!p.reconnect_failure_is_final(1));
        assert!(p.reconnect_failure_is_final(2));
    }

    #[tokio::test]
    async fn test_always_transient_operation_exhausts() {
        let mut transport = FakeTransport::new();
        let mut calls = 0u32;

        let result: Result<(), TransportError> =
            execute_with_retry(&mut transport, &policy(3, true), "op", |_t| {
                calls += 1;
                Box::pin(async { Err(reset()) })
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::RetriesExhausted);
        assert!(err.message.starts_with("op failed after 3 attempts"));
        assert_eq!(calls, 3);
        assert_eq!(transport.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let mut transport = FakeTransport::new();
        let mut calls = 0u32;

        let result: Result<(), TransportError> =
            execute_with_retry(&mut transport, &policy(3, true), "op", |_t| {
                calls += 1;
                Box::pin(async { Err(TransportError::new(TransportErrorKind::PermissionDenied, "denied")) })
            })
            .await;

        assert_eq!(result.unwrap_err().kind, TransportErrorKind::PermissionDenied);
        assert_eq!(calls, 1);
        assert_eq!(transport.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_without_reconnect_propagates() {
        let mut transport = FakeTransport::new();
        let result: Result<(), TransportError> =
            execute_with_retry(&mut transport, &policy(3, false), "op", |_t| {
                Box::pin(async { Err(reset()) })
            })
            .await;
        assert_eq!(result.unwrap_err().kind, TransportErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn test_recovers_after_reconnect() {
        let mut transport = FakeTransport::new();
        let mut calls = 0u32;

        let result = execute_with_retry(&mut transport, &policy(3, true), "op", |_t| {
            calls += 1;
            let outcome = if calls == 1 { Err(reset()) } else { Ok(42) };
            Box::pin(async move { outcome })
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 2);
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_reconnect_on_last_chance_returns_original_error() {
        let mut transport = FakeTransport::new();
        transport.fail_connects(10);
        let mut calls = 0u32;

        let result: Result<(), TransportError> =
            execute_with_retry(&mut transport, &policy(3, true), "op", |_t| {
                calls += 1;
                Box::pin(async { Err(reset()) })
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::ConnectionReset);
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_zero_attempts_is_exhausted() {
        let mut transport = FakeTransport::new();
        let result: Result<(), TransportError> =
            execute_with_retry(&mut transport, &policy(0, true), "op", |_t| {
                Box::pin(async { Ok(()) })
            })
            .await;
        assert_eq!(result.unwrap_err().message, "op failed after 0 attempts");
    }

    #[tokio::test]
    async fn test_reconnect_replaces_session() {
        let mut transport = FakeTransport::new();
        transport.connect().await.unwrap();
        reconnect(&mut transport).await.unwrap();
        assert_eq!(transport.connect_count(), 2);
        assert_eq!(transport.close_count(), 1);
    }

    #[test]
    fn test_classify_ignores_path_text() {
        let err = TransportError::new(TransportErrorKind::Other, "no such directory")
            .with_path("/www/reset.css");
        assert_eq!(classify(&err), ErrorClass::Fatal);
        assert_eq!(err.to_string(), "error: /www/reset.css: no such directory");
    }

    #[tokio::test]
    async fn test_fatal_error_on_connection_like_path_runs_once() {
        let mut transport = FakeTransport::new();
        transport.connect().await.unwrap();
        transport.fail_call(
            "upload /www/reset.css",
            5,
            TransportError::new(TransportErrorKind::Other, "quota exceeded").with_path("/www/reset.css"),
        );

        let result = execute_with_retry(&mut transport, &policy(3, true), "upload /www/reset.css", |t| {
            Box::pin(async move { t.upload_file(Path::new("unused"), "/www/reset.css").await })
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Other);
        assert_eq!(err.path.as_deref(), Some("/www/reset.css"));
        assert_eq!(transport.calls(), ["upload /www/reset.css"]);
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_fails_once_then_recovers() {
        let mut transport = FakeTransport::new().with_file("/www/a.txt", b"a");
        transport.connect().await.unwrap();
        transport.fail_call("list /www", 1, reset());
        transport.fail_connects(1);

        let result = execute_with_retry(&mut transport, &policy(3, true), "list /www", |t| {
            Box::pin(async move { t.list_directory("/www").await })
        })
        .await;

        let entries = result.unwrap();
        assert_eq!(entries, vec![RemoteEntry::file("a.txt")]);
        // reset, then "not connected" after the failed reconnect, then success
        assert_eq!(transport.calls(), ["list /www", "list /www", "list /www"]);
        assert_eq!(transport.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_failed_reconnects_return_first_transient_error() {
        let mut transport = FakeTransport::new().with_dir("/www");
        transport.connect().await.unwrap();
        transport.fail_call("list /www", 1, reset());
        transport.fail_connects(10);

        let result = execute_with_retry(&mut transport, &policy(3, true), "list /www", |t| {
            Box::pin(async move { t.list_directory("/www").await })
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::ConnectionReset);
        assert_eq!(err.message, "connection reset by peer");
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_nested_calls_keep_separate_attempt_counts() {
        let mut transport = FakeTransport::new();
        transport.connect().await.unwrap();
        let inner_calls = Arc::new(AtomicU32::new(0));
        let mut outer_calls = 0u32;

        let result = execute_with_retry(&mut transport, &policy(3, true), "outer", |t| {
            outer_calls += 1;
            let first = outer_calls == 1;
            let inner_calls = Arc::clone(&inner_calls);
            Box::pin(async move {
                if first {
                    return Err(reset());
                }
                // Needs the full budget of its own, not what is left of the outer one
                let inner_policy = policy(3, true);
                execute_with_retry(t, &inner_policy, "inner", |_t| {
                    let n = inner_calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Box::pin(async move { if n < 3 { Err(reset()) } else { Ok(n) } })
                })
                .await
            })
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(outer_calls, 2);
        assert_eq!(inner_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_sequential_calls_start_with_full_budget() {
        let mut transport = FakeTransport::new().with_dir("/www");
        transport.connect().await.unwrap();

        // Two failures each: both calls succeed on their third attempt
        for _ in 0..2 {
            transport.fail_call("list /www", 2, reset());
            let entries = RetryExecutor::new(&mut transport, policy(3, true))
                .list_directory("/www")
                .await
                .unwrap();
            assert!(entries.is_empty());
        }
        assert_eq!(transport.calls().len(), 6);
    }
}
