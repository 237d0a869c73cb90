//! Request-scoped resource cache.
//!
//! A [`RequestScope`] lives for one inbound request. It carries the request's
//! [`ConnectionHint`] and memoizes one resolved handle per [`SlotKind`]: the first
//! access resolves and opens, later accesses in the same request reuse the handle.
//! [`RequestScope::close`] releases everything the request opened.
//!
//! # Concurrency
//!
//! The slot map lock is only held to fetch or insert a slot's `OnceCell`. The cell is
//! the single-flight barrier: concurrent first accesses to the same slot wait for one
//! acquisition instead of each opening their own connection.

use crate::db::pool::ConnectionHandle;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionHint, IntoConnectionHint};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

/// Kind of resource a scope slot holds. One handle per kind per request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Database,
    Cache,
    MessageProducer,
    Custom(String),
}

impl std::fmt::Display for SlotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Database => write!(f, "database"),
            Self::Cache => write!(f, "cache"),
            Self::MessageProducer => write!(f, "message_producer"),
            Self::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

/// A handle that must be given back when its request ends.
pub trait ScopedResource: Send + Sync + 'static {
    fn release(&self) -> BoxFuture<'_, ()>;
}

impl ScopedResource for ConnectionHandle {
    fn release(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            ConnectionHandle::release(self).await;
        })
    }
}

/// Resolves and opens the handle for one slot kind from a request's hint.
pub trait SlotProvider: Send + Sync {
    type Handle: ScopedResource;

    fn slot_kind(&self) -> SlotKind;

    fn acquire(&self, hint: &ConnectionHint)
    -> impl Future<Output = DbResult<Self::Handle>> + Send;
}

#[derive(Clone)]
struct SlotValue {
    any: Arc<dyn Any + Send + Sync>,
    resource: Arc<dyn ScopedResource>,
}

type Slot = Arc<OnceCell<SlotValue>>;

/// Per-request hint holder and handle cache.
pub struct RequestScope {
    id: Uuid,
    started_at: DateTime<Utc>,
    hint: RwLock<Option<ConnectionHint>>,
    slots: Mutex<HashMap<SlotKind, Slot>>,
    closed: AtomicBool,
}

impl RequestScope {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            hint: RwLock::new(None),
            slots: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a scope with a hint already attached.
    pub fn with_hint(hint: ConnectionHint) -> Self {
        let scope = Self::new();
        scope.attach_hint(hint);
        scope
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Attach the request's connection hint, replacing any earlier one.
    ///
    /// Slots resolved before the call keep their handles.
    pub fn attach_hint(&self, hint: ConnectionHint) {
        let mut current = self.hint.write().unwrap_or_else(|e| e.into_inner());
        if current.is_some() {
            debug!(request_id = %self.id, "Replacing connection hint");
        }
        *current = Some(hint);
    }

    /// Attach the hint carried by a collaborator's request type.
    pub fn attach_from(&self, source: &impl IntoConnectionHint) {
        self.attach_hint(source.connection_hint());
    }

    /// The attached hint, or an empty hint (default connection) if none was attached.
    pub fn hint(&self) -> ConnectionHint {
        self.hint
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Slot kinds that currently hold a handle.
    pub fn resolved_slots(&self) -> Vec<SlotKind> {
        self.lock_slots()
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(kind, _)| kind.clone())
            .collect()
    }

    /// The provider's handle for this request, acquiring it on first access.
    ///
    /// Errors are returned to the caller and not cached, so a later call retries.
    pub async fn get_or_resolve<P: SlotProvider>(&self, provider: &P) -> DbResult<Arc<P::Handle>> {
        let kind = provider.slot_kind();
        if self.is_closed() {
            return Err(self.closed_error(&kind));
        }

        let cell = {
            let mut slots = self.lock_slots();
            Arc::clone(slots.entry(kind.clone()).or_default())
        };

        let value = cell
            .get_or_try_init(|| async {
                let hint = self.hint();
                let handle = Arc::new(provider.acquire(&hint).await?);

                if self.is_closed() {
                    warn!(request_id = %self.id, slot = %kind, "Scope closed during acquire, releasing");
                    handle.release().await;
                    return Err(self.closed_error(&kind));
                }

                debug!(request_id = %self.id, slot = %kind, "Slot resolved");
                Ok::<_, DbError>(SlotValue {
                    any: Arc::clone(&handle) as Arc<dyn Any + Send + Sync>,
                    resource: handle,
                })
            })
            .await?;

        Arc::clone(&value.any).downcast::<P::Handle>().map_err(|_| {
            DbError::internal(format!("Slot '{}' holds a different handle type", kind))
        })
    }

    /// Tear the scope down, releasing every handle it opened.
    ///
    /// Idempotent. Later [`get_or_resolve`](Self::get_or_resolve) calls fail with
    /// [`DbError::ScopeClosed`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let drained: Vec<(SlotKind, Slot)> = self.lock_slots().drain().collect();
        let mut released = 0usize;
        for (kind, cell) in drained {
            if let Some(value) = cell.get() {
                value.resource.release().await;
                released += 1;
                debug!(request_id = %self.id, slot = %kind, "Slot released");
            }
        }

        let elapsed_ms = (Utc::now() - self.started_at).num_milliseconds();
        debug!(request_id = %self.id, released, elapsed_ms, "Request scope closed");
    }

    fn closed_error(&self, kind: &SlotKind) -> DbError {
        DbError::scope_closed(format!(
            "Request scope {} is closed; cannot resolve slot '{}'",
            self.id, kind
        ))
    }

    // Only inserts and drains happen under this lock.
    fn lock_slots(&self) -> MutexGuard<'_, HashMap<SlotKind, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScope")
            .field("id", &self.id)
            .field("started_at", &self.started_at)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug)]
    struct Token {
        label: String,
        released: Arc<AtomicUsize>,
    }

    impl ScopedResource for Token {
        fn release(&self) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                self.released.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    /// Hands out tokens labelled with the hint's connection name.
    #[derive(Default)]
    struct CountingProvider {
        kind: Option<SlotKind>,
        acquired: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
        fail_first: AtomicBool,
        delay: Option<Duration>,
    }

    impl SlotProvider for CountingProvider {
        type Handle = Token;

        fn slot_kind(&self) -> SlotKind {
            self.kind.clone().unwrap_or(SlotKind::Database)
        }

        async fn acquire(&self, hint: &ConnectionHint) -> DbResult<Token> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_first.swap(false, Ordering::SeqCst) {
                return Err(DbError::unknown_named_connection("flaky"));
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(Token {
                label: hint.named_connection().unwrap_or("default").to_string(),
                released: Arc::clone(&self.released),
            })
        }
    }

    #[tokio::test]
    async fn test_second_access_reuses_handle() {
        let scope = RequestScope::with_hint(ConnectionHint::named("Reporting"));
        let provider = CountingProvider::default();

        let first = scope.get_or_resolve(&provider).await.unwrap();
        let second = scope.get_or_resolve(&provider).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.label, "Reporting");
        assert_eq!(provider.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(scope.resolved_slots(), vec![SlotKind::Database]);
    }

    #[tokio::test]
    async fn test_no_hint_resolves_default() {
        let scope = RequestScope::new();
        let provider = CountingProvider::default();
        let token = scope.get_or_resolve(&provider).await.unwrap();
        assert_eq!(token.label, "default");
    }

    #[tokio::test]
    async fn test_attach_hint_last_writer_wins() {
        let scope = RequestScope::new();
        scope.attach_hint(ConnectionHint::named("T01"));
        scope.attach_hint(ConnectionHint::named("T02"));
        assert_eq!(scope.hint(), ConnectionHint::named("T02"));

        let token = scope
            .get_or_resolve(&CountingProvider::default())
            .await
            .unwrap();
        assert_eq!(token.label, "T02");
    }

    #[tokio::test]
    async fn test_attach_from_request_dto() {
        struct ReportRequest {
            tenant: String,
        }
        impl IntoConnectionHint for ReportRequest {
            fn connection_hint(&self) -> ConnectionHint {
                ConnectionHint::named(&self.tenant)
            }
        }

        let scope = RequestScope::new();
        scope.attach_from(&ReportRequest {
            tenant: "T03".to_string(),
        });
        let token = scope
            .get_or_resolve(&CountingProvider::default())
            .await
            .unwrap();
        assert_eq!(token.label, "T03");
    }

    #[tokio::test]
    async fn test_concurrent_first_access_acquires_once() {
        let scope = Arc::new(RequestScope::new());
        let provider = Arc::new(CountingProvider {
            delay: Some(Duration::from_millis(20)),
            ..CountingProvider::default()
        });

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let scope = Arc::clone(&scope);
                let provider = Arc::clone(&provider);
                tokio::spawn(async move { scope.get_or_resolve(provider.as_ref()).await })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }
        assert_eq!(provider.acquired.load(Ordering::SeqCst), 1);
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let scope = RequestScope::new();
        let provider = CountingProvider {
            fail_first: AtomicBool::new(true),
            ..CountingProvider::default()
        };

        assert!(scope.get_or_resolve(&provider).await.is_err());
        assert!(scope.resolved_slots().is_empty());
        assert!(scope.get_or_resolve(&provider).await.is_ok());
        assert_eq!(provider.acquired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slot_kinds_are_independent() {
        let scope = RequestScope::new();
        let db = CountingProvider::default();
        let cache = CountingProvider {
            kind: Some(SlotKind::Cache),
            ..CountingProvider::default()
        };

        scope.get_or_resolve(&db).await.unwrap();
        scope.get_or_resolve(&cache).await.unwrap();

        let mut slots = scope.resolved_slots();
        slots.sort_by_key(|k| k.to_string());
        assert_eq!(slots, vec![SlotKind::Cache, SlotKind::Database]);
    }

    #[tokio::test]
    async fn test_close_releases_and_rejects_later_access() {
        let scope = RequestScope::new();
        let provider = CountingProvider::default();
        scope.get_or_resolve(&provider).await.unwrap();

        scope.close().await;
        scope.close().await;
        assert_eq!(provider.released.load(Ordering::SeqCst), 1);
        assert!(scope.is_closed());

        let err = scope.get_or_resolve(&provider).await.unwrap_err();
        assert!(matches!(err, DbError::ScopeClosed { .. }));
    }

    #[tokio::test]
    async fn test_close_without_access_opens_nothing() {
        let scope = RequestScope::new();
        scope.close().await;
        assert!(scope.resolved_slots().is_empty());
    }

    #[tokio::test]
    async fn test_close_during_acquire_releases_new_handle() {
        let scope = Arc::new(RequestScope::new());
        let provider = Arc::new(CountingProvider {
            delay: Some(Duration::from_millis(50)),
            ..CountingProvider::default()
        });

        let pending = {
            let scope = Arc::clone(&scope);
            let provider = Arc::clone(&provider);
            tokio::spawn(async move { scope.get_or_resolve(provider.as_ref()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        scope.close().await;

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, DbError::ScopeClosed { .. }));
        assert_eq!(provider.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mismatched_handle_type_is_internal_error() {
        struct OtherProvider;
        struct Other;
        impl ScopedResource for Other {
            fn release(&self) -> BoxFuture<'_, ()> {
                Box::pin(async {})
            }
        }
        impl SlotProvider for OtherProvider {
            type Handle = Other;
            fn slot_kind(&self) -> SlotKind {
                SlotKind::Database
            }
            async fn acquire(&self, _hint: &ConnectionHint) -> DbResult<Other> {
                Ok(Other)
            }
        }

        let scope = RequestScope::new();
        scope
            .get_or_resolve(&CountingProvider::default())
            .await
            .unwrap();
        let err = scope.get_or_resolve(&OtherProvider).await.err().unwrap();
        assert!(matches!(err, DbError::Internal { .. }));
    }

    #[test]
    fn test_scope_ids_are_unique() {
        assert_ne!(RequestScope::new().id(), RequestScope::new().id());
        assert_eq!(SlotKind::Custom("search".into()).to_string(), "custom:search");
    }
}
