//! 인메모리 저장소
//!
//! 테스트와 `store.kind = "memory"` 설정에서 사용합니다.
//! 재시작하면 내용이 사라집니다.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use trapwire_core::error::StorageError;
use trapwire_core::event::{SecurityEvent, StoredEvent};
use trapwire_core::pipeline::BoxFuture;

use super::{EventStore, RecordOutcome};

type RejectFn = dyn Fn(&SecurityEvent) -> Option<String> + Send + Sync;

#[derive(Default)]
struct MemoryState {
    records: Vec<StoredEvent>,
    batch_sizes: Vec<usize>,
}

/// 인메모리 저장소
///
/// 식별자는 1부터 증가하는 순번입니다.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
    reject: Option<Arc<RejectFn>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 추가 거부 규칙을 설정합니다. `Some(reason)`을 반환하면 레코드가 거부됩니다.
    pub fn with_rejection<F>(predicate: F) -> Self
    where
        F: Fn(&SecurityEvent) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            reject: Some(Arc::new(predicate)),
            ..Self::default()
        }
    }

    /// 저장소 장애를 흉내냅니다. `true`이면 모든 배치가 실패합니다.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// 저장된 레코드 사본
    pub fn records(&self) -> Vec<StoredEvent> {
        self.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 지금까지 받은 배치 크기 목록 (실패한 배치 제외)
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().batch_sizes.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, event: &SecurityEvent) -> Result<(), String> {
        event.validate()?;
        if let Some(reason) = self.reject.as_ref().and_then(|f| f(event)) {
            return Err(reason);
        }
        Ok(())
    }

    fn store_batch(&self, events: &[SecurityEvent]) -> Result<Vec<RecordOutcome>, StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory store marked unavailable".to_owned()));
        }

        let mut state = self.lock();
        state.batch_sizes.push(events.len());

        let outcomes = events
            .iter()
            .map(|event| match self.check(event) {
                Ok(()) => {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                    let stored = StoredEvent {
                        id: id.to_string(),
                        stored_at: Utc::now(),
                        event: event.clone(),
                    };
                    state.records.push(stored.clone());
                    RecordOutcome::Stored(stored)
                }
                Err(reason) => RecordOutcome::Rejected { reason },
            })
            .collect();
        Ok(outcomes)
    }
}

impl EventStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn insert_batch<'a>(
        &'a self,
        events: &'a [SecurityEvent],
    ) -> BoxFuture<'a, Result<Vec<RecordOutcome>, StorageError>> {
        Box::pin(async move { self.store_batch(events) })
    }
}
