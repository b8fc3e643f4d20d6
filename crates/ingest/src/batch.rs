//! 배치 조립기 -- 보강된 이벤트를 모아 한 번의 쓰기로 플러시합니다.
//!
//! # 플러시 조건
//! - 크기: 버퍼가 `batch_size`에 도달
//! - 시간: 첫 미플러시 이벤트 이후 `flush_interval` 경과
//!
//! 둘 중 먼저 도달한 조건으로 플러시합니다.
//!
//! # 상태 전이
//! ```text
//! Empty --enqueue--> Accumulating(timer armed) --size|timer--> Flushing --> Empty
//! ```
//! 버퍼 교체는 잠금 안에서 동기적으로 일어나고, 저장소 쓰기는 잠금 밖에서
//! 떼어낸 사본으로 수행합니다. 플러시 중에도 새 이벤트는 새 버퍼에 쌓입니다.
//!
//! 버퍼를 교체할 때마다 세대 번호가 증가하며, 이전 세대에서 예약된 타이머는
//! 깨어나도 새 버퍼를 플러시하지 않습니다.
//!
//! # 동시 플러시 한도
//! 크기/시간 조건의 백그라운드 플러시는 `max_concurrent_flushes`개의 허가를 나눠 씁니다.
//! 허가가 없으면 `enqueue`가 허가를 얻을 때까지 기다리므로, 저장소가 느려지면
//! 처리 태스크가 멈추고 그 앞의 유한 대기열이 차오릅니다.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use trapwire_core::event::SecurityEvent;
use trapwire_core::metrics as m;
use trapwire_core::pipeline::BoxFuture;

/// 플러시를 일으킨 조건
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// 배치 크기 도달
    Size,
    /// 플러시 간격 경과
    Timer,
    /// 명시적 `flush()` 호출
    Manual,
    /// 종료 시 최종 플러시
    Shutdown,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Timer => "timer",
            Self::Manual => "manual",
            Self::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 플러시 대상
///
/// 구현체는 배치 처리 중 발생한 모든 실패를 스스로 처리(로그)해야 합니다.
pub trait BatchSink: Send + Sync {
    fn flush_batch(
        &self,
        batch: Vec<SecurityEvent>,
        trigger: FlushTrigger,
    ) -> BoxFuture<'_, ()>;
}

#[derive(Default)]
struct BatchState {
    buffer: Vec<SecurityEvent>,
    /// 현재 세대의 플러시 타이머
    timer: Option<JoinHandle<()>>,
    /// 버퍼 교체 횟수
    generation: u64,
    /// 종료 이후에는 새 이벤트를 받지 않음
    closed: bool,
}

impl BatchState {
    /// 버퍼를 떼어내고 타이머를 해제합니다.
    fn take(&mut self) -> Vec<SecurityEvent> {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation = self.generation.wrapping_add(1);
        std::mem::take(&mut self.buffer)
    }
}

struct Inner {
    state: Mutex<BatchState>,
    sink: Arc<dyn BatchSink>,
    batch_size: usize,
    flush_interval: Duration,
    tracker: TaskTracker,
    /// 백그라운드 플러시 허가
    flush_slots: Arc<Semaphore>,
    max_concurrent_flushes: usize,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 백그라운드 플러시 허가를 얻습니다. 한도에 걸리면 로그를 남기고 기다립니다.
    async fn acquire_flush_slot(&self, trigger: FlushTrigger) -> Option<OwnedSemaphorePermit> {
        if let Ok(permit) = Arc::clone(&self.flush_slots).try_acquire_owned() {
            return Some(permit);
        }
        counter!(m::INGEST_FLUSH_WAITS_TOTAL, m::LABEL_TRIGGER => trigger.as_str()).increment(1);
        tracing::warn!(
            limit = self.max_concurrent_flushes,
            trigger = %trigger,
            "concurrent flush limit reached, waiting for an in-flight batch"
        );
        // 세마포어는 닫지 않으므로 실패하지 않음
        Arc::clone(&self.flush_slots).acquire_owned().await.ok()
    }

    async fn run_flush(&self, batch: Vec<SecurityEvent>, trigger: FlushTrigger) {
        if batch.is_empty() {
            return;
        }
        let size = batch.len();
        counter!(m::INGEST_BATCHES_FLUSHED_TOTAL, m::LABEL_TRIGGER => trigger.as_str()).increment(1);
        tracing::debug!(size, trigger = %trigger, "flushing batch");

        let started = Instant::now();
        self.sink.flush_batch(batch, trigger).await;
        histogram!(m::INGEST_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    }

    /// 타이머가 예약된 세대가 아직 현재 세대일 때만 플러시합니다.
    ///
    /// 허가를 먼저 얻고 버퍼를 떼어내므로, 기다리는 중에 타이머가 해제되어도 이벤트를 잃지 않습니다.
    async fn flush_expired(&self, generation: u64) {
        let _permit = self.acquire_flush_slot(FlushTrigger::Timer).await;
        let batch = {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            // 자기 자신의 핸들이므로 abort하지 않고 버림
            state.timer = None;
            state.take()
        };
        gauge!(m::INGEST_BATCH_BUFFER_SIZE).set(0.0);
        self.run_flush(batch, FlushTrigger::Timer).await;
    }
}

/// 배치 조립기
///
/// 복제 가능한 핸들입니다. 모든 복제본이 같은 버퍼를 공유합니다.
#[derive(Clone)]
pub struct BatchAssembler {
    inner: Arc<Inner>,
}

impl BatchAssembler {
    /// 새 조립기를 생성합니다.
    ///
    /// `batch_size`와 `max_concurrent_flushes`가 0이면 1로 취급합니다.
    pub fn new(
        sink: Arc<dyn BatchSink>,
        batch_size: usize,
        flush_interval: Duration,
        max_concurrent_flushes: usize,
    ) -> Self {
        let max_concurrent_flushes = max_concurrent_flushes.max(1);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BatchState::default()),
                sink,
                batch_size: batch_size.max(1),
                flush_interval,
                tracker: TaskTracker::new(),
                flush_slots: Arc::new(Semaphore::new(max_concurrent_flushes)),
                max_concurrent_flushes,
            }),
        }
    }

    /// 이벤트를 버퍼에 추가합니다.
    ///
    /// 크기 조건에 도달하면 플러시 허가를 얻은 뒤 버퍼를 떼어내 백그라운드 플러시를 시작합니다.
    /// 진행 중인 플러시가 한도만큼 있으면 그중 하나가 끝날 때까지 기다립니다.
    /// 기다리는 동안 취소되어도 이벤트는 버퍼에 남습니다.
    ///
    /// 종료 이후에는 이벤트를 받지 않고 `false`를 반환합니다.
    pub async fn enqueue(&self, event: SecurityEvent) -> bool {
        let pending = {
            let mut state = self.inner.lock();
            if state.closed {
                tracing::warn!(event = %event.summary(), "batch assembler closed, event dropped");
                return false;
            }

            state.buffer.push(event);
            let pending = state.buffer.len();
            if pending < self.inner.batch_size && state.timer.is_none() {
                let generation = state.generation;
                let inner = Arc::clone(&self.inner);
                state.timer = Some(self.inner.tracker.spawn(async move {
                    tokio::time::sleep(inner.flush_interval).await;
                    inner.flush_expired(generation).await;
                }));
            }
            pending
        };
        gauge!(m::INGEST_BATCH_BUFFER_SIZE).set(pending as f64);
        if pending < self.inner.batch_size {
            return true;
        }

        let permit = self.inner.acquire_flush_slot(FlushTrigger::Size).await;
        let batch = {
            let mut state = self.inner.lock();
            // 기다리는 사이 타이머나 종료가 버퍼를 가져갔을 수 있음
            if state.buffer.len() < self.inner.batch_size {
                return true;
            }
            state.take()
        };
        gauge!(m::INGEST_BATCH_BUFFER_SIZE).set(0.0);

        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move {
            let _permit = permit;
            inner.run_flush(batch, FlushTrigger::Size).await;
        });
        true
    }

    /// 현재 버퍼를 즉시 플러시하고 완료를 기다립니다. 버퍼가 비어 있으면 아무 일도 하지 않습니다.
    pub async fn flush(&self) {
        let batch = self.inner.lock().take();
        gauge!(m::INGEST_BATCH_BUFFER_SIZE).set(0.0);
        self.inner.run_flush(batch, FlushTrigger::Manual).await;
    }

    /// 남은 버퍼를 플러시하고, 진행 중인 모든 플러시가 끝날 때까지 기다립니다.
    ///
    /// 이후의 `enqueue`는 거부됩니다. 여러 번 호출해도 안전합니다.
    pub async fn shutdown(&self) {
        let batch = {
            let mut state = self.inner.lock();
            state.closed = true;
            state.take()
        };
        if !batch.is_empty() {
            tracing::info!(size = batch.len(), "flushing remaining events before shutdown");
        }
        gauge!(m::INGEST_BATCH_BUFFER_SIZE).set(0.0);
        self.inner.run_flush(batch, FlushTrigger::Shutdown).await;

        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    /// 버퍼에 쌓인 이벤트 수
    pub fn pending(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    /// 진행 중인 백그라운드 작업 수 (플러시와 대기 중인 타이머)
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    pub fn batch_size(&self) -> usize {
        self.inner.batch_size
    }

    /// 동시 백그라운드 플러시 한도
    pub fn max_concurrent_flushes(&self) -> usize {
        self.inner.max_concurrent_flushes
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
