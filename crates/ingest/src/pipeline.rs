//! 파이프라인 오케스트레이션 -- 수집/파싱/보강/배치 저장/팬아웃의 전체 흐름을 관리합니다.
//!
//! [`IngestPipeline`]은 core의 [`Pipeline`](trapwire_core::pipeline::Pipeline) trait을 구현하여
//! `trapwire-daemon`에서 동일한 생명주기(start/stop/health_check)로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! FileWatcher(파일당 1개) ─┐
//!                          ├─ bounded mpsc ───> 처리 태스크: ParserRouter -> Enricher -> BatchAssembler
//! IngestHandle::submit ────┘                                                             │
//!                                                      StoreSink: EventStore -> LiveChannel
//! ```
//!
//! 각 단계의 실패는 그 단계 안에서 로그로 처리되며, 시작 실패만 호출자에게 전달됩니다.
//!
//! # 메모리 상한
//! - 처리 대기열은 `buffer_capacity`개까지만 받습니다. 감시 라인은 넘치면 버려지고,
//!   `submit`은 전체가 들어갈 자리가 없으면 거부됩니다.
//! - 진행 중인 배치 플러시는 `max_concurrent_flushes`개로 제한됩니다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use trapwire_core::error::{PipelineError, TrapwireError};
use trapwire_core::event::{EVENT_TYPE_NEW_EVENT, SecurityEvent, StoredEvent};
use trapwire_core::metrics as m;
use trapwire_core::pipeline::{BoxFuture, HealthStatus, Pipeline};
use trapwire_core::types::SourceSystem;

use crate::batch::{BatchAssembler, BatchSink, FlushTrigger};
use crate::collector::{FileTail, FileWatcher, RawInput};
use crate::config::IngestConfig;
use crate::enrich::{Enricher, GeoDatabase, GeoResolver};
use crate::error::IngestError;
use crate::live::LiveChannel;
use crate::parser::ParserRouter;
use crate::store::{EventStore, RecordOutcome};

/// 파이프라인 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 파이프라인 누적 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// 감시 파일에서 읽은 라인 수
    pub lines_read: u64,
    /// `submit`으로 받은 레코드 수
    pub records_submitted: u64,
    /// 정규화 이벤트로 변환된 입력 수
    pub events_parsed: u64,
    /// 손상되었거나 해당 없는 입력 수
    pub inputs_skipped: u64,
    /// 처리 대기열이 가득 차 버려진 감시 라인 수
    pub inputs_dropped: u64,
    /// 저장소에 보낸 배치 수
    pub batches_written: u64,
    /// 저장된 레코드 수
    pub records_stored: u64,
    /// 저장소가 거부한 레코드 수
    pub records_rejected: u64,
    /// 통째로 실패한 배치 수
    pub batch_failures: u64,
    /// 실시간 채널로 발행한 메시지 수
    pub live_messages: u64,
}

#[derive(Default)]
struct SharedState {
    lines_read: AtomicU64,
    records_submitted: AtomicU64,
    events_parsed: AtomicU64,
    inputs_skipped: AtomicU64,
    /// 감시 태스크들과 공유
    inputs_dropped: Arc<AtomicU64>,
    batches_written: AtomicU64,
    records_stored: AtomicU64,
    records_rejected: AtomicU64,
    batch_failures: AtomicU64,
    live_messages: AtomicU64,
    /// 마지막 배치 쓰기가 통째로 실패했다면 그 사유
    last_failure: Mutex<Option<String>>,
}

impl SharedState {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            records_submitted: self.records_submitted.load(Ordering::Relaxed),
            events_parsed: self.events_parsed.load(Ordering::Relaxed),
            inputs_skipped: self.inputs_skipped.load(Ordering::Relaxed),
            inputs_dropped: self.inputs_dropped.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            records_stored: self.records_stored.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            batch_failures: self.batch_failures.load(Ordering::Relaxed),
            live_messages: self.live_messages.load(Ordering::Relaxed),
        }
    }

    fn last_failure(&self) -> MutexGuard<'_, Option<String>> {
        self.last_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

type SenderSlot = Arc<Mutex<Option<mpsc::Sender<RawInput>>>>;

fn lock_slot(slot: &SenderSlot) -> MutexGuard<'_, Option<mpsc::Sender<RawInput>>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 배치를 저장한 뒤 저장된 레코드만 실시간 채널로 발행하는 플러시 대상
struct StoreSink {
    store: Arc<dyn EventStore>,
    live: LiveChannel,
    shared: Arc<SharedState>,
}

impl StoreSink {
    async fn persist(&self, batch: Vec<SecurityEvent>, trigger: FlushTrigger) {
        let size = batch.len();
        self.shared.batches_written.fetch_add(1, Ordering::Relaxed);

        let outcomes = match self.store.insert_batch(&batch).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                self.shared.batch_failures.fetch_add(1, Ordering::Relaxed);
                counter!(m::STORE_BATCH_FAILURES_TOTAL).increment(1);
                *self.shared.last_failure() = Some(e.to_string());
                tracing::error!(
                    size,
                    trigger = %trigger,
                    store = self.store.name(),
                    error = %e,
                    "batch write failed, batch dropped"
                );
                return;
            }
        };
        *self.shared.last_failure() = None;

        if outcomes.len() != size {
            tracing::warn!(
                size,
                outcomes = outcomes.len(),
                store = self.store.name(),
                "store returned a different number of outcomes than records"
            );
        }

        let mut stored = 0u64;
        let mut rejected = 0u64;
        for (event, outcome) in batch.iter().zip(outcomes) {
            match outcome {
                RecordOutcome::Stored(record) => {
                    stored += 1;
                    self.publish(&record);
                }
                RecordOutcome::Rejected { reason } => {
                    rejected += 1;
                    tracing::warn!(
                        event = %event.summary(),
                        reason = %reason,
                        store = self.store.name(),
                        "record rejected by store, dropped"
                    );
                }
            }
        }

        self.shared.records_stored.fetch_add(stored, Ordering::Relaxed);
        self.shared.records_rejected.fetch_add(rejected, Ordering::Relaxed);
        counter!(m::STORE_RECORDS_TOTAL, m::LABEL_RESULT => "stored").increment(stored);
        counter!(m::STORE_RECORDS_TOTAL, m::LABEL_RESULT => "rejected").increment(rejected);
        tracing::debug!(size, stored, rejected, trigger = %trigger, "batch persisted");
    }

    fn publish(&self, record: &StoredEvent) {
        match serde_json::to_value(record) {
            Ok(data) => {
                self.live.publish(EVENT_TYPE_NEW_EVENT, data);
                self.shared.live_messages.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!(id = %record.id, error = %e, "failed to encode stored event for live channel");
            }
        }
    }
}

impl BatchSink for StoreSink {
    fn flush_batch(
        &self,
        batch: Vec<SecurityEvent>,
        trigger: FlushTrigger,
    ) -> BoxFuture<'_, ()> {
        Box::pin(self.persist(batch, trigger))
    }
}

/// 처리 태스크 -- 채널이 닫히고 비워질 때까지 입력을 파싱/보강해 배치에 넣습니다.
///
/// 플러시 한도에 걸리면 배치가 자리를 얻을 때까지 여기서 기다립니다.
async fn process_inputs(
    mut rx: mpsc::Receiver<RawInput>,
    router: Arc<ParserRouter>,
    enricher: Enricher,
    batch: BatchAssembler,
    shared: Arc<SharedState>,
) {
    while let Some(input) = rx.recv().await {
        let parsed = match &input {
            RawInput::Line { source, line } => {
                shared.lines_read.fetch_add(1, Ordering::Relaxed);
                router.route(*source, line)
            }
            RawInput::Record { source, record } => router.route_record(*source, record),
        };

        match parsed {
            Some(event) => {
                shared.events_parsed.fetch_add(1, Ordering::Relaxed);
                batch.enqueue(enricher.enrich(event)).await;
            }
            None => {
                shared.inputs_skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    tracing::debug!("ingest input channel drained");
}

/// `submit` 수락 결과
///
/// 비동기 처리를 위해 접수되었다는 의미이며, 저장 완료를 뜻하지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitAck {
    pub source: SourceSystem,
    /// 접수된 레코드 수
    pub accepted: usize,
    pub received_at: DateTime<Utc>,
}

/// 레코드를 직접 밀어 넣는 소스를 위한 진입점
///
/// 복제해서 여러 곳에서 사용할 수 있습니다. 파이프라인이 실행 중일 때만 레코드를 받습니다.
#[derive(Clone)]
pub struct IngestHandle {
    sender: SenderSlot,
    shared: Arc<SharedState>,
    max_submit_records: usize,
}

impl IngestHandle {
    /// 원시 레코드 배열을 비동기 처리 대기열에 넣습니다.
    ///
    /// 배열 전체가 들어갈 자리가 없으면 하나도 넣지 않고 [`IngestError::Submit`]을 반환합니다.
    /// 기다리지 않으므로 호출자가 재시도 시점을 정합니다.
    /// 개별 레코드의 파싱 실패는 여기서 보고되지 않습니다 (처리 단계에서 로그로 남음).
    pub fn submit(
        &self,
        source: SourceSystem,
        records: Vec<serde_json::Value>,
    ) -> Result<SubmitAck, IngestError> {
        if records.len() > self.max_submit_records {
            return Err(IngestError::Submit(format!(
                "{} records exceeds limit of {}",
                records.len(),
                self.max_submit_records
            )));
        }

        let slot = lock_slot(&self.sender);
        let Some(tx) = slot.as_ref() else {
            return Err(IngestError::Submit(
                "ingest pipeline is not running".to_owned(),
            ));
        };

        let accepted = records.len();
        let permits = match tx.try_reserve_many(accepted) {
            Ok(permits) => permits,
            Err(TrySendError::Full(())) => {
                tracing::warn!(
                    source = %source,
                    records = accepted,
                    capacity = tx.max_capacity(),
                    available = tx.capacity(),
                    "ingest queue full, submission rejected"
                );
                return Err(IngestError::Submit(format!(
                    "ingest queue full ({} of {} slots free), retry later",
                    tx.capacity(),
                    tx.max_capacity()
                )));
            }
            Err(TrySendError::Closed(())) => {
                return Err(IngestError::Channel(
                    "ingest processing task is gone".to_owned(),
                ));
            }
        };
        for (permit, record) in permits.zip(records) {
            permit.send(RawInput::Record { source, record });
        }
        drop(slot);

        self.shared
            .records_submitted
            .fetch_add(accepted as u64, Ordering::Relaxed);
        tracing::debug!(source = %source, accepted, "records submitted");

        Ok(SubmitAck {
            source,
            accepted,
            received_at: Utc::now(),
        })
    }

    /// 지금 `submit`을 받을 수 있는지 확인합니다.
    pub fn is_accepting(&self) -> bool {
        lock_slot(&self.sender).is_some()
    }
}

/// 수집 파이프라인 -- 감시/파싱/보강/배치 저장/실시간 발행의 전체 흐름을 관리합니다.
///
/// # 사용 예시
/// ```ignore
/// use trapwire_ingest::{IngestPipelineBuilder, MemoryStore};
///
/// let (mut pipeline, handle) = IngestPipelineBuilder::new()
///     .config(config)
///     .store(Arc::new(MemoryStore::new()))
///     .build()?;
///
/// let mut live = pipeline.live_channel().subscribe();
/// pipeline.start().await?;
/// handle.submit(SourceSystem::Dionaea, records)?;
/// ```
pub struct IngestPipeline {
    config: IngestConfig,
    state: PipelineState,
    router: Arc<ParserRouter>,
    store: Arc<dyn EventStore>,
    live: LiveChannel,
    geo: Option<Arc<dyn GeoResolver>>,
    shared: Arc<SharedState>,
    sender: SenderSlot,
    batch: Option<BatchAssembler>,
    cancel: CancellationToken,
    watchers: Vec<JoinHandle<()>>,
    processor: Option<JoinHandle<()>>,
}

impl IngestPipeline {
    /// 현재 상태 이름
    pub fn state_name(&self) -> &str {
        match self.state {
            PipelineState::Initialized => "initialized",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
        }
    }

    /// `submit` 진입점
    pub fn handle(&self) -> IngestHandle {
        IngestHandle {
            sender: Arc::clone(&self.sender),
            shared: Arc::clone(&self.shared),
            max_submit_records: self.config.max_submit_records,
        }
    }

    /// 실시간 팬아웃 채널
    pub fn live_channel(&self) -> &LiveChannel {
        &self.live
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// 누적 통계 스냅샷
    pub fn stats(&self) -> PipelineStats {
        self.shared.snapshot()
    }

    /// 배치에 쌓인 이벤트 수
    pub fn pending_events(&self) -> usize {
        self.batch.as_ref().map_or(0, BatchAssembler::pending)
    }

    /// 현재 배치를 즉시 플러시하고 완료를 기다립니다. 실행 중이 아니면 아무 일도 하지 않습니다.
    pub async fn flush(&self) {
        if let Some(batch) = &self.batch {
            batch.flush().await;
        }
    }

    /// 감시 파일을 모두 준비합니다. 하나라도 실패하면 아무 태스크도 시작하지 않습니다.
    async fn prime_sources(&self) -> Result<Vec<FileWatcher>, IngestError> {
        if !self.config.enabled {
            return Ok(Vec::new());
        }
        let mut watchers = Vec::with_capacity(self.config.sources.len());
        for watched in &self.config.sources {
            let mut tail = FileTail::new(&watched.path, self.config.max_line_length);
            tail.prime().await?;
            watchers.push(
                FileWatcher::new(watched.source, tail, self.config.poll_interval())
                    .with_drop_counter(Arc::clone(&self.shared.inputs_dropped)),
            );
        }
        Ok(watchers)
    }

    async fn enricher(&mut self) -> Enricher {
        if self.geo.is_none() && !self.config.geoip_db_path.is_empty() {
            let db = GeoDatabase::load_or_empty(&self.config.geoip_db_path).await;
            self.geo = Some(Arc::new(db));
        }
        match &self.geo {
            Some(resolver) => Enricher::with_resolver(Arc::clone(resolver)),
            None => Enricher::new(),
        }
    }
}

impl Pipeline for IngestPipeline {
    async fn start(&mut self) -> Result<(), TrapwireError> {
        if self.state == PipelineState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        tracing::info!(
            sources = self.config.sources.len(),
            store = self.store.name(),
            batch_size = self.config.batch_size,
            flush_interval_ms = self.config.flush_interval_ms,
            buffer_capacity = self.config.buffer_capacity,
            max_concurrent_flushes = self.config.max_concurrent_flushes,
            "starting ingest pipeline"
        );

        // 1. 감시 파일 준비 (시작 실패는 여기서만 발생)
        let watchers = self.prime_sources().await?;

        // 2. 보강 단계
        let enricher = self.enricher().await;

        // 3. 배치 조립기
        *self.shared.last_failure() = None;
        let sink = Arc::new(StoreSink {
            store: Arc::clone(&self.store),
            live: self.live.clone(),
            shared: Arc::clone(&self.shared),
        });
        let batch = BatchAssembler::new(
            sink,
            self.config.batch_size,
            self.config.flush_interval(),
            self.config.max_concurrent_flushes,
        );

        // 4. 처리 태스크와 감시 태스크 스폰
        let (tx, rx) = mpsc::channel(self.config.buffer_capacity);
        self.cancel = CancellationToken::new();
        for watcher in watchers {
            let task = watcher.run(tx.clone(), self.cancel.clone());
            self.watchers.push(tokio::spawn(task));
        }
        self.processor = Some(tokio::spawn(process_inputs(
            rx,
            Arc::clone(&self.router),
            enricher,
            batch.clone(),
            Arc::clone(&self.shared),
        )));
        *lock_slot(&self.sender) = Some(tx);
        self.batch = Some(batch);

        self.state = PipelineState::Running;
        tracing::info!(watchers = self.watchers.len(), "ingest pipeline started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TrapwireError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        tracing::info!("stopping ingest pipeline");

        // 1. 새 제출 차단
        lock_slot(&self.sender).take();

        // 2. 감시 태스크 취소 (마지막 읽기 후 종료)
        self.cancel.cancel();
        for task in std::mem::take(&mut self.watchers) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "file watcher task ended abnormally");
            }
        }

        // 3. 대기열에 남은 입력 처리
        if let Some(processor) = self.processor.take() {
            if let Err(e) = processor.await {
                tracing::warn!(error = %e, "ingest processing task ended abnormally");
            }
        }

        // 4. 최종 플러시 및 진행 중인 플러시 대기
        if let Some(batch) = self.batch.take() {
            batch.shutdown().await;
        }

        self.state = PipelineState::Stopped;
        let stats = self.shared.snapshot();
        tracing::info!(
            events_parsed = stats.events_parsed,
            inputs_dropped = stats.inputs_dropped,
            records_stored = stats.records_stored,
            records_rejected = stats.records_rejected,
            batch_failures = stats.batch_failures,
            "ingest pipeline stopped"
        );
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PipelineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            PipelineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
            PipelineState::Running => {
                if self.processor.as_ref().is_some_and(JoinHandle::is_finished) {
                    return HealthStatus::Unhealthy("processing task exited".to_owned());
                }
                let exited = self.watchers.iter().filter(|w| w.is_finished()).count();
                if exited > 0 {
                    return HealthStatus::Degraded(format!("{exited} file watcher(s) exited"));
                }
                match self.shared.last_failure().as_ref() {
                    Some(reason) => HealthStatus::Degraded(format!(
                        "last batch write to {} store failed: {reason}",
                        self.store.name()
                    )),
                    None => HealthStatus::Healthy,
                }
            }
        }
    }
}

/// 수집 파이프라인 빌더
///
/// 저장소는 필수입니다. 실시간 채널을 지정하지 않으면 빌더가 새로 만듭니다.
pub struct IngestPipelineBuilder {
    config: IngestConfig,
    store: Option<Arc<dyn EventStore>>,
    live: Option<LiveChannel>,
    geo: Option<Arc<dyn GeoResolver>>,
}

impl IngestPipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: IngestConfig::default(),
            store: None,
            live: None,
            geo: None,
        }
    }

    /// 파이프라인 설정을 지정합니다.
    pub fn config(mut self, config: IngestConfig) -> Self {
        self.config = config;
        self
    }

    /// 영구 저장소를 지정합니다.
    pub fn store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 실시간 팬아웃 채널을 지정합니다.
    ///
    /// `trapwire-daemon`은 같은 채널을 전송 계층과 공유합니다.
    pub fn live_channel(mut self, live: LiveChannel) -> Self {
        self.live = Some(live);
        self
    }

    /// 지리 정보 조회기를 지정합니다.
    ///
    /// 지정하지 않으면 시작 시 `geoip_db_path`에서 데이터셋을 읽습니다.
    pub fn geo_resolver(mut self, resolver: Arc<dyn GeoResolver>) -> Self {
        self.geo = Some(resolver);
        self
    }

    /// 파이프라인을 빌드합니다.
    ///
    /// # Returns
    /// - `IngestPipeline`: 파이프라인 인스턴스
    /// - `IngestHandle`: 레코드 제출 진입점
    pub fn build(self) -> Result<(IngestPipeline, IngestHandle), IngestError> {
        self.config.validate()?;

        let store = self.store.ok_or_else(|| IngestError::Config {
            field: "store".to_owned(),
            reason: "an event store is required".to_owned(),
        })?;

        let mut router = ParserRouter::new().with_max_input_size(self.config.max_line_length);
        for source in SourceSystem::ALL {
            if let Some(port) = self.config.destination_port_for(source) {
                router = router.with_destination_port(source, port);
            }
        }

        let pipeline = IngestPipeline {
            config: self.config,
            state: PipelineState::Initialized,
            router: Arc::new(router),
            store,
            live: self.live.unwrap_or_default(),
            geo: self.geo,
            shared: Arc::new(SharedState::default()),
            sender: Arc::new(Mutex::new(None)),
            batch: None,
            cancel: CancellationToken::new(),
            watchers: Vec::new(),
            processor: None,
        };
        let handle = pipeline.handle();

        Ok((pipeline, handle))
    }
}

impl Default for IngestPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
