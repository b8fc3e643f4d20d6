//! 파일 기반 수집기
//!
//! 트랩 서비스 로그 파일을 감시하며 새로 추가된 라인만 전달합니다.
//! 파일마다 바이트 커서를 유지하므로 같은 변경 알림이 반복되어도
//! 이미 처리한 라인을 다시 내보내지 않습니다.
//!
//! # 시작 동작
//! 시작 시점에 이미 있는 내용은 재생하지 않습니다 ([`FileTail::prime`]이 커서를 끝으로 옮깁니다).
//! 시작 시점에 없던 파일은 나타나는 순간 처음부터 읽습니다.
//!
//! # 로테이션 감지
//! - inode 변경 (logrotate의 rename + create)
//! - 파일 크기 축소 (truncation)
//! - 삭제 후 재생성
//!
//! 세 경우 모두 커서를 0으로 되돌립니다.

use std::borrow::Cow;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use metrics::counter;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trapwire_core::metrics as m;
use trapwire_core::types::SourceSystem;

use super::RawInput;
use crate::error::IngestError;

/// 폴링 한 번에 읽는 최대 바이트 수. 나머지는 다음 폴링에서 이어 읽습니다.
const MAX_READ_PER_POLL: u64 = 4 * 1024 * 1024;

/// 단일 파일 tail 상태
///
/// 커서는 파서로 넘긴 내용 바로 뒤를 가리킵니다.
/// 개행으로 끝나지 않은 마지막 조각은 `pending`에 보관했다가 다음 폴링에서 이어 붙입니다.
#[derive(Debug)]
pub struct FileTail {
    path: PathBuf,
    /// 다음에 읽을 바이트 오프셋
    cursor: u64,
    /// 현재 파일 식별자 (Unix inode)
    file_id: Option<u64>,
    /// 아직 개행을 만나지 못한 조각
    pending: BytesMut,
    max_line_length: usize,
    /// 너무 긴 라인의 나머지를 버리는 중
    discarding: bool,
}

impl FileTail {
    pub fn new(path: impl Into<PathBuf>, max_line_length: usize) -> Self {
        Self {
            path: path.into(),
            cursor: 0,
            file_id: None,
            pending: BytesMut::new(),
            max_line_length,
            discarding: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 현재 커서 (바이트 오프셋)
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// 감시를 준비합니다. 기존 내용은 건너뛰도록 커서를 파일 끝에 둡니다.
    ///
    /// 파일이 아직 없으면 커서 0에서 대기합니다. 상위 디렉토리가 없거나
    /// 파일을 열 수 없으면 시작 실패로 보고합니다.
    pub async fn prime(&mut self) -> Result<(), IngestError> {
        self.pending.clear();
        self.discarding = false;

        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => {
                if !meta.is_file() {
                    return Err(self.watch_error("not a regular file"));
                }
                File::open(&self.path)
                    .await
                    .map_err(|e| self.watch_error(e.to_string()))?;
                self.cursor = meta.len();
                self.file_id = file_id(&meta);
                debug!(path = %self.path.display(), cursor = self.cursor, "watch primed at end of file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let parent_exists = match self.path.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => {
                        tokio::fs::metadata(parent)
                            .await
                            .is_ok_and(|meta| meta.is_dir())
                    }
                    _ => true,
                };
                if !parent_exists {
                    return Err(self.watch_error("parent directory does not exist"));
                }
                self.cursor = 0;
                self.file_id = None;
                info!(path = %self.path.display(), "watched file does not exist yet, waiting for it");
                Ok(())
            }
            Err(e) => Err(self.watch_error(e.to_string())),
        }
    }

    /// 변경 알림 한 번을 처리합니다. 커서 이후 새로 추가된 완전한 라인을 반환합니다.
    ///
    /// 빈 라인과 공백뿐인 라인은 제외됩니다.
    pub async fn poll(&mut self) -> std::io::Result<Vec<String>> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.cursor > 0 || self.file_id.is_some() {
                    info!(path = %self.path.display(), "watched file removed, waiting for it to be recreated");
                    self.reset();
                    self.file_id = None;
                }
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let id = file_id(&meta);
        let len = meta.len();
        if self.file_id.is_some() && id != self.file_id {
            info!(path = %self.path.display(), "watched file rotated, reading from start");
            self.reset();
        } else if len < self.cursor {
            info!(
                path = %self.path.display(),
                cursor = self.cursor,
                len,
                "watched file truncated, reading from start"
            );
            self.reset();
        }
        self.file_id = id;

        if len <= self.cursor {
            return Ok(Vec::new());
        }

        let want = (len - self.cursor).min(MAX_READ_PER_POLL);
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(self.cursor)).await?;

        let mut chunk = Vec::with_capacity(usize::try_from(want).unwrap_or(0));
        let read = file.take(want).read_to_end(&mut chunk).await?;
        self.cursor += read as u64;
        self.pending.extend_from_slice(&chunk);

        Ok(self.drain_lines())
    }

    fn reset(&mut self) {
        self.cursor = 0;
        self.pending.clear();
        self.discarding = false;
    }

    fn drain_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw = self.pending.split_to(pos + 1);
            if self.discarding {
                self.discarding = false;
                continue;
            }
            let raw = &raw[..pos];
            if raw.len() > self.max_line_length {
                warn!(
                    path = %self.path.display(),
                    len = raw.len(),
                    max = self.max_line_length,
                    "line exceeds max_line_length, discarded"
                );
                continue;
            }
            if let Some(line) = self.decode(raw) {
                lines.push(line);
            }
        }

        if self.pending.len() > self.max_line_length {
            warn!(
                path = %self.path.display(),
                len = self.pending.len(),
                max = self.max_line_length,
                "unterminated line exceeds max_line_length, discarding until next newline"
            );
            self.pending.clear();
            self.discarding = true;
        }

        lines
    }

    fn decode(&self, raw: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(raw);
        if matches!(text, Cow::Owned(_)) {
            warn!(path = %self.path.display(), "line is not valid UTF-8, decoded lossily");
        }
        let text = text.trim_end_matches('\r');
        if text.trim().is_empty() {
            return None;
        }
        Some(text.to_owned())
    }

    fn watch_error(&self, reason: impl Into<String>) -> IngestError {
        IngestError::Watch {
            path: self.path.display().to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}

/// 감시 파일 하나를 담당하는 수집기
///
/// 등록 시점에 소스 시스템 태그가 붙으며, 읽은 라인마다 그 태그를 실어 보냅니다.
/// 처리 대기열이 가득 차면 기다리지 않고 라인을 버린 뒤 그 수를 셉니다.
pub struct FileWatcher {
    source: SourceSystem,
    tail: FileTail,
    poll_interval: Duration,
    dropped: Arc<AtomicU64>,
}

impl FileWatcher {
    /// 준비된([`FileTail::prime`]) tail로 수집기를 생성합니다.
    pub fn new(source: SourceSystem, tail: FileTail, poll_interval: Duration) -> Self {
        Self {
            source,
            tail,
            poll_interval,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 버린 라인 수를 여러 수집기가 함께 쓰는 카운터에 기록하도록 합니다.
    pub fn with_drop_counter(mut self, dropped: Arc<AtomicU64>) -> Self {
        self.dropped = dropped;
        self
    }

    pub fn source(&self) -> SourceSystem {
        self.source
    }

    /// 취소될 때까지 파일을 폴링합니다.
    ///
    /// 취소되면 마지막으로 한 번 더 읽어 그 사이 추가된 라인을 넘긴 뒤 종료합니다.
    /// 읽기 실패는 로그만 남기고 다음 주기에 다시 시도합니다.
    pub async fn run(mut self, tx: mpsc::Sender<RawInput>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failing = false;

        info!(
            source = %self.source,
            path = %self.tail.path().display(),
            cursor = self.tail.cursor(),
            "file watcher started"
        );

        loop {
            let stopping = tokio::select! {
                biased;
                () = cancel.cancelled() => true,
                _ = ticker.tick() => false,
            };

            match self.tail.poll().await {
                Ok(lines) => {
                    if failing {
                        info!(path = %self.tail.path().display(), "watched file readable again");
                        failing = false;
                    }
                    if !self.forward(lines, &tx) {
                        debug!(source = %self.source, "processing channel closed, watcher exiting");
                        return;
                    }
                }
                Err(e) if !failing => {
                    warn!(path = %self.tail.path().display(), error = %e, "failed to read watched file");
                    failing = true;
                }
                Err(e) => {
                    debug!(path = %self.tail.path().display(), error = %e, "watched file still unreadable");
                }
            }

            if stopping {
                break;
            }
        }

        debug!(source = %self.source, path = %self.tail.path().display(), "file watcher stopped");
    }

    /// 읽은 라인을 대기열에 넣습니다. 처리 태스크가 사라졌으면 `false`를 반환합니다.
    fn forward(&self, lines: Vec<String>, tx: &mpsc::Sender<RawInput>) -> bool {
        if lines.is_empty() {
            return true;
        }
        counter!(m::INGEST_LINES_READ_TOTAL, m::LABEL_SOURCE => self.source.as_str())
            .increment(lines.len() as u64);

        let mut dropped = 0u64;
        for line in lines {
            let input = RawInput::Line {
                source: self.source,
                line,
            };
            match tx.try_send(input) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => dropped += 1,
                Err(TrySendError::Closed(_)) => return false,
            }
        }

        if dropped > 0 {
            self.dropped.fetch_add(dropped, Ordering::Relaxed);
            counter!(m::INGEST_INPUTS_DROPPED_TOTAL, m::LABEL_SOURCE => self.source.as_str())
                .increment(dropped);
            warn!(
                source = %self.source,
                path = %self.tail.path().display(),
                dropped,
                capacity = tx.max_capacity(),
                "processing queue full, lines dropped"
            );
        }
        true
    }
}
