//! JSON Lines 파일 저장소
//!
//! 저장된 이벤트를 한 줄에 하나씩 append-only 파일에 기록합니다.
//! 배치의 각 레코드는 독립적으로 검증/직렬화되며, 통과한 레코드만
//! 한 번의 append와 `sync_data`로 기록됩니다.
//!
//! append가 중간에 실패하면(예: 디스크 가득 참) 파일을 쓰기 전 길이로 잘라,
//! 개행 없는 조각 뒤에 다음 배치가 붙지 않게 합니다.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use trapwire_core::error::StorageError;
use trapwire_core::event::{SecurityEvent, StoredEvent};
use trapwire_core::pipeline::BoxFuture;
use uuid::Uuid;

use super::{EventStore, RecordOutcome};
use crate::error::IngestError;

/// JSON Lines 파일 저장소
pub struct JsonLinesStore {
    path: PathBuf,
    file: Mutex<File>,
    /// 레코드 최대 크기 (바이트, 개행 제외)
    max_record_bytes: usize,
}

impl JsonLinesStore {
    /// 저장 파일을 엽니다. 파일과 상위 디렉토리가 없으면 생성합니다.
    pub async fn open(
        path: impl AsRef<Path>,
        max_record_bytes: usize,
    ) -> Result<Self, IngestError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        tracing::info!(path = %path.display(), "jsonl event store opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
            max_record_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 레코드 하나를 검증하고 직렬화합니다.
    fn encode(&self, event: &SecurityEvent) -> Result<(StoredEvent, String), String> {
        event.validate()?;

        let stored = StoredEvent {
            id: Uuid::new_v4().to_string(),
            stored_at: Utc::now(),
            event: event.clone(),
        };
        let line = serde_json::to_string(&stored).map_err(|e| format!("serialize: {e}"))?;
        if line.len() > self.max_record_bytes {
            return Err(format!(
                "record too large: {} bytes (max: {})",
                line.len(),
                self.max_record_bytes
            ));
        }
        Ok((stored, line))
    }

    async fn write_batch(
        &self,
        events: &[SecurityEvent],
    ) -> Result<Vec<RecordOutcome>, StorageError> {
        let mut outcomes = Vec::with_capacity(events.len());
        let mut buf = String::new();

        for event in events {
            match self.encode(event) {
                Ok((stored, line)) => {
                    buf.push_str(&line);
                    buf.push('\n');
                    outcomes.push(RecordOutcome::Stored(stored));
                }
                Err(reason) => outcomes.push(RecordOutcome::Rejected { reason }),
            }
        }

        if buf.is_empty() {
            return Ok(outcomes);
        }

        let mut file = self.file.lock().await;
        append_or_rollback(&mut *file, buf.as_bytes(), &self.path)
            .await
            .map_err(|e| StorageError::Write(format!("{}: {e}", self.path.display())))?;

        Ok(outcomes)
    }
}

/// append 대상 파일
trait AppendTarget: AsyncWrite + Unpin + Send {
    async fn current_len(&self) -> io::Result<u64>;
    async fn sync(&self) -> io::Result<()>;
    async fn truncate(&self, len: u64) -> io::Result<()>;
}

impl AppendTarget for File {
    async fn current_len(&self) -> io::Result<u64> {
        Ok(self.metadata().await?.len())
    }

    async fn sync(&self) -> io::Result<()> {
        self.sync_data().await
    }

    async fn truncate(&self, len: u64) -> io::Result<()> {
        self.set_len(len).await
    }
}

/// `bytes`를 덧붙이고 디스크에 반영합니다.
///
/// 실패하면 쓰기 전 길이로 되돌린 뒤 원래 오류를 반환합니다. 되돌리기 실패는 로그만 남깁니다.
async fn append_or_rollback<F: AppendTarget>(
    file: &mut F,
    bytes: &[u8],
    path: &Path,
) -> io::Result<()> {
    let start = file.current_len().await?;

    let written = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync().await
    }
    .await;

    let Err(e) = written else {
        return Ok(());
    };
    match file.truncate(start).await {
        Ok(()) => {
            tracing::warn!(path = %path.display(), len = start, error = %e, "append failed, partial write truncated");
        }
        Err(truncate_err) => {
            tracing::error!(
                path = %path.display(),
                len = start,
                error = %e,
                truncate_error = %truncate_err,
                "append failed and partial write could not be truncated"
            );
        }
    }
    Err(e)
}

impl EventStore for JsonLinesStore {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn insert_batch<'a>(
        &'a self,
        events: &'a [SecurityEvent],
    ) -> BoxFuture<'a, Result<Vec<RecordOutcome>, StorageError>> {
        Box::pin(self.write_batch(events))
    }
}
