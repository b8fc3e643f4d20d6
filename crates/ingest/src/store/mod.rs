//! 영구 저장소 어댑터
//!
//! [`EventStore`]는 배치 하나를 받아 레코드별 결과를 돌려줍니다.
//! 배치 쓰기는 전부 아니면 전무가 아닙니다. 앞선 레코드가 거부되어도
//! 나머지 레코드는 계속 저장을 시도합니다.
//!
//! - `Ok(outcomes)`: 입력과 같은 순서, 같은 길이의 레코드별 결과
//! - `Err(_)`: 저장소에 닿을 수 없어 배치 전체가 실패
//!
//! 레코드 식별자는 어댑터가 부여합니다. 파이프라인은 식별자를 만들지 않습니다.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonLinesStore;
pub use memory::MemoryStore;

use std::sync::Arc;

use trapwire_core::config::StoreConfig;
use trapwire_core::error::StorageError;
use trapwire_core::event::{SecurityEvent, StoredEvent};
use trapwire_core::pipeline::BoxFuture;

use crate::error::IngestError;

/// 레코드 하나의 저장 결과
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// 저장됨 (식별자 부여)
    Stored(StoredEvent),
    /// 검증 또는 제약 조건으로 거부됨
    Rejected {
        /// 거부 사유
        reason: String,
    },
}

impl RecordOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored(_))
    }
}

/// 영구 저장소 trait
///
/// 파이프라인이 `Arc<dyn EventStore>`로 보관하므로 boxed future를 반환합니다.
pub trait EventStore: Send + Sync {
    /// 로그와 헬스 체크에 쓰는 이름
    fn name(&self) -> &str;

    /// 배치를 저장합니다.
    fn insert_batch<'a>(
        &'a self,
        events: &'a [SecurityEvent],
    ) -> BoxFuture<'a, Result<Vec<RecordOutcome>, StorageError>>;
}

/// 설정에 따라 저장소를 생성합니다.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn EventStore>, IngestError> {
    match config.kind.as_str() {
        "jsonl" => {
            let store = JsonLinesStore::open(&config.path, config.max_record_bytes).await?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(MemoryStore::new())),
        other => Err(IngestError::Config {
            field: "store.kind".to_owned(),
            reason: format!("unsupported store kind '{other}'"),
        }),
    }
}
