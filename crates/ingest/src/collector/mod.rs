//! 원시 입력 수집 모듈
//!
//! # 수집 경로
//! - [`FileWatcher`]: 트랩 서비스 로그 파일 감시 (커서 기반 tail)
//! - [`IngestHandle::submit`](crate::pipeline::IngestHandle::submit): 레코드를 직접 밀어 넣는 소스
//!
//! # 아키텍처
//! 각 감시 파일은 자체 tokio 태스크에서 실행되며, 읽은 라인을
//! 유한(bounded) 채널로 단일 처리 태스크에 전달합니다. 감시 태스크는 `try_send`만 쓰므로
//! 후속 단계가 느려도 파일 읽기는 막히지 않습니다. 대기열이 가득 차면 라인을 버리고
//! 그 수를 셉니다. 파일 하나 안에서 전달된 라인의 순서는 유지됩니다.

pub mod file;

pub use file::{FileTail, FileWatcher};

use trapwire_core::types::SourceSystem;

/// 처리 태스크로 전달되는 원시 입력
#[derive(Debug, Clone, PartialEq)]
pub enum RawInput {
    /// 감시 파일에서 읽은 라인 (개행 제외)
    Line {
        source: SourceSystem,
        line: String,
    },
    /// 프로그래밍 방식으로 제출된 레코드
    Record {
        source: SourceSystem,
        record: serde_json::Value,
    },
}

impl RawInput {
    /// 입력을 생성한 소스 시스템
    pub fn source(&self) -> SourceSystem {
        match self {
            Self::Line { source, .. } | Self::Record { source, .. } => *source,
        }
    }
}
