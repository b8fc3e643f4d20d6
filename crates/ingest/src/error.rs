//! 수집 파이프라인 에러 타입
//!
//! [`IngestError`]는 수집 파이프라인 내부에서 발생하는 에러를 표현합니다.
//! `From<IngestError> for TrapwireError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.
//!
//! 라인 단위 파싱 실패, 레코드 단위 저장 거부, 구독자 전송 실패는
//! 각 단계에서 로그로 처리되며 이 타입으로 전파되지 않습니다.
//! 여기에 모이는 것은 시작 실패와 설정 오류처럼 복구할 수 없는 경우입니다.

use trapwire_core::error::{ConfigError, ParseError, PipelineError, StorageError, TrapwireError};

/// 수집 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// 라인 파싱 실패
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// 감시 파일을 열 수 없음 (시작 실패)
    #[error("watch error: {path}: {reason}")]
    Watch {
        /// 감시 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 저장소 에러
    #[error("store error: {0}")]
    Store(#[from] StorageError),

    /// GeoIP 데이터셋 로딩 실패
    #[error("geo dataset error: {path}: {reason}")]
    GeoDataset {
        /// 데이터셋 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// GeoIP 조회 실패 (이벤트는 센티널로 계속 진행)
    #[error("geo lookup error: {0}")]
    GeoLookup(String),

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// 제출 거부 (파이프라인 정지 또는 한도 초과)
    #[error("submission rejected: {0}")]
    Submit(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IngestError> for TrapwireError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Parse(e) => TrapwireError::Parse(e),
            IngestError::Store(e) => TrapwireError::Storage(e),
            IngestError::Io(e) => TrapwireError::Io(e),
            IngestError::Config { field, reason } => {
                TrapwireError::Config(ConfigError::InvalidValue { field, reason })
            }
            IngestError::Channel(reason) | IngestError::Submit(reason) => {
                TrapwireError::Pipeline(PipelineError::ChannelSend(reason))
            }
            other => TrapwireError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_error_display() {
        let err = IngestError::Watch {
            path: "/var/log/cowrie/cowrie.json".to_owned(),
            reason: "permission denied".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("cowrie.json"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn config_error_converts_to_config_variant() {
        let err = IngestError::Config {
            field: "batch_size".to_owned(),
            reason: "must be 1-10000".to_owned(),
        };
        let top: TrapwireError = err.into();
        assert!(matches!(
            top,
            TrapwireError::Config(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn watch_error_converts_to_init_failure() {
        let err = IngestError::Watch {
            path: "/x".to_owned(),
            reason: "missing parent".to_owned(),
        };
        let top: TrapwireError = err.into();
        assert!(matches!(
            top,
            TrapwireError::Pipeline(PipelineError::InitFailed(_))
        ));
    }

    #[test]
    fn store_error_keeps_storage_variant() {
        let err: IngestError = StorageError::Unavailable("down".to_owned()).into();
        let top: TrapwireError = err.into();
        assert!(matches!(top, TrapwireError::Storage(_)));
    }
}
