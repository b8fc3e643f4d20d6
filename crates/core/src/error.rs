//! 에러 타입 - 도메인별 에러 정의

/// Trapwire 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum TrapwireError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 파싱 에러
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// 스토리지 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 이미 실행 중
    #[error("pipeline is already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline is not running")]
    NotRunning,
}

/// 파싱 에러
///
/// 소스 파서가 라인을 해석하지 못한 경우입니다.
/// "이 소스의 라인이 아님"은 에러가 아니라 `Ok(None)`으로 표현합니다.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// 구조화 데이터 디코딩 실패
    #[error("malformed {source_system} record: {reason}")]
    Malformed {
        source_system: String,
        reason: String,
    },

    /// 필수 필드 누락 또는 타입 불일치
    #[error("{source_system} record field '{field}': {reason}")]
    Field {
        source_system: String,
        field: String,
        reason: String,
    },

    /// 입력 데이터 초과
    #[error("input too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}

/// 스토리지 에러
///
/// 배치 전체가 실패한 경우에만 사용합니다.
/// 레코드 단위 거부는 에러가 아니라 정상적인 부분 성공 결과입니다.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 저장소에 연결할 수 없음
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// 쓰기 실패
    #[error("write failed: {0}")]
    Write(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_converts_to_top_level() {
        let err: TrapwireError = ParseError::Malformed {
            source_system: "cowrie".to_owned(),
            reason: "expected value".to_owned(),
        }
        .into();
        assert!(matches!(err, TrapwireError::Parse(_)));
        assert!(err.to_string().contains("cowrie"));
    }

    #[test]
    fn field_error_display_names_field() {
        let err = ParseError::Field {
            source_system: "dionaea".to_owned(),
            field: "src_port".to_owned(),
            reason: "missing".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("dionaea"));
        assert!(msg.contains("src_port"));
    }

    #[test]
    fn storage_error_display() {
        let err = StorageError::Unavailable("connection refused".to_owned());
        assert_eq!(err.to_string(), "store unavailable: connection refused");
    }
}
