//! 파이프라인 trait - 모듈 생명주기와 확장 포인트 정의

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use crate::error::{ParseError, TrapwireError};
use crate::event::SecurityEvent;
use crate::types::SourceSystem;

/// dyn-compatible trait에서 사용하는 boxed future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 모듈 건강 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작하지만 성능 저하 또는 부분 실패
    Degraded(String),
    /// 동작 불가
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

/// 시작/정지/상태 확인 생명주기를 가진 모듈
///
/// `trapwire-daemon`은 이 trait으로 모든 모듈을 동일하게 관리합니다.
pub trait Pipeline: Send + Sync {
    /// 모듈을 시작합니다.
    fn start(&mut self) -> impl Future<Output = Result<(), TrapwireError>> + Send;

    /// 모듈을 정지합니다. 남은 작업을 정리한 뒤 반환합니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), TrapwireError>> + Send;

    /// 현재 건강 상태를 반환합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}

/// 소스별 라인 파서 trait
///
/// 새로운 트랩 서비스를 지원하려면 이 trait을 구현합니다.
/// 지원하는 트랩 서비스는 모두 한 줄에 JSON 레코드 하나를 기록하므로,
/// 구현체는 디코딩된 레코드만 다루고 라인 디코딩은 기본 구현을 사용합니다.
///
/// # 반환값
/// - `Ok(Some(event))`: 정규화 이벤트
/// - `Ok(None)`: 이 소스가 처리하지 않는 라인
/// - `Err(_)`: 손상된 라인
pub trait SourceParser: Send + Sync {
    /// 담당 소스 시스템
    fn source(&self) -> SourceSystem;

    /// 디코딩된 레코드 하나를 정규화 이벤트로 변환합니다.
    ///
    /// 파일 대신 레코드를 직접 밀어 넣는 소스도 이 경로를 사용합니다.
    fn parse_record(&self, record: &serde_json::Value)
    -> Result<Option<SecurityEvent>, ParseError>;

    /// 원시 라인 하나를 정규화 이벤트로 변환합니다.
    fn parse(&self, line: &str) -> Result<Option<SecurityEvent>, ParseError> {
        let record: serde_json::Value =
            serde_json::from_str(line).map_err(|e| ParseError::Malformed {
                source_system: self.source().to_string(),
                reason: e.to_string(),
            })?;
        self.parse_record(&record)
    }
}
