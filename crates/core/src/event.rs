//! 이벤트 모델 - 파이프라인 전 구간의 작업 단위
//!
//! [`SecurityEvent`]는 소스 파서가 원시 라인 하나로부터 생성하는 정규화 이벤트입니다.
//! 보강 단계는 이벤트를 소비하고 새 버전을 반환하며, 배치에 들어간 이후로는
//! 어떤 구성 요소도 이벤트를 수정하지 않습니다.
//!
//! [`StoredEvent`]는 저장소 어댑터가 식별자를 부여한 결과입니다.
//! 파이프라인 자체는 영구 식별자를 만들지 않습니다.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    Credentials, EventKind, GeoInfo, Indicator, Protocol, RiskScore, SourceSystem,
};

// --- 실시간 채널 이벤트 타입 상수 ---

/// 저장이 확인된 새 이벤트
pub const EVENT_TYPE_NEW_EVENT: &str = "new_event";

/// 정규화 보안 이벤트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// 활동이 실제로 발생한 시각 (수집 시각 아님)
    pub timestamp: DateTime<Utc>,
    /// 이벤트를 생성한 트랩 서비스
    pub source_system: SourceSystem,
    pub source_ip: IpAddr,
    pub source_port: u16,
    pub destination_port: u16,
    /// 목적지 포트로 추정한 프로토콜
    pub protocol: Protocol,
    pub event_kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    /// 실행된 명령의 첫 토큰
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// 공격자 입력 원문 (명령줄, 요청 라인, 다운로드 URL 등)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// 트랩 호스트 이름
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor: Option<String>,
    /// 감사용 원본 구조 사본
    pub raw_payload: serde_json::Value,
    /// 보강 전에는 `None`, 보강 후에는 항상 `Some`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoInfo>,
    #[serde(default)]
    pub risk_score: RiskScore,
    /// 파싱 단계 위험 신호
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub indicators: BTreeSet<Indicator>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl SecurityEvent {
    /// 필수 필드만으로 이벤트를 생성합니다.
    ///
    /// 프로토콜은 목적지 포트에서 결정됩니다.
    pub fn new(
        timestamp: DateTime<Utc>,
        source_system: SourceSystem,
        source_ip: IpAddr,
        source_port: u16,
        destination_port: u16,
        event_kind: EventKind,
        raw_payload: serde_json::Value,
    ) -> Self {
        Self {
            timestamp,
            source_system,
            source_ip,
            source_port,
            destination_port,
            protocol: Protocol::from_port(destination_port),
            event_kind,
            credentials: None,
            command: None,
            raw_input: None,
            session_id: None,
            sensor: None,
            raw_payload,
            geo: None,
            risk_score: RiskScore::default(),
            indicators: BTreeSet::new(),
            tags: BTreeSet::new(),
        }
    }

    /// 로그 출력용 한 줄 요약
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} {} {}:{} -> :{} ({})",
            self.source_system,
            self.event_kind,
            self.source_ip,
            self.source_port,
            self.destination_port,
            self.protocol,
        );
        if let Some(session) = &self.session_id {
            out.push_str(" session=");
            out.push_str(session);
        }
        out
    }

    /// 저장 레코드 제약을 검증합니다.
    ///
    /// 저장소 어댑터가 레코드 단위로 호출하며, 실패한 레코드만 거부됩니다.
    pub fn validate(&self) -> Result<(), String> {
        if self.source_ip.is_unspecified() {
            return Err(format!("source_ip {} is unspecified", self.source_ip));
        }
        if self.destination_port == 0 {
            return Err("destination_port must not be 0".to_owned());
        }
        if self.geo.is_none() {
            return Err("event has not been enriched (geo missing)".to_owned());
        }
        if self.risk_score.value() > RiskScore::MAX {
            return Err(format!("risk_score {} out of range", self.risk_score));
        }
        Ok(())
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecurityEvent[{}] risk={}", self.summary(), self.risk_score)
    }
}

/// 저장소가 식별자를 부여한 이벤트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// 저장소가 생성한 식별자
    pub id: String,
    /// 저장 시각
    pub stored_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SecurityEvent,
}

impl fmt::Display for StoredEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoredEvent[{}] {}", self.id, self.event.summary())
    }
}
