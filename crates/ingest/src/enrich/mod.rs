//! 보강 단계 -- 지리 정보와 위험 점수를 계산합니다.
//!
//! [`Enricher::enrich`]는 이벤트를 소비하고 새 버전을 반환합니다.
//! 공유 상태를 수정하지 않으며, 어떤 입력에도 실패하지 않고 이벤트를 버리지 않습니다.
//! 보강 이후 `geo`는 항상 `Some`입니다 (실제 값 또는 [`GeoInfo::unknown`]).
//!
//! # 위험 점수 정책
//! | 항목 | 가중치 |
//! |---|---|
//! | 로그인 시도 | +1 |
//! | 명령 실행 | +2 |
//! | 다운로드 | +3 |
//! | 위험 명령 | +3 |
//! | 의심 계정명 | +1 |
//! | 악성코드 다운로드 | +3 |
//! | 스캐너 User-Agent | +2 |
//! | 민감 경로 접근 | +1 |
//!
//! 합계는 [`RiskScore::MAX`]에서 잘립니다.

pub mod geo;

pub use geo::{Cidr, GeoDatabase};

use std::net::IpAddr;
use std::sync::Arc;

use metrics::counter;
use trapwire_core::event::SecurityEvent;
use trapwire_core::metrics as m;
use trapwire_core::types::{EventKind, GeoInfo, Indicator, RiskScore};

use crate::error::IngestError;
use crate::parser::{is_risky_command, is_suspicious_username};

/// 지리 정보 조회 trait
///
/// `Ok(None)`은 데이터셋에 없는 주소, `Err`은 일시적인 조회 실패입니다.
/// 두 경우 모두 보강 단계가 센티널로 대체합니다.
pub trait GeoResolver: Send + Sync {
    fn lookup(&self, ip: IpAddr) -> Result<Option<GeoInfo>, IngestError>;
}

/// 보강 단계
#[derive(Clone, Default)]
pub struct Enricher {
    resolver: Option<Arc<dyn GeoResolver>>,
}

impl Enricher {
    /// 조회 없이 센티널만 채우는 보강기
    pub fn new() -> Self {
        Self::default()
    }

    /// 지리 정보 조회기를 설정합니다.
    pub fn with_resolver(resolver: Arc<dyn GeoResolver>) -> Self {
        Self {
            resolver: Some(resolver),
        }
    }

    /// 이벤트를 보강합니다.
    pub fn enrich(&self, mut event: SecurityEvent) -> SecurityEvent {
        event.geo = Some(self.resolve(event.source_ip));
        event.risk_score = risk_score(&event);
        event
    }

    /// 데이터셋에 있으면 사설 주소라도 그 값을 씁니다.
    /// 공인 주소가 없을 때만 miss로 셉니다.
    fn resolve(&self, ip: IpAddr) -> GeoInfo {
        let Some(resolver) = &self.resolver else {
            return GeoInfo::unknown();
        };
        match resolver.lookup(ip) {
            Ok(Some(info)) => info,
            Ok(None) => {
                if is_routable(ip) {
                    counter!(m::INGEST_GEO_MISSES_TOTAL).increment(1);
                }
                GeoInfo::unknown()
            }
            Err(e) => {
                counter!(m::INGEST_GEO_MISSES_TOTAL).increment(1);
                tracing::warn!(ip = %ip, error = %e, "geo lookup failed, using unknown sentinel");
                GeoInfo::unknown()
            }
        }
    }
}

/// 공인 주소인지 확인합니다.
///
/// 사설/루프백/링크 로컬/미지정 주소는 데이터셋에 없어도 miss로 세지 않습니다.
pub fn is_routable(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast())
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_routable(IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            let unique_local = (first & 0xfe00) == 0xfc00;
            let link_local = (first & 0xffc0) == 0xfe80;
            !(v6.is_loopback() || v6.is_unspecified() || unique_local || link_local)
        }
    }
}

/// 위험 점수를 계산합니다.
///
/// 전함수입니다. 알 수 없는 입력의 기여는 0입니다.
pub fn risk_score(event: &SecurityEvent) -> RiskScore {
    let mut score: u32 = match event.event_kind {
        EventKind::LoginAttempt => 1,
        EventKind::CommandExecution => 2,
        EventKind::Download => 3,
        EventKind::Connection | EventKind::Other => 0,
    };

    let has = |indicator: Indicator| event.indicators.contains(&indicator);

    if has(Indicator::RiskyCommand) || event.command.as_deref().is_some_and(is_risky_command) {
        score += 3;
    }
    let suspicious_user = event
        .credentials
        .as_ref()
        .and_then(|c| c.username.as_deref())
        .is_some_and(is_suspicious_username);
    if has(Indicator::SuspiciousUsername) || suspicious_user {
        score += 1;
    }
    if has(Indicator::MalwareDownload) {
        score += 3;
    }
    if has(Indicator::ScannerUserAgent) {
        score += 2;
    }
    if has(Indicator::SensitivePath) {
        score += 1;
    }

    RiskScore::new(score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use trapwire_core::types::{Credentials, SourceSystem};

    fn event(kind: EventKind, ip: &str) -> SecurityEvent {
        SecurityEvent::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            SourceSystem::Cowrie,
            ip.parse().unwrap(),
            40000,
            22,
            kind,
            serde_json::json!({}),
        )
    }

    struct FailingResolver;

    impl GeoResolver for FailingResolver {
        fn lookup(&self, _ip: IpAddr) -> Result<Option<GeoInfo>, IngestError> {
            Err(IngestError::GeoLookup("dataset reloading".to_owned()))
        }
    }

    fn dataset() -> Arc<dyn GeoResolver> {
        Arc::new(
            GeoDatabase::from_json(
                r#"[{"network":"203.0.113.0/24","country":"Exampleland","country_code":"EX"}]"#,
            )
            .unwrap(),
        )
    }

    #[test]
    fn enrich_populates_geo_from_dataset() {
        let enricher = Enricher::with_resolver(dataset());
        let out = enricher.enrich(event(EventKind::LoginAttempt, "203.0.113.5"));
        let geo = out.geo.unwrap();
        assert_eq!(geo.country, "Exampleland");
        assert!(!geo.is_unknown());
    }

    #[test]
    fn miss_uses_unknown_sentinel() {
        let enricher = Enricher::with_resolver(dataset());
        let out = enricher.enrich(event(EventKind::Connection, "198.51.100.1"));
        assert!(out.geo.unwrap().is_unknown());
    }

    #[test]
    fn private_address_listed_in_dataset_is_resolved() {
        let db = GeoDatabase::from_json(
            r#"[
                {"network":"192.168.1.100/32","country":"United States","country_code":"US","city":"Lab"},
                {"network":"203.0.113.0/24","country":"Exampleland","country_code":"EX"}
            ]"#,
        )
        .unwrap();
        let enricher = Enricher::with_resolver(Arc::new(db));

        let out = enricher.enrich(event(EventKind::Connection, "192.168.1.100"));
        let geo = out.geo.unwrap();
        assert_eq!(geo.country_code, "US");
        assert_eq!(geo.city, "Lab");

        let out = enricher.enrich(event(EventKind::Connection, "192.168.1.101"));
        assert!(out.geo.unwrap().is_unknown());
    }

    #[test]
    fn private_address_lookup_failure_uses_sentinel() {
        let enricher = Enricher::with_resolver(Arc::new(FailingResolver));
        let out = enricher.enrich(event(EventKind::Connection, "192.168.1.10"));
        assert!(out.geo.unwrap().is_unknown());
    }

    #[test]
    fn lookup_failure_never_drops_event() {
        let enricher = Enricher::with_resolver(Arc::new(FailingResolver));
        let input = event(EventKind::CommandExecution, "203.0.113.5");
        let out = enricher.enrich(input.clone());
        assert!(out.geo.as_ref().unwrap().is_unknown());
        assert_eq!(out.source_ip, input.source_ip);
        assert_eq!(out.risk_score.value(), 2);
    }

    #[test]
    fn enricher_without_resolver_still_sets_geo() {
        let out = Enricher::new().enrich(event(EventKind::Other, "203.0.113.5"));
        assert!(out.geo.is_some());
        assert_eq!(out.risk_score.value(), 0);
    }

    #[test]
    fn routable_classification() {
        assert!(is_routable("203.0.113.5".parse().unwrap()));
        assert!(!is_routable("10.0.0.1".parse().unwrap()));
        assert!(!is_routable("127.0.0.1".parse().unwrap()));
        assert!(!is_routable("169.254.1.1".parse().unwrap()));
        assert!(!is_routable("::1".parse().unwrap()));
        assert!(!is_routable("fd00::1".parse().unwrap()));
        assert!(!is_routable("fe80::1".parse().unwrap()));
        assert!(!is_routable("::ffff:192.168.0.1".parse().unwrap()));
        assert!(is_routable("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn risk_for_risky_command() {
        let mut e = event(EventKind::CommandExecution, "203.0.113.5");
        e.command = Some("wget".to_owned());
        assert_eq!(risk_score(&e).value(), 5);

        // 플래그와 명령이 둘 다 있어도 한 번만 가산
        e.indicators.insert(Indicator::RiskyCommand);
        assert_eq!(risk_score(&e).value(), 5);
    }

    #[test]
    fn risk_for_suspicious_login() {
        let mut e = event(EventKind::LoginAttempt, "203.0.113.5");
        e.credentials = Credentials::from_parts(Some("root".to_owned()), None);
        assert_eq!(risk_score(&e).value(), 2);
    }

    #[test]
    fn risk_is_capped() {
        let mut e = event(EventKind::Download, "203.0.113.5");
        e.command = Some("busybox".to_owned());
        e.indicators.extend([
            Indicator::RiskyCommand,
            Indicator::SuspiciousUsername,
            Indicator::MalwareDownload,
            Indicator::ScannerUserAgent,
            Indicator::SensitivePath,
        ]);
        // 3 + 3 + 1 + 3 + 2 + 1 = 13
        assert_eq!(risk_score(&e).value(), RiskScore::MAX);
    }

    #[test]
    fn connection_scores_zero() {
        let e = event(EventKind::Connection, "203.0.113.5");
        assert_eq!(risk_score(&e).value(), 0);
    }
}
