//! 설정 관리 - trapwire.toml 파싱 및 런타임 설정
//!
//! [`TrapwireConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`TRAPWIRE_INGEST_BATCH_SIZE=100` 형식)
//! 3. 설정 파일 (`trapwire.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), trapwire_core::error::TrapwireError> {
//! use trapwire_core::config::TrapwireConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = TrapwireConfig::load("trapwire.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = TrapwireConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, TrapwireError};
use crate::types::SourceSystem;

/// Trapwire 통합 설정
///
/// `trapwire.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 모듈은 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrapwireConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 수집 파이프라인 설정
    #[serde(default)]
    pub ingest: IngestSection,
    /// 저장소 설정
    #[serde(default)]
    pub store: StoreConfig,
    /// 실시간 전파 설정
    #[serde(default)]
    pub live: LiveConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl TrapwireConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, TrapwireError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, TrapwireError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TrapwireError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                TrapwireError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, TrapwireError> {
        toml::from_str(toml_str).map_err(|e| {
            TrapwireError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `TRAPWIRE_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "TRAPWIRE_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "TRAPWIRE_GENERAL_LOG_FORMAT");

        // Ingest
        override_bool(&mut self.ingest.enabled, "TRAPWIRE_INGEST_ENABLED");
        override_sources(&mut self.ingest.sources, "TRAPWIRE_INGEST_SOURCES");
        override_u64(
            &mut self.ingest.poll_interval_ms,
            "TRAPWIRE_INGEST_POLL_INTERVAL_MS",
        );
        override_usize(&mut self.ingest.batch_size, "TRAPWIRE_INGEST_BATCH_SIZE");
        override_u64(
            &mut self.ingest.flush_interval_ms,
            "TRAPWIRE_INGEST_FLUSH_INTERVAL_MS",
        );
        override_string(
            &mut self.ingest.geoip_db_path,
            "TRAPWIRE_INGEST_GEOIP_DB_PATH",
        );
        override_usize(
            &mut self.ingest.buffer_capacity,
            "TRAPWIRE_INGEST_BUFFER_CAPACITY",
        );
        override_usize(
            &mut self.ingest.max_concurrent_flushes,
            "TRAPWIRE_INGEST_MAX_CONCURRENT_FLUSHES",
        );

        // Store
        override_string(&mut self.store.kind, "TRAPWIRE_STORE_KIND");
        override_string(&mut self.store.path, "TRAPWIRE_STORE_PATH");

        // Live
        override_bool(&mut self.live.enabled, "TRAPWIRE_LIVE_ENABLED");
        override_string(&mut self.live.bind, "TRAPWIRE_LIVE_BIND");
        override_usize(
            &mut self.live.subscriber_capacity,
            "TRAPWIRE_LIVE_SUBSCRIBER_CAPACITY",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "TRAPWIRE_METRICS_ENABLED");
        override_u16(&mut self.metrics.port, "TRAPWIRE_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), TrapwireError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if self.ingest.enabled && self.ingest.sources.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "ingest.sources".to_owned(),
                reason: "at least one watched source is required when ingest is enabled"
                    .to_owned(),
            }
            .into());
        }

        if self.ingest.buffer_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ingest.buffer_capacity".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        if self.ingest.max_concurrent_flushes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ingest.max_concurrent_flushes".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        let valid_store_kinds = ["jsonl", "memory"];
        if !valid_store_kinds.contains(&self.store.kind.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "store.kind".to_owned(),
                reason: format!("must be one of: {}", valid_store_kinds.join(", ")),
            }
            .into());
        }

        if self.store.kind == "jsonl" && self.store.path.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "store.path".to_owned(),
                reason: "path must not be empty for the jsonl store".to_owned(),
            }
            .into());
        }

        if self.live.enabled && self.live.subscriber_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "live.subscriber_capacity".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 헬스 체크 로그 주기 (초)
    pub health_log_interval_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            health_log_interval_secs: 60,
        }
    }
}

/// 감시 대상 로그 파일 하나
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedSource {
    /// 파일을 기록하는 트랩 서비스
    pub source: SourceSystem,
    /// 로그 파일 절대 경로
    pub path: String,
    /// 레코드에 목적지 포트가 없을 때 사용할 리스닝 포트
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_port: Option<u16>,
}

/// 수집 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSection {
    /// 활성화 여부
    pub enabled: bool,
    /// 감시 파일 목록
    pub sources: Vec<WatchedSource>,
    /// 파일 변경 확인 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 배치 크기 (이 개수만큼 모이면 플러시)
    pub batch_size: usize,
    /// 첫 이벤트 이후 플러시까지의 최대 대기 (밀리초)
    pub flush_interval_ms: u64,
    /// 최대 라인 길이 (바이트)
    pub max_line_length: usize,
    /// GeoIP 데이터셋 경로 (비어 있으면 조회하지 않음)
    pub geoip_db_path: String,
    /// 감시 태스크와 처리 태스크 사이 대기열 크기
    pub buffer_capacity: usize,
    /// 동시에 진행할 수 있는 배치 플러시 수
    pub max_concurrent_flushes: usize,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            enabled: true,
            sources: vec![
                WatchedSource {
                    source: SourceSystem::Cowrie,
                    path: "/var/log/cowrie/cowrie.json".to_owned(),
                    destination_port: None,
                },
                WatchedSource {
                    source: SourceSystem::Dionaea,
                    path: "/var/log/dionaea/dionaea.json".to_owned(),
                    destination_port: None,
                },
            ],
            poll_interval_ms: 500,
            batch_size: 50,
            flush_interval_ms: 5000,
            max_line_length: 64 * 1024,
            geoip_db_path: String::new(),
            buffer_capacity: 10_000,
            max_concurrent_flushes: 4,
        }
    }
}

/// 저장소 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 저장소 종류 (jsonl, memory)
    pub kind: String,
    /// jsonl 저장 파일 경로
    pub path: String,
    /// 레코드 최대 크기 (바이트)
    pub max_record_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: "jsonl".to_owned(),
            path: "/var/lib/trapwire/events.jsonl".to_owned(),
            max_record_bytes: 256 * 1024,
        }
    }
}

/// 실시간 전파 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// TCP 실시간 피드 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub bind: String,
    /// 구독자별 대기열 크기
    pub subscriber_capacity: usize,
    /// 최대 동시 구독 연결 수
    pub max_connections: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1:7070".to_owned(),
            subscriber_capacity: 256,
            max_connections: 64,
        }
    }
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus 엔드포인트 활성화 여부
    pub enabled: bool,
    /// 리슨 주소
    pub listen_addr: String,
    /// 리슨 포트
    pub port: u16,
    /// 엔드포인트 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

/// `cowrie=/path/a.json,dionaea=/path/b.json` 형식을 파싱합니다.
///
/// 한 항목이라도 잘못되면 기존 값을 유지합니다.
fn override_sources(target: &mut Vec<WatchedSource>, env_key: &str) {
    let Ok(val) = std::env::var(env_key) else {
        return;
    };

    let mut parsed = Vec::new();
    for item in val.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((name, path)) = item.split_once('=') else {
            warn!(env_key, item, "expected source=path, ignoring override");
            return;
        };
        match name.parse::<SourceSystem>() {
            Ok(source) => parsed.push(WatchedSource {
                source,
                path: path.trim().to_owned(),
                destination_port: None,
            }),
            Err(e) => {
                warn!(env_key, item, error = %e, "unknown source in override, ignoring");
                return;
            }
        }
    }
    *target = parsed;
}
