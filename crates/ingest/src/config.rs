//! 수집 파이프라인 설정
//!
//! [`IngestConfig`]는 core의 [`IngestSection`](trapwire_core::config::IngestSection)을
//! 기반으로 수집 파이프라인 전용 설정을 제공합니다.
//!
//! # 사용 예시
//! ```ignore
//! use trapwire_core::config::TrapwireConfig;
//! use trapwire_ingest::config::IngestConfig;
//!
//! let core_config = TrapwireConfig::default();
//! let config = IngestConfig::from_core(&core_config.ingest);
//! ```

use std::collections::HashSet;
use std::path::{Component, Path};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use trapwire_core::config::{IngestSection, WatchedSource};
use trapwire_core::types::SourceSystem;

use crate::error::IngestError;

const MAX_BATCH_SIZE: usize = 10_000;
const MAX_FLUSH_INTERVAL_MS: u64 = 3_600_000;
const MIN_POLL_INTERVAL_MS: u64 = 10;
const MAX_POLL_INTERVAL_MS: u64 = 60_000;
const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;
const MAX_BUFFER_CAPACITY: usize = 10_000_000;
const MAX_CONCURRENT_FLUSHES: usize = 64;
const DEFAULT_MAX_SUBMIT_RECORDS: usize = 10_000;

/// 수집 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 감시 파일과 소스 시스템 매핑
    pub sources: Vec<WatchedSource>,
    /// 파일 변경 확인 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 배치 크기 (이 개수만큼 모이면 플러시)
    pub batch_size: usize,
    /// 첫 이벤트 이후 플러시까지의 최대 대기 (밀리초)
    pub flush_interval_ms: u64,
    /// 최대 라인 길이 (바이트). 초과 라인은 버려집니다.
    pub max_line_length: usize,
    /// GeoIP 데이터셋 경로 (비어 있으면 조회하지 않음)
    pub geoip_db_path: String,
    /// 처리 대기열 크기. 가득 차면 감시 라인은 버려집니다.
    pub buffer_capacity: usize,
    /// 동시 배치 플러시 한도
    pub max_concurrent_flushes: usize,

    // --- 확장 설정 (core에 없는 추가 필드) ---
    /// `submit` 한 번에 받을 수 있는 최대 레코드 수
    pub max_submit_records: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self::from_core(&IngestSection::default())
    }
}

impl IngestConfig {
    /// core의 `IngestSection`에서 파이프라인 설정을 생성합니다.
    ///
    /// core 설정에 없는 확장 필드는 기본값이 적용됩니다.
    pub fn from_core(core: &IngestSection) -> Self {
        Self {
            enabled: core.enabled,
            sources: core.sources.clone(),
            poll_interval_ms: core.poll_interval_ms,
            batch_size: core.batch_size,
            flush_interval_ms: core.flush_interval_ms,
            max_line_length: core.max_line_length,
            geoip_db_path: core.geoip_db_path.clone(),
            buffer_capacity: core.buffer_capacity,
            max_concurrent_flushes: core.max_concurrent_flushes,
            // 한 번의 제출은 대기열에 통째로 들어가야 함
            max_submit_records: DEFAULT_MAX_SUBMIT_RECORDS.min(core.buffer_capacity.max(1)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// 소스 시스템에 설정된 기본 목적지 포트
    ///
    /// 같은 소스가 여러 번 등록된 경우 처음 지정된 값을 사용합니다.
    pub fn destination_port_for(&self, source: SourceSystem) -> Option<u16> {
        self.sources
            .iter()
            .filter(|s| s.source == source)
            .find_map(|s| s.destination_port)
    }

    /// 감시 경로가 안전한지 검증합니다 (path traversal 방지).
    ///
    /// # 검증 규칙
    /// - 비어 있지 않아야 함
    /// - ".." 컴포넌트를 포함하지 않아야 함
    /// - 절대 경로여야 함
    fn validate_watch_path(path_str: &str) -> Result<(), IngestError> {
        if path_str.is_empty() {
            return Err(IngestError::Config {
                field: "sources.path".to_owned(),
                reason: "watch path must not be empty".to_owned(),
            });
        }

        let path = Path::new(path_str);

        if path.components().any(|c| c == Component::ParentDir) {
            return Err(IngestError::Config {
                field: "sources.path".to_owned(),
                reason: format!("watch path '{path_str}' contains path traversal pattern '..'"),
            });
        }

        if !path.is_absolute() {
            return Err(IngestError::Config {
                field: "sources.path".to_owned(),
                reason: format!("watch path '{path_str}' must be an absolute path"),
            });
        }

        Ok(())
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(IngestError::Config {
                field: "batch_size".to_owned(),
                reason: format!("must be 1-{MAX_BATCH_SIZE}"),
            });
        }

        if self.flush_interval_ms == 0 || self.flush_interval_ms > MAX_FLUSH_INTERVAL_MS {
            return Err(IngestError::Config {
                field: "flush_interval_ms".to_owned(),
                reason: format!("must be 1-{MAX_FLUSH_INTERVAL_MS}"),
            });
        }

        if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&self.poll_interval_ms) {
            return Err(IngestError::Config {
                field: "poll_interval_ms".to_owned(),
                reason: format!("must be {MIN_POLL_INTERVAL_MS}-{MAX_POLL_INTERVAL_MS}"),
            });
        }

        if self.max_line_length == 0 || self.max_line_length > MAX_LINE_LENGTH {
            return Err(IngestError::Config {
                field: "max_line_length".to_owned(),
                reason: format!("must be 1-{MAX_LINE_LENGTH}"),
            });
        }

        if self.buffer_capacity == 0 || self.buffer_capacity > MAX_BUFFER_CAPACITY {
            return Err(IngestError::Config {
                field: "buffer_capacity".to_owned(),
                reason: format!("must be 1-{MAX_BUFFER_CAPACITY}"),
            });
        }

        if self.max_concurrent_flushes == 0 || self.max_concurrent_flushes > MAX_CONCURRENT_FLUSHES
        {
            return Err(IngestError::Config {
                field: "max_concurrent_flushes".to_owned(),
                reason: format!("must be 1-{MAX_CONCURRENT_FLUSHES}"),
            });
        }

        if self.max_submit_records == 0 || self.max_submit_records > self.buffer_capacity {
            return Err(IngestError::Config {
                field: "max_submit_records".to_owned(),
                reason: format!("must be 1-{} (buffer_capacity)", self.buffer_capacity),
            });
        }

        if self.enabled && self.sources.is_empty() {
            return Err(IngestError::Config {
                field: "sources".to_owned(),
                reason: "at least one source must be configured when enabled".to_owned(),
            });
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            Self::validate_watch_path(&source.path)?;
            if !seen.insert(source.path.as_str()) {
                return Err(IngestError::Config {
                    field: "sources.path".to_owned(),
                    reason: format!("'{}' is watched more than once", source.path),
                });
            }
        }

        Ok(())
    }
}

/// 수집 파이프라인 설정 빌더
#[derive(Default)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 활성화 여부를 설정합니다.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// 감시 소스 목록을 통째로 교체합니다.
    pub fn sources(mut self, sources: Vec<WatchedSource>) -> Self {
        self.config.sources = sources;
        self
    }

    /// 감시 소스를 하나 추가합니다.
    pub fn watch(mut self, source: SourceSystem, path: impl Into<String>) -> Self {
        self.config.sources.push(WatchedSource {
            source,
            path: path.into(),
            destination_port: None,
        });
        self
    }

    /// 폴링 주기(밀리초)를 설정합니다.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// 배치 크기를 설정합니다.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// 플러시 간격(밀리초)을 설정합니다.
    pub fn flush_interval_ms(mut self, ms: u64) -> Self {
        self.config.flush_interval_ms = ms;
        self
    }

    /// 최대 라인 길이를 설정합니다.
    pub fn max_line_length(mut self, len: usize) -> Self {
        self.config.max_line_length = len;
        self
    }

    /// GeoIP 데이터셋 경로를 설정합니다.
    pub fn geoip_db_path(mut self, path: impl Into<String>) -> Self {
        self.config.geoip_db_path = path.into();
        self
    }

    /// 처리 대기열 크기를 설정합니다.
    ///
    /// `submit` 한도가 대기열보다 크면 대기열 크기로 낮춥니다.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity;
        self.config.max_submit_records = self.config.max_submit_records.min(capacity.max(1));
        self
    }

    /// 동시 배치 플러시 한도를 설정합니다.
    pub fn max_concurrent_flushes(mut self, limit: usize) -> Self {
        self.config.max_concurrent_flushes = limit;
        self
    }

    /// 설정을 검증하고 `IngestConfig`를 생성합니다.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        IngestConfig::default().validate().unwrap();
    }

    #[test]
    fn from_core_preserves_values() {
        let core = IngestSection {
            batch_size: 20,
            flush_interval_ms: 1500,
            geoip_db_path: "/etc/trapwire/geo.json".to_owned(),
            ..Default::default()
        };
        let config = IngestConfig::from_core(&core);
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.flush_interval(), Duration::from_millis(1500));
        assert_eq!(config.geoip_db_path, "/etc/trapwire/geo.json");
        // 확장 필드는 기본값
        assert_eq!(config.max_submit_records, 10_000);
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let config = IngestConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_flush_interval() {
        let config = IngestConfig {
            flush_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_queue_limits() {
        let config = IngestConfig {
            buffer_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = IngestConfig {
            max_concurrent_flushes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = IngestConfig {
            buffer_capacity: 100,
            max_submit_records: 101,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_submit_records"));
    }

    #[test]
    fn small_buffer_lowers_submit_limit() {
        let core = IngestSection {
            buffer_capacity: 64,
            ..Default::default()
        };
        let config = IngestConfig::from_core(&core);
        assert_eq!(config.max_submit_records, 64);
        config.validate().unwrap();

        let built = IngestConfigBuilder::new()
            .buffer_capacity(8)
            .max_concurrent_flushes(2)
            .build()
            .unwrap();
        assert_eq!(built.buffer_capacity, 8);
        assert_eq!(built.max_submit_records, 8);
        assert_eq!(built.max_concurrent_flushes, 2);
    }

    #[test]
    fn validate_rejects_empty_sources_when_enabled() {
        let mut config = IngestConfig::default();
        config.sources.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_relative_path() {
        let result = IngestConfigBuilder::new()
            .sources(Vec::new())
            .watch(SourceSystem::Cowrie, "logs/cowrie.json")
            .build();
        let err = result.unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn validate_rejects_path_traversal() {
        let result = IngestConfigBuilder::new()
            .sources(Vec::new())
            .watch(SourceSystem::Cowrie, "/var/log/../../etc/shadow")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_duplicate_paths() {
        let result = IngestConfigBuilder::new()
            .sources(Vec::new())
            .watch(SourceSystem::Cowrie, "/var/log/trap.json")
            .watch(SourceSystem::Dionaea, "/var/log/trap.json")
            .build();
        let err = result.unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn destination_port_lookup() {
        let config = IngestConfigBuilder::new()
            .sources(vec![WatchedSource {
                source: SourceSystem::Glastopf,
                path: "/var/log/glastopf.json".to_owned(),
                destination_port: Some(8080),
            }])
            .build()
            .unwrap();
        assert_eq!(config.destination_port_for(SourceSystem::Glastopf), Some(8080));
        assert_eq!(config.destination_port_for(SourceSystem::Cowrie), None);
    }

    #[test]
    fn builder_creates_valid_config() {
        let config = IngestConfigBuilder::new()
            .batch_size(3)
            .flush_interval_ms(200)
            .poll_interval_ms(20)
            .build()
            .unwrap();
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.poll_interval(), Duration::from_millis(20));
    }
}
