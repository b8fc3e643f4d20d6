//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `trapwire_`
//! - 모듈명: `ingest_`, `store_`, `live_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(trapwire_core::metrics::INGEST_LINES_READ_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 소스 시스템 레이블 키 (cowrie, dionaea, glastopf)
pub const LABEL_SOURCE: &str = "source";

/// 배치 플러시 트리거 레이블 키 (size, timer, manual, shutdown)
pub const LABEL_TRIGGER: &str = "trigger";

/// 결과 레이블 키 (stored, rejected, failed)
pub const LABEL_RESULT: &str = "result";

// ─── Ingest 메트릭 ────────────────────────────────────────────────

/// Ingest: 감시 파일에서 읽은 라인 수 (counter, label: source)
pub const INGEST_LINES_READ_TOTAL: &str = "trapwire_ingest_lines_read_total";

/// Ingest: 정규화된 이벤트 수 (counter, label: source)
pub const INGEST_EVENTS_PARSED_TOTAL: &str = "trapwire_ingest_events_parsed_total";

/// Ingest: 손상된 라인 수 (counter, label: source)
pub const INGEST_PARSE_ERRORS_TOTAL: &str = "trapwire_ingest_parse_errors_total";

/// Ingest: 매핑되지 않아 무시된 라인 수 (counter, label: source)
pub const INGEST_LINES_IGNORED_TOTAL: &str = "trapwire_ingest_lines_ignored_total";

/// Ingest: GeoIP 조회 실패로 센티널이 적용된 이벤트 수 (counter)
pub const INGEST_GEO_MISSES_TOTAL: &str = "trapwire_ingest_geo_misses_total";

/// Ingest: 배치 플러시 횟수 (counter, label: trigger)
pub const INGEST_BATCHES_FLUSHED_TOTAL: &str = "trapwire_ingest_batches_flushed_total";

/// Ingest: 현재 배치 버퍼 크기 (gauge)
pub const INGEST_BATCH_BUFFER_SIZE: &str = "trapwire_ingest_batch_buffer_size";

/// Ingest: 배치 저장 지연 시간 (histogram, 초)
pub const INGEST_FLUSH_DURATION_SECONDS: &str = "trapwire_ingest_flush_duration_seconds";

/// Ingest: 처리 대기열이 가득 차 버려진 라인 수 (counter, label: source)
pub const INGEST_INPUTS_DROPPED_TOTAL: &str = "trapwire_ingest_inputs_dropped_total";

/// Ingest: 동시 플러시 한도 때문에 대기한 플러시 수 (counter, label: trigger)
pub const INGEST_FLUSH_WAITS_TOTAL: &str = "trapwire_ingest_flush_waits_total";

// ─── Store 메트릭 ────────────────────────────────────────────────

/// Store: 레코드 결과 수 (counter, label: result)
pub const STORE_RECORDS_TOTAL: &str = "trapwire_store_records_total";

/// Store: 배치 전체 실패 수 (counter)
pub const STORE_BATCH_FAILURES_TOTAL: &str = "trapwire_store_batch_failures_total";

// ─── Live 메트릭 ────────────────────────────────────────────────

/// Live: 현재 구독자 수 (gauge)
pub const LIVE_SUBSCRIBERS: &str = "trapwire_live_subscribers";

/// Live: 구독자에게 전달된 메시지 수 (counter)
pub const LIVE_MESSAGES_PUBLISHED_TOTAL: &str = "trapwire_live_messages_published_total";

/// Live: 대기열 포화 또는 종료로 제거된 구독자 수 (counter)
pub const LIVE_SUBSCRIBERS_DROPPED_TOTAL: &str = "trapwire_live_subscribers_dropped_total";

// ─── Daemon 메트릭 ────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "trapwire_daemon_uptime_seconds";

/// Daemon: 빌드 정보 (gauge, 항상 1)
pub const DAEMON_BUILD_INFO: &str = "trapwire_daemon_build_info";

/// 모든 메트릭의 설명을 등록합니다.
///
/// recorder 설치 직후 한 번 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Ingest
    describe_counter!(
        INGEST_LINES_READ_TOTAL,
        "Total number of raw lines read from watched files"
    );
    describe_counter!(
        INGEST_EVENTS_PARSED_TOTAL,
        "Total number of lines normalized into security events"
    );
    describe_counter!(
        INGEST_PARSE_ERRORS_TOTAL,
        "Total number of malformed lines dropped by source parsers"
    );
    describe_counter!(
        INGEST_LINES_IGNORED_TOTAL,
        "Total number of lines with no mapped event kind"
    );
    describe_counter!(
        INGEST_GEO_MISSES_TOTAL,
        "Total number of events enriched with the unknown geo sentinel"
    );
    describe_counter!(
        INGEST_BATCHES_FLUSHED_TOTAL,
        "Total number of batches handed to the store, by trigger"
    );
    describe_gauge!(
        INGEST_BATCH_BUFFER_SIZE,
        "Current number of events waiting in the batch buffer"
    );
    describe_histogram!(
        INGEST_FLUSH_DURATION_SECONDS,
        "Time to persist and publish a single batch in seconds"
    );
    describe_counter!(
        INGEST_INPUTS_DROPPED_TOTAL,
        "Total number of watched lines dropped because the processing queue was full"
    );
    describe_counter!(
        INGEST_FLUSH_WAITS_TOTAL,
        "Total number of flushes that waited for the concurrent flush limit"
    );

    // Store
    describe_counter!(
        STORE_RECORDS_TOTAL,
        "Per-record persistence outcomes (stored, rejected, failed)"
    );
    describe_counter!(
        STORE_BATCH_FAILURES_TOTAL,
        "Total number of batches that failed as a whole"
    );

    // Live
    describe_gauge!(LIVE_SUBSCRIBERS, "Number of connected live subscribers");
    describe_counter!(
        LIVE_MESSAGES_PUBLISHED_TOTAL,
        "Total number of live messages delivered to subscriber queues"
    );
    describe_counter!(
        LIVE_SUBSCRIBERS_DROPPED_TOTAL,
        "Total number of subscribers removed because their queue was full or closed"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Trapwire daemon uptime in seconds");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        INGEST_LINES_READ_TOTAL,
        INGEST_EVENTS_PARSED_TOTAL,
        INGEST_PARSE_ERRORS_TOTAL,
        INGEST_LINES_IGNORED_TOTAL,
        INGEST_GEO_MISSES_TOTAL,
        INGEST_BATCHES_FLUSHED_TOTAL,
        INGEST_BATCH_BUFFER_SIZE,
        INGEST_FLUSH_DURATION_SECONDS,
        INGEST_INPUTS_DROPPED_TOTAL,
        INGEST_FLUSH_WAITS_TOTAL,
        STORE_RECORDS_TOTAL,
        STORE_BATCH_FAILURES_TOTAL,
        LIVE_SUBSCRIBERS,
        LIVE_MESSAGES_PUBLISHED_TOTAL,
        LIVE_SUBSCRIBERS_DROPPED_TOTAL,
        DAEMON_UPTIME_SECONDS,
        DAEMON_BUILD_INFO,
    ];

    #[test]
    fn all_metric_names_have_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(name.starts_with("trapwire_"), "{name} lacks prefix");
        }
    }

    #[test]
    fn metric_names_are_unique() {
        let mut names = ALL_METRIC_NAMES.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ALL_METRIC_NAMES.len());
    }

    #[test]
    fn counters_end_with_total() {
        let counters = [
            INGEST_LINES_READ_TOTAL,
            INGEST_EVENTS_PARSED_TOTAL,
            INGEST_PARSE_ERRORS_TOTAL,
            INGEST_LINES_IGNORED_TOTAL,
            INGEST_GEO_MISSES_TOTAL,
            INGEST_BATCHES_FLUSHED_TOTAL,
            INGEST_INPUTS_DROPPED_TOTAL,
            INGEST_FLUSH_WAITS_TOTAL,
            STORE_RECORDS_TOTAL,
            STORE_BATCH_FAILURES_TOTAL,
            LIVE_MESSAGES_PUBLISHED_TOTAL,
            LIVE_SUBSCRIBERS_DROPPED_TOTAL,
        ];
        for name in counters {
            assert!(name.ends_with("_total"), "{name}");
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        // recorder 없이도 패닉하지 않아야 함
        describe_all();
    }

    #[test]
    fn label_keys_are_lowercase() {
        for label in [LABEL_SOURCE, LABEL_TRIGGER, LABEL_RESULT] {
            assert_eq!(label, label.to_lowercase());
        }
    }
}
