//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `stackfold_`
//! - 모듈명: `aggregator_`, `sink_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use stackfold_core::metrics as m;
//! use metrics::counter;
//!
//! counter!(m::AGGREGATOR_LINES_RECEIVED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 분류 레이블 키 (plain, java-exception, python-traceback, ...)
pub const LABEL_KIND: &str = "kind";

/// 플러시 사유 레이블 키 (kind_change, plain, timeout, capacity, shutdown)
pub const LABEL_REASON: &str = "reason";

/// 싱크 이름 레이블 키 (logstash, stdout)
pub const LABEL_SINK: &str = "sink";

// ─── Aggregator 메트릭 ─────────────────────────────────────────────

/// Aggregator: 수신된 전체 라인 수 (counter)
pub const AGGREGATOR_LINES_RECEIVED_TOTAL: &str = "stackfold_aggregator_lines_received_total";

/// Aggregator: 생성된 논리 메시지 수 (counter, label: kind)
pub const AGGREGATOR_MESSAGES_EMITTED_TOTAL: &str = "stackfold_aggregator_messages_emitted_total";

/// Aggregator: 플러시된 그룹 수 (counter, labels: kind, reason)
pub const AGGREGATOR_GROUPS_FLUSHED_TOTAL: &str = "stackfold_aggregator_groups_flushed_total";

/// Aggregator: 활성 소스 집계기 수 (gauge)
pub const AGGREGATOR_ACTIVE_SOURCES: &str = "stackfold_aggregator_active_sources";

/// Aggregator: 디코딩 실패로 버려진 입력 라인 수 (counter)
pub const AGGREGATOR_DECODE_ERRORS_TOTAL: &str = "stackfold_aggregator_decode_errors_total";

/// Aggregator: 길이 상한으로 잘린 라인 수 (counter)
pub const AGGREGATOR_LINES_TRUNCATED_TOTAL: &str = "stackfold_aggregator_lines_truncated_total";

/// Aggregator: 전송 큐 대기 시간 초과로 버려진 메시지 수 (counter)
pub const AGGREGATOR_MESSAGES_DROPPED_TOTAL: &str = "stackfold_aggregator_messages_dropped_total";

/// Aggregator: 전송 큐 내 메시지 수 (gauge)
pub const AGGREGATOR_DELIVERY_QUEUE_SIZE: &str = "stackfold_aggregator_delivery_queue_size";

// ─── Sink 메트릭 ───────────────────────────────────────────────────

/// Sink: 전송에 성공한 메시지 수 (counter, label: sink)
pub const SINK_MESSAGES_DELIVERED_TOTAL: &str = "stackfold_sink_messages_delivered_total";

/// Sink: 재시도를 모두 소진한 전송 실패 수 (counter, label: sink)
pub const SINK_DELIVERY_FAILURES_TOTAL: &str = "stackfold_sink_delivery_failures_total";

/// Sink: 재연결 횟수 (counter, label: sink)
pub const SINK_RECONNECTS_TOTAL: &str = "stackfold_sink_reconnects_total";

/// Sink: 메시지 하나의 전송 소요 시간 (histogram, 초)
pub const SINK_DELIVERY_DURATION_SECONDS: &str = "stackfold_sink_delivery_duration_seconds";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "stackfold_daemon_uptime_seconds";

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "stackfold_daemon_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 전송 지연 시간 히스토그램 버킷 (초)
///
/// 100us ~ 10s 범위 (재시도 백오프 포함)
pub const DELIVERY_DURATION_BUCKETS: [f64; 10] = [
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 10.0,
];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 이 함수는 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `stackfold-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Aggregator
    describe_counter!(
        AGGREGATOR_LINES_RECEIVED_TOTAL,
        "Total number of log lines routed to source aggregators"
    );
    describe_counter!(
        AGGREGATOR_MESSAGES_EMITTED_TOTAL,
        "Total number of logical messages emitted, by classification kind"
    );
    describe_counter!(
        AGGREGATOR_GROUPS_FLUSHED_TOTAL,
        "Total number of multi-line groups flushed, by kind and flush reason"
    );
    describe_gauge!(
        AGGREGATOR_ACTIVE_SOURCES,
        "Number of source aggregators currently registered"
    );
    describe_counter!(
        AGGREGATOR_DECODE_ERRORS_TOTAL,
        "Total number of input lines skipped because they could not be decoded"
    );
    describe_counter!(
        AGGREGATOR_LINES_TRUNCATED_TOTAL,
        "Total number of log lines truncated to the line or group byte limit"
    );
    describe_counter!(
        AGGREGATOR_MESSAGES_DROPPED_TOTAL,
        "Total number of logical messages dropped because the delivery queue stayed full"
    );
    describe_gauge!(
        AGGREGATOR_DELIVERY_QUEUE_SIZE,
        "Current number of logical messages waiting for delivery"
    );

    // Sink
    describe_counter!(
        SINK_MESSAGES_DELIVERED_TOTAL,
        "Total number of logical messages delivered by the sink"
    );
    describe_counter!(
        SINK_DELIVERY_FAILURES_TOTAL,
        "Total number of messages dropped after all delivery attempts failed"
    );
    describe_counter!(
        SINK_RECONNECTS_TOTAL,
        "Total number of sink connection re-establishments"
    );
    describe_histogram!(
        SINK_DELIVERY_DURATION_SECONDS,
        "Time to deliver a single logical message in seconds"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "stackfold daemon uptime in seconds");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}
