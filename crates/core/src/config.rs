//! 설정 관리: stackfold.toml 파싱 및 런타임 설정
//!
//! [`StackfoldConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`STACKFOLD_AGGREGATOR_IDLE_TIMEOUT_MS=500` 형식)
//! 3. 설정 파일 (`stackfold.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), stackfold_core::error::StackfoldError> {
//! use stackfold_core::config::StackfoldConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = StackfoldConfig::load("stackfold.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = StackfoldConfig::parse("[aggregator]\nidle_timeout_ms = 500")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, StackfoldError};

/// 내장 예외 dialect 이름
pub const BUILTIN_DIALECTS: &[&str] = &["java", "python"];

/// 유휴 타임아웃 상한 (1시간)
const MAX_IDLE_TIMEOUT_MS: u64 = 60 * 60 * 1000;

/// stackfold 통합 설정
///
/// `stackfold.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 모듈은 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackfoldConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 집계 엔진 설정
    #[serde(default)]
    pub aggregator: AggregatorSection,
    /// 전송 싱크 설정
    #[serde(default)]
    pub sink: SinkSection,
    /// 입력 설정
    #[serde(default)]
    pub input: InputSection,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl StackfoldConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StackfoldError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, StackfoldError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StackfoldError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                StackfoldError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, StackfoldError> {
        toml::from_str(toml_str).map_err(|e| {
            StackfoldError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `STACKFOLD_{SECTION}_{FIELD}`
    /// 예: `STACKFOLD_SINK_ADDRESS=logstash:5000`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "STACKFOLD_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "STACKFOLD_GENERAL_LOG_FORMAT");

        // Aggregator
        override_u64(
            &mut self.aggregator.idle_timeout_ms,
            "STACKFOLD_AGGREGATOR_IDLE_TIMEOUT_MS",
        );
        override_csv(
            &mut self.aggregator.dialects,
            "STACKFOLD_AGGREGATOR_DIALECTS",
        );
        override_string(&mut self.aggregator.rule_dir, "STACKFOLD_AGGREGATOR_RULE_DIR");
        override_usize(
            &mut self.aggregator.max_group_lines,
            "STACKFOLD_AGGREGATOR_MAX_GROUP_LINES",
        );
        override_usize(
            &mut self.aggregator.max_group_bytes,
            "STACKFOLD_AGGREGATOR_MAX_GROUP_BYTES",
        );
        override_usize(
            &mut self.aggregator.ingress_capacity,
            "STACKFOLD_AGGREGATOR_INGRESS_CAPACITY",
        );
        override_usize(
            &mut self.aggregator.delivery_queue_capacity,
            "STACKFOLD_AGGREGATOR_DELIVERY_QUEUE_CAPACITY",
        );
        override_u64(
            &mut self.aggregator.enqueue_timeout_ms,
            "STACKFOLD_AGGREGATOR_ENQUEUE_TIMEOUT_MS",
        );

        // Sink
        override_string(&mut self.sink.transport, "STACKFOLD_SINK_TRANSPORT");
        override_string(&mut self.sink.address, "STACKFOLD_SINK_ADDRESS");
        override_u64(
            &mut self.sink.connect_timeout_ms,
            "STACKFOLD_SINK_CONNECT_TIMEOUT_MS",
        );
        override_u64(
            &mut self.sink.write_timeout_ms,
            "STACKFOLD_SINK_WRITE_TIMEOUT_MS",
        );
        override_u32(&mut self.sink.retry_attempts, "STACKFOLD_SINK_RETRY_ATTEMPTS");
        override_u64(
            &mut self.sink.retry_backoff_ms,
            "STACKFOLD_SINK_RETRY_BACKOFF_MS",
        );
        override_u64(&mut self.sink.max_backoff_ms, "STACKFOLD_SINK_MAX_BACKOFF_MS");

        // Input
        override_string(&mut self.input.format, "STACKFOLD_INPUT_FORMAT");
        override_string(
            &mut self.input.default_source_id,
            "STACKFOLD_INPUT_DEFAULT_SOURCE_ID",
        );
        override_usize(
            &mut self.input.max_line_bytes,
            "STACKFOLD_INPUT_MAX_LINE_BYTES",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "STACKFOLD_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "STACKFOLD_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "STACKFOLD_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), StackfoldError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        let agg = &self.aggregator;
        if agg.idle_timeout_ms == 0 || agg.idle_timeout_ms > MAX_IDLE_TIMEOUT_MS {
            return Err(invalid(
                "aggregator.idle_timeout_ms",
                format!("must be 1-{MAX_IDLE_TIMEOUT_MS}"),
            ));
        }

        if agg.enqueue_timeout_ms == 0 {
            return Err(invalid(
                "aggregator.enqueue_timeout_ms",
                "must be greater than 0".to_owned(),
            ));
        }

        if agg.dialects.is_empty() && agg.rule_dir.is_empty() {
            return Err(invalid(
                "aggregator.dialects",
                "at least one dialect or a rule_dir must be configured".to_owned(),
            ));
        }

        if let Some(unknown) = agg
            .dialects
            .iter()
            .find(|d| !BUILTIN_DIALECTS.contains(&d.as_str()))
        {
            return Err(invalid(
                "aggregator.dialects",
                format!(
                    "unknown dialect '{unknown}', expected one of: {}",
                    BUILTIN_DIALECTS.join(", ")
                ),
            ));
        }

        for (field, value) in [
            ("aggregator.max_group_lines", agg.max_group_lines),
            ("aggregator.max_group_bytes", agg.max_group_bytes),
            ("aggregator.ingress_capacity", agg.ingress_capacity),
            (
                "aggregator.delivery_queue_capacity",
                agg.delivery_queue_capacity,
            ),
            ("input.max_line_bytes", self.input.max_line_bytes),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0".to_owned()));
            }
        }

        let valid_transports = ["udp", "tcp", "stdout"];
        if !valid_transports.contains(&self.sink.transport.as_str()) {
            return Err(invalid(
                "sink.transport",
                format!("must be one of: {}", valid_transports.join(", ")),
            ));
        }

        if self.sink.transport != "stdout" && self.sink.address.is_empty() {
            return Err(invalid(
                "sink.address",
                "address must not be empty for network transports".to_owned(),
            ));
        }

        if self.sink.max_backoff_ms < self.sink.retry_backoff_ms {
            return Err(invalid(
                "sink.max_backoff_ms",
                "must be greater than or equal to retry_backoff_ms".to_owned(),
            ));
        }

        let valid_input_formats = ["envelope", "plain"];
        if !valid_input_formats.contains(&self.input.format.as_str()) {
            return Err(invalid(
                "input.format",
                format!("must be one of: {}", valid_input_formats.join(", ")),
            ));
        }

        if self.input.default_source_id.is_empty() {
            return Err(invalid(
                "input.default_source_id",
                "must not be empty".to_owned(),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> StackfoldError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 집계 엔진 설정 (`[aggregator]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorSection {
    /// 마지막 라인 이후 그룹을 플러시하기까지의 유휴 시간 (밀리초)
    pub idle_timeout_ms: u64,
    /// 활성화할 내장 dialect 목록 (우선순위 순)
    pub dialects: Vec<String>,
    /// 사용자 정의 YAML dialect 디렉토리 (빈 문자열이면 사용하지 않음)
    pub rule_dir: String,
    /// 그룹당 최대 라인 수
    pub max_group_lines: usize,
    /// 그룹당 최대 바이트 수
    pub max_group_bytes: usize,
    /// 입력 채널 용량
    pub ingress_capacity: usize,
    /// 전송 큐 용량
    pub delivery_queue_capacity: usize,
    /// 전송 큐가 가득 찼을 때 메시지를 버리기 전까지 기다리는 시간 (밀리초)
    pub enqueue_timeout_ms: u64,
}

impl Default for AggregatorSection {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 1000,
            dialects: BUILTIN_DIALECTS.iter().map(|d| (*d).to_owned()).collect(),
            rule_dir: String::new(),
            max_group_lines: 1000,
            max_group_bytes: 256 * 1024,
            ingress_capacity: 10_000,
            delivery_queue_capacity: 1024,
            enqueue_timeout_ms: 10_000,
        }
    }
}

/// 전송 싱크 설정 (`[sink]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSection {
    /// 전송 방식 (udp, tcp, stdout)
    pub transport: String,
    /// 대상 주소 (host:port)
    pub address: String,
    /// 연결 타임아웃 (밀리초)
    pub connect_timeout_ms: u64,
    /// 메시지당 쓰기 타임아웃 (밀리초)
    pub write_timeout_ms: u64,
    /// 첫 시도 이후 최대 재시도 횟수
    pub retry_attempts: u32,
    /// 첫 재시도 대기 시간 (밀리초, 매 재시도마다 두 배)
    pub retry_backoff_ms: u64,
    /// 재시도 대기 시간 상한 (밀리초)
    pub max_backoff_ms: u64,
}

impl Default for SinkSection {
    fn default() -> Self {
        Self {
            transport: "udp".to_owned(),
            address: "127.0.0.1:5000".to_owned(),
            connect_timeout_ms: 5000,
            write_timeout_ms: 2000,
            retry_attempts: 3,
            retry_backoff_ms: 100,
            max_backoff_ms: 5000,
        }
    }
}

/// 입력 설정 (`[input]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSection {
    /// 입력 형식 (envelope, plain)
    pub format: String,
    /// plain 형식에서 사용할 소스 식별자
    pub default_source_id: String,
    /// 라인 최대 바이트 수 (초과분은 잘림)
    pub max_line_bytes: usize,
}

impl Default for InputSection {
    fn default() -> Self {
        Self {
            format: "envelope".to_owned(),
            default_source_id: "stdin".to_owned(),
            max_line_bytes: 1024 * 1024,
        }
    }
}

/// 메트릭 설정 (`[metrics]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus 엔드포인트 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
    /// 엔드포인트 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9109,
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

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_has_sane_values() {
        let config = StackfoldConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.aggregator.idle_timeout_ms, 1000);
        assert_eq!(config.aggregator.dialects, vec!["java", "python"]);
        assert_eq!(config.sink.transport, "udp");
        assert_eq!(config.input.format, "envelope");
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn default_config_passes_validation() {
        StackfoldConfig::default().validate().unwrap();
    }

    #[test]
    fn from_str_empty_toml_uses_defaults() {
        let config = StackfoldConfig::parse("").unwrap();
        assert_eq!(config.sink.address, "127.0.0.1:5000");
        assert_eq!(config.aggregator.max_group_lines, 1000);
    }

    #[test]
    fn from_str_partial_toml_merges_with_defaults() {
        let toml = r#"
[aggregator]
idle_timeout_ms = 250
dialects = ["java"]

[sink]
transport = "tcp"
address = "logstash:5000"
"#;
        let config = StackfoldConfig::parse(toml).unwrap();
        assert_eq!(config.aggregator.idle_timeout_ms, 250);
        assert_eq!(config.aggregator.dialects, vec!["java"]);
        // 기본값 유지
        assert_eq!(config.aggregator.max_group_bytes, 256 * 1024);
        assert_eq!(config.sink.transport, "tcp");
        assert_eq!(config.sink.retry_attempts, 3);
    }

    #[test]
    fn from_str_invalid_toml_returns_error() {
        let err = StackfoldConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            StackfoldError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_zero_idle_timeout() {
        let mut config = StackfoldConfig::default();
        config.aggregator.idle_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("idle_timeout_ms"));
    }

    #[test]
    fn validate_rejects_unknown_dialect() {
        let mut config = StackfoldConfig::default();
        config.aggregator.dialects = vec!["cobol".to_owned()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cobol"));
    }

    #[test]
    fn validate_accepts_rule_dir_without_builtin_dialects() {
        let mut config = StackfoldConfig::default();
        config.aggregator.dialects.clear();
        config.aggregator.rule_dir = "/etc/stackfold/dialects".to_owned();
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_no_dialects_at_all() {
        let mut config = StackfoldConfig::default();
        config.aggregator.dialects.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_transport() {
        let mut config = StackfoldConfig::default();
        config.sink.transport = "carrier-pigeon".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("transport"));
    }

    #[test]
    fn validate_allows_empty_address_for_stdout() {
        let mut config = StackfoldConfig::default();
        config.sink.transport = "stdout".to_owned();
        config.sink.address.clear();
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_backoff_cap_below_base() {
        let mut config = StackfoldConfig::default();
        config.sink.retry_backoff_ms = 1000;
        config.sink.max_backoff_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let mut config = StackfoldConfig::default();
        config.aggregator.delivery_queue_capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("delivery_queue_capacity"));
    }

    #[test]
    fn validate_rejects_zero_enqueue_timeout() {
        let mut config = StackfoldConfig::default();
        assert_eq!(config.aggregator.enqueue_timeout_ms, 10_000);
        config.aggregator.enqueue_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("enqueue_timeout_ms"));
    }

    #[test]
    #[serial]
    fn env_override_u64() {
        let mut val = 1000u64;
        // SAFETY: serial 테스트로 실행되어 다른 스레드가 환경변수를 읽지 않습니다.
        unsafe { std::env::set_var("TEST_STACKFOLD_U64", "250") };
        override_u64(&mut val, "TEST_STACKFOLD_U64");
        assert_eq!(val, 250);
        unsafe { std::env::remove_var("TEST_STACKFOLD_U64") };
    }

    #[test]
    #[serial]
    fn env_override_invalid_keeps_original() {
        let mut val = false;
        // SAFETY: serial 테스트로 실행되어 다른 스레드가 환경변수를 읽지 않습니다.
        unsafe { std::env::set_var("TEST_STACKFOLD_BOOL_BAD", "not-a-bool") };
        override_bool(&mut val, "TEST_STACKFOLD_BOOL_BAD");
        assert!(!val);
        unsafe { std::env::remove_var("TEST_STACKFOLD_BOOL_BAD") };
    }

    #[test]
    #[serial]
    fn env_override_csv_skips_empty_items() {
        let mut val = vec!["java".to_owned()];
        // SAFETY: serial 테스트로 실행되어 다른 스레드가 환경변수를 읽지 않습니다.
        unsafe { std::env::set_var("TEST_STACKFOLD_CSV", "java, python,") };
        override_csv(&mut val, "TEST_STACKFOLD_CSV");
        assert_eq!(val, vec!["java", "python"]);
        unsafe { std::env::remove_var("TEST_STACKFOLD_CSV") };
    }

    #[test]
    #[serial]
    fn apply_env_overrides_reaches_sections() {
        let mut config = StackfoldConfig::default();
        // SAFETY: serial 테스트로 실행되어 다른 스레드가 환경변수를 읽지 않습니다.
        unsafe {
            std::env::set_var("STACKFOLD_SINK_ADDRESS", "collector:5044");
            std::env::set_var("STACKFOLD_AGGREGATOR_IDLE_TIMEOUT_MS", "750");
        }
        config.apply_env_overrides();
        unsafe {
            std::env::remove_var("STACKFOLD_SINK_ADDRESS");
            std::env::remove_var("STACKFOLD_AGGREGATOR_IDLE_TIMEOUT_MS");
        }
        assert_eq!(config.sink.address, "collector:5044");
        assert_eq!(config.aggregator.idle_timeout_ms, 750);
    }

    #[test]
    fn config_serialize_roundtrip() {
        let config = StackfoldConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = StackfoldConfig::parse(&toml_str).unwrap();
        assert_eq!(
            config.aggregator.idle_timeout_ms,
            parsed.aggregator.idle_timeout_ms
        );
        assert_eq!(config.sink.address, parsed.sink.address);
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = StackfoldConfig::from_file("/nonexistent/path/stackfold.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StackfoldError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
