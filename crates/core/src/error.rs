//! 에러 타입: 도메인별 에러 정의

/// stackfold 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum StackfoldError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 메시지 전송 에러
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

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

    /// 채널 수신 실패
    #[error("channel receive failed: {0}")]
    ChannelRecv(String),

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 이미 실행 중
    #[error("pipeline already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline not running")]
    NotRunning,
}

/// 전송 싱크 에러
///
/// 집계 엔진에서 실패할 수 있는 유일한 경로입니다.
/// 싱크 경계에서 처리되며, 다른 소스의 집계를 중단시키지 않습니다.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// 연결 실패
    #[error("connection to {target} failed: {reason}")]
    Connect { target: String, reason: String },

    /// 쓰기 실패
    #[error("write failed: {0}")]
    Write(#[from] std::io::Error),

    /// 메시지 인코딩 실패
    #[error("encode failed: {0}")]
    Encode(String),

    /// 시도 시간 초과
    #[error("delivery attempt timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// 재시도 횟수 소진
    #[error("all {attempts} delivery attempts failed: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// 싱크가 이미 닫힘
    #[error("sink closed")]
    Closed,
}

impl DeliveryError {
    /// 재연결 후 재시도할 가치가 있는 에러인지 반환합니다.
    ///
    /// 인코딩 실패와 닫힌 싱크는 재시도해도 결과가 같습니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Write(_) | Self::Timeout { .. }
        )
    }
}
