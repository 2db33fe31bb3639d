//! 집계 엔진 에러 타입
//!
//! [`AggregatorError`]는 집계 엔진 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<AggregatorError> for StackfoldError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.
//!
//! 분류와 그룹 버퍼링은 전함수이므로 여기에 에러가 없습니다.
//! 런타임에 실패할 수 있는 경로는 전송뿐이며, 그것은
//! [`DeliveryError`](stackfold_core::error::DeliveryError)로 표현됩니다.

use stackfold_core::error::{ConfigError, PipelineError, StackfoldError};

/// 집계 엔진 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    /// dialect 파일 로딩 실패
    #[error("rule load error: {path}: {reason}")]
    RuleLoad {
        /// dialect 파일 경로
        path: String,
        /// 로딩 실패 사유
        reason: String,
    },

    /// dialect 유효성 검증 실패
    #[error("rule validation error: dialect '{kind}': {reason}")]
    RuleValidation {
        /// 문제가 된 dialect kind
        kind: String,
        /// 검증 실패 사유
        reason: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// 하나의 소스에 두 개의 집계기가 존재함 (동기화 버그)
    #[error("registry race: more than one aggregator for source '{source_id}'")]
    RegistryRace {
        /// 문제가 된 소스 ID
        source_id: String,
    },

    /// 입력 라인 디코딩 실패
    #[error("decode error: {0}")]
    Decode(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 정규식 컴파일 에러
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl From<AggregatorError> for StackfoldError {
    fn from(err: AggregatorError) -> Self {
        match err {
            AggregatorError::Config { field, reason } => {
                StackfoldError::Config(ConfigError::InvalidValue { field, reason })
            }
            AggregatorError::Io(e) => StackfoldError::Io(e),
            other => StackfoldError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}
