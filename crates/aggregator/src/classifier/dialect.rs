//! 예외 dialect 데이터 타입
//!
//! dialect는 하나의 언어/런타임이 남기는 스택 트레이스를 인식하는 패턴 묶음입니다.
//! 같은 dialect의 패턴에 매칭된 연속 라인은 하나의 `kind`로 묶여 병합됩니다.

use serde::{Deserialize, Serialize};

use stackfold_core::types::Classification;

use crate::error::AggregatorError;

/// Java 예외 kind
pub const JAVA_EXCEPTION_KIND: &str = "java-exception";

/// Python traceback kind
pub const PYTHON_TRACEBACK_KIND: &str = "python-traceback";

/// dialect kind 최대 길이
const MAX_KIND_LEN: usize = 64;

/// dialect당 최대 패턴 수
const MAX_PATTERNS: usize = 64;

/// 연속 라인 dialect -- 하나의 YAML 파일 또는 내장 규칙에 대응합니다.
///
/// # YAML 스키마
/// ```yaml
/// kind: go-panic
/// description: Go runtime panics and goroutine dumps
/// enabled: true
/// patterns:
///   - '^panic: .+'
///   - '^goroutine \d+ \[.+\]:'
///   - '^\s+/.+\.go:\d+'
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialectRule {
    /// 분류 kind (메시지의 `kind`로 그대로 사용)
    pub kind: String,
    /// 설명
    #[serde(default)]
    pub description: String,
    /// 활성화 여부
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 라인 매칭 정규식 (파일 순서대로 평가)
    pub patterns: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl DialectRule {
    /// 새 dialect를 생성합니다.
    pub fn new(kind: impl Into<String>, patterns: Vec<String>) -> Self {
        Self {
            kind: kind.into(),
            description: String::new(),
            enabled: true,
            patterns,
        }
    }

    /// dialect의 유효성을 검증합니다.
    ///
    /// 정규식 컴파일 검증은 [`LineClassifier`](super::LineClassifier)가 수행합니다.
    pub fn validate(&self) -> Result<(), AggregatorError> {
        if self.kind.is_empty() {
            return Err(AggregatorError::RuleValidation {
                kind: "(empty)".to_owned(),
                reason: "dialect kind must not be empty".to_owned(),
            });
        }

        if self.kind.len() > MAX_KIND_LEN {
            return Err(AggregatorError::RuleValidation {
                kind: self.kind.clone(),
                reason: format!("dialect kind must not exceed {MAX_KIND_LEN} characters"),
            });
        }

        if self.kind.eq_ignore_ascii_case(Classification::PLAIN) {
            return Err(AggregatorError::RuleValidation {
                kind: self.kind.clone(),
                reason: "'plain' is reserved for standalone lines".to_owned(),
            });
        }

        if self.kind.chars().any(char::is_whitespace) {
            return Err(AggregatorError::RuleValidation {
                kind: self.kind.clone(),
                reason: "dialect kind must not contain whitespace".to_owned(),
            });
        }

        if self.patterns.is_empty() {
            return Err(AggregatorError::RuleValidation {
                kind: self.kind.clone(),
                reason: "at least one pattern is required".to_owned(),
            });
        }

        if self.patterns.len() > MAX_PATTERNS {
            return Err(AggregatorError::RuleValidation {
                kind: self.kind.clone(),
                reason: format!("too many patterns: max {MAX_PATTERNS}"),
            });
        }

        Ok(())
    }

    /// 이름으로 내장 dialect를 찾습니다.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "java" => Some(Self::java()),
            "python" => Some(Self::python()),
            _ => None,
        }
    }

    /// Java 예외: 헤더, `at` 프레임, `... N more`, `Caused by:`
    pub fn java() -> Self {
        Self {
            kind: JAVA_EXCEPTION_KIND.to_owned(),
            description: "Java/JVM exception stack traces".to_owned(),
            enabled: true,
            patterns: [
                r"^.*Exception: .+",
                r"^\s+at .+",
                r"^\s+\.\.\. \d+ more",
                r"^\s*Caused by:.+",
            ]
            .map(str::to_owned)
            .to_vec(),
        }
    }

    /// Python traceback: 배너, `File` 프레임, 들여쓴 소스 라인, 체인 배너, 종료 라인
    pub fn python() -> Self {
        Self {
            kind: PYTHON_TRACEBACK_KIND.to_owned(),
            description: "Python tracebacks including chained exceptions".to_owned(),
            enabled: true,
            patterns: [
                r"^Traceback \(most recent call last\):",
                r#"^\s+File ".+", line \d+"#,
                r"^ {4}\S",
                r"^During handling of the above exception, another exception occurred:",
                r"^The above exception was the direct cause of the following exception:",
                r"^[\w.]+(Error|Exception|Warning|Interrupt|Exit)(: .*)?$",
            ]
            .map(str::to_owned)
            .to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_valid() {
        DialectRule::java().validate().unwrap();
        DialectRule::python().validate().unwrap();
    }

    #[test]
    fn builtin_lookup_by_name() {
        assert_eq!(
            DialectRule::builtin("java").map(|d| d.kind),
            Some(JAVA_EXCEPTION_KIND.to_owned())
        );
        assert!(DialectRule::builtin("cobol").is_none());
    }

    #[test]
    fn plain_kind_is_reserved() {
        let rule = DialectRule::new("Plain", vec![".".to_owned()]);
        let err = rule.validate().unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn empty_patterns_rejected() {
        let rule = DialectRule::new("go-panic", Vec::new());
        assert!(rule.validate().is_err());
    }

    #[test]
    fn whitespace_in_kind_rejected() {
        let rule = DialectRule::new("go panic", vec!["^panic".to_owned()]);
        assert!(rule.validate().is_err());
    }

    #[test]
    fn yaml_defaults_enabled() {
        let rule: DialectRule =
            serde_yaml::from_str("kind: go-panic\npatterns: ['^panic: .+']").unwrap();
        assert!(rule.enabled);
        assert!(rule.description.is_empty());
    }
}
