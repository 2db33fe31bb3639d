//! 라인 분류기 -- 로그 라인을 `Plain` 또는 연속 라인 kind로 분류합니다.
//!
//! 분류 규칙은 dialect의 순서 있는 목록입니다. dialect는 설정 순서대로,
//! dialect 내부 패턴은 정의 순서대로 평가되며 처음 매칭된 dialect의 kind가
//! 결과가 됩니다. 아무 패턴에도 매칭되지 않으면 `Plain`입니다.
//!
//! # 아키텍처
//! - [`LineClassifier`]: 컴파일된 dialect 목록과 분류 함수
//! - [`dialect`]: dialect 데이터 구조와 내장 dialect (java, python)
//! - [`loader`]: YAML dialect 파일 로딩 및 유효성 검증
//!
//! 새 예외 형식을 지원하려면 dialect를 하나 추가하면 됩니다.
//! 그룹 버퍼나 집계기는 kind 문자열만 비교하므로 바뀌지 않습니다.

pub mod dialect;
pub mod loader;

pub use dialect::{DialectRule, JAVA_EXCEPTION_KIND, PYTHON_TRACEBACK_KIND};
pub use loader::DialectLoader;

use std::collections::HashSet;
use std::sync::Arc;

use regex::RegexSet;

use stackfold_core::types::Classification;

use crate::config::AggregatorConfig;
use crate::error::AggregatorError;

/// 컴파일된 dialect
#[derive(Debug)]
struct CompiledDialect {
    kind: Arc<str>,
    patterns: RegexSet,
}

/// 라인 분류기
///
/// 생성 이후 불변이며 `Arc`로 공유됩니다. [`classify`](Self::classify)는
/// 부수 효과가 없는 결정적 함수입니다.
///
/// # 사용 예시
/// ```
/// use stackfold_aggregator::classifier::LineClassifier;
///
/// let classifier = LineClassifier::with_builtins(&["java"]).unwrap();
/// assert_eq!(classifier.classify("  at Foo.bar(Foo.java:10)").as_str(), "java-exception");
/// assert!(classifier.classify("starting up").is_plain());
/// ```
#[derive(Debug, Default)]
pub struct LineClassifier {
    dialects: Vec<CompiledDialect>,
}

impl LineClassifier {
    /// dialect가 없는 분류기를 생성합니다 (모든 라인이 `Plain`).
    pub fn new() -> Self {
        Self::default()
    }

    /// 이름으로 지정한 내장 dialect만으로 분류기를 생성합니다.
    pub fn with_builtins(names: &[&str]) -> Result<Self, AggregatorError> {
        let mut classifier = Self::new();
        for name in names {
            let dialect = DialectRule::builtin(name).ok_or_else(|| AggregatorError::Config {
                field: "dialects".to_owned(),
                reason: format!("unknown dialect '{name}'"),
            })?;
            classifier.add_dialect(&dialect)?;
        }
        Ok(classifier)
    }

    /// 설정에 따라 내장 dialect와 `rule_dir`의 사용자 정의 dialect를 로드합니다.
    ///
    /// 사용자 정의 dialect는 내장 dialect 뒤에 평가됩니다.
    pub async fn from_config(config: &AggregatorConfig) -> Result<Self, AggregatorError> {
        let names: Vec<&str> = config.dialects.iter().map(String::as_str).collect();
        let mut classifier = Self::with_builtins(&names)?;

        if !config.rule_dir.is_empty() {
            let reserved: HashSet<String> = classifier.kinds().map(str::to_owned).collect();
            let custom = DialectLoader::load_directory(&config.rule_dir, &reserved).await?;
            for dialect in &custom {
                if let Err(e) = classifier.add_dialect(dialect) {
                    tracing::warn!(kind = %dialect.kind, error = %e, "skipping dialect");
                }
            }
        }

        tracing::info!(
            dialects = classifier.dialect_count(),
            kinds = ?classifier.kinds().collect::<Vec<_>>(),
            "line classifier ready"
        );

        Ok(classifier)
    }

    /// dialect를 검증하고 컴파일하여 우선순위 목록 끝에 추가합니다.
    ///
    /// 비활성 dialect는 추가하지 않고 `Ok`를 반환합니다.
    pub fn add_dialect(&mut self, dialect: &DialectRule) -> Result<(), AggregatorError> {
        dialect.validate()?;
        if !dialect.enabled {
            return Ok(());
        }

        if self.kinds().any(|k| k == dialect.kind) {
            return Err(AggregatorError::RuleValidation {
                kind: dialect.kind.clone(),
                reason: "dialect kind already registered".to_owned(),
            });
        }

        let patterns =
            RegexSet::new(&dialect.patterns).map_err(|e| AggregatorError::RuleValidation {
                kind: dialect.kind.clone(),
                reason: format!("invalid pattern: {e}"),
            })?;

        self.dialects.push(CompiledDialect {
            kind: Arc::from(dialect.kind.as_str()),
            patterns,
        });
        Ok(())
    }

    /// 라인 텍스트를 분류합니다.
    pub fn classify(&self, text: &str) -> Classification {
        self.dialects
            .iter()
            .find(|d| d.patterns.is_match(text))
            .map_or(Classification::Plain, |d| {
                Classification::Continuation(Arc::clone(&d.kind))
            })
    }

    /// 등록된 dialect 수를 반환합니다.
    pub fn dialect_count(&self) -> usize {
        self.dialects.len()
    }

    /// 등록된 kind를 우선순위 순으로 반환합니다.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.dialects.iter().map(|d| &*d.kind)
    }
}
