//! dialect 파일 로더 -- YAML dialect 파일을 디스크에서 로드합니다.
//!
//! dialect 디렉토리 내의 `.yml`/`.yaml` 파일을 이름 순으로 스캔하고 파싱합니다.
//! 개별 파일 파싱 실패는 경고 로그를 남기고 건너뜁니다.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::AggregatorError;

use super::dialect::DialectRule;

const MAX_DIALECT_FILE_SIZE: u64 = 1024 * 1024; // 1MB
const MAX_DIALECTS_COUNT: usize = 256;

/// dialect 파일 로더
pub struct DialectLoader;

impl DialectLoader {
    /// 디렉토리에서 모든 YAML dialect 파일을 로드합니다.
    ///
    /// 파일은 이름 순으로 처리되므로 분류 우선순위가 재현 가능합니다.
    /// `reserved`에 포함된 kind(내장 dialect)와 중복되는 파일은 건너뜁니다.
    ///
    /// # Errors
    /// - 디렉토리를 읽을 수 없는 경우
    /// - dialect 수가 `MAX_DIALECTS_COUNT`를 초과하는 경우
    pub async fn load_directory(
        dir: impl AsRef<Path>,
        reserved: &HashSet<String>,
    ) -> Result<Vec<DialectRule>, AggregatorError> {
        let dir = dir.as_ref();
        let paths = Self::yaml_files(dir).await?;

        let mut dialects = Vec::new();
        let mut seen_kinds = reserved.clone();

        for path in paths {
            match Self::load_file(&path).await {
                Ok(dialect) => {
                    if !dialect.enabled {
                        tracing::debug!(
                            kind = %dialect.kind,
                            path = %path.display(),
                            "dialect disabled, skipping"
                        );
                        continue;
                    }
                    if !seen_kinds.insert(dialect.kind.clone()) {
                        tracing::warn!(
                            kind = %dialect.kind,
                            path = %path.display(),
                            "duplicate dialect kind, skipping"
                        );
                        continue;
                    }
                    dialects.push(dialect);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to load dialect file, skipping"
                    );
                }
            }

            if dialects.len() > MAX_DIALECTS_COUNT {
                return Err(AggregatorError::RuleLoad {
                    path: dir.display().to_string(),
                    reason: format!("too many dialects: max {MAX_DIALECTS_COUNT}"),
                });
            }
        }

        tracing::info!(
            dir = %dir.display(),
            count = dialects.len(),
            "loaded custom dialects"
        );

        Ok(dialects)
    }

    /// 디렉토리의 YAML 파일 경로를 이름 순으로 반환합니다.
    async fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>, AggregatorError> {
        let mut entries =
            tokio::fs::read_dir(dir)
                .await
                .map_err(|e| AggregatorError::RuleLoad {
                    path: dir.display().to_string(),
                    reason: format!("failed to read directory: {e}"),
                })?;

        let mut paths = Vec::new();
        while let Some(entry) =
            entries
                .next_entry()
                .await
                .map_err(|e| AggregatorError::RuleLoad {
                    path: dir.display().to_string(),
                    reason: format!("failed to read directory entry: {e}"),
                })?
        {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .is_some_and(|ext| ext == "yml" || ext == "yaml");
            if is_yaml {
                paths.push(path);
            }
        }

        paths.sort();
        Ok(paths)
    }

    /// 단일 YAML 파일에서 dialect를 로드합니다.
    pub async fn load_file(path: impl AsRef<Path>) -> Result<DialectRule, AggregatorError> {
        let path = path.as_ref();

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| AggregatorError::RuleLoad {
                path: path.display().to_string(),
                reason: format!("failed to read file metadata: {e}"),
            })?;

        if metadata.len() > MAX_DIALECT_FILE_SIZE {
            return Err(AggregatorError::RuleLoad {
                path: path.display().to_string(),
                reason: format!(
                    "file too large: {} bytes (max: {MAX_DIALECT_FILE_SIZE})",
                    metadata.len()
                ),
            });
        }

        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| AggregatorError::RuleLoad {
                    path: path.display().to_string(),
                    reason: format!("failed to read file: {e}"),
                })?;

        Self::parse_yaml(&content, &path.display().to_string())
    }

    /// YAML 문자열을 파싱하여 dialect를 생성합니다.
    pub fn parse_yaml(yaml_str: &str, source: &str) -> Result<DialectRule, AggregatorError> {
        let dialect: DialectRule =
            serde_yaml::from_str(yaml_str).map_err(|e| AggregatorError::RuleLoad {
                path: source.to_owned(),
                reason: format!("YAML parse error: {e}"),
            })?;

        dialect.validate()?;

        Ok(dialect)
    }
}
