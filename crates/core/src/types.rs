//! 도메인 타입: 시스템 전역에서 사용되는 공통 타입
//!
//! 입력 라인([`LogLine`]), 분류 결과([`Classification`]),
//! 출력 메시지([`LogicalMessage`])와 소스 메타데이터를 정의합니다.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// 사전 파싱된 구조화 필드 (JSON 객체)
pub type StructuredFields = serde_json::Map<String, serde_json::Value>;

/// 로그를 생성한 소스(프로세스/컨테이너)의 메타데이터
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceMetadata {
    /// 소스 이름 (예: 컨테이너 이름)
    pub name: String,
    /// 소스 ID (예: 컨테이너 ID)
    pub id: String,
    /// 이미지 이름
    pub image: String,
    /// 호스트명
    pub hostname: String,
}

/// 입력 로그 라인
///
/// 생성 이후 변경되지 않습니다. `source_id`는 불투명한 식별자이며
/// 집계기 레지스트리의 키로 사용됩니다.
#[derive(Debug, Clone)]
pub struct LogLine {
    /// 원본 소스 식별자
    pub source_id: String,
    /// 원시 라인 내용
    pub text: String,
    /// 라인 시각
    pub timestamp: SystemTime,
    /// 라인이 이미 구조화된 경우의 필드 (예: JSON)
    pub structured_fields: Option<StructuredFields>,
    /// 소스 메타데이터
    pub metadata: SourceMetadata,
}

impl LogLine {
    /// 현재 시각으로 새 라인을 생성합니다.
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            text: text.into(),
            timestamp: SystemTime::now(),
            structured_fields: None,
            metadata: SourceMetadata::default(),
        }
    }

    /// 라인 시각을 설정합니다.
    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// 소스 메타데이터를 설정합니다.
    pub fn with_metadata(mut self, metadata: SourceMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// 구조화 필드를 설정합니다.
    pub fn with_structured_fields(mut self, fields: StructuredFields) -> Self {
        self.structured_fields = Some(fields);
        self
    }

    /// UTF-8 경계를 지키며 텍스트를 `max` 바이트 이하로 자릅니다.
    ///
    /// 잘렸으면 `true`를 반환합니다.
    pub fn truncate_text(&mut self, max: usize) -> bool {
        truncate_at_char_boundary(&mut self.text, max)
    }
}

/// UTF-8 경계를 지키며 `text`를 `max` 바이트 이하로 자릅니다.
///
/// 잘렸으면 `true`를 반환합니다.
pub fn truncate_at_char_boundary(text: &mut String, max: usize) -> bool {
    if text.len() <= max {
        return false;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    true
}

/// 라인 분류 결과
///
/// `Plain`은 독립된 일반 로그이며 절대 병합되지 않습니다.
/// `Continuation(kind)`은 같은 kind의 연속 라인끼리 하나의 메시지로 병합됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Classification {
    /// 일반 단일 라인 로그
    Plain,
    /// 연속 라인 (예: `java-exception`)
    Continuation(Arc<str>),
}

impl Classification {
    /// `Plain`의 문자열 표현
    pub const PLAIN: &'static str = "plain";

    /// 연속 라인 분류를 생성합니다.
    pub fn continuation(kind: impl Into<Arc<str>>) -> Self {
        Self::Continuation(kind.into())
    }

    /// `Plain` 여부를 반환합니다.
    pub fn is_plain(&self) -> bool {
        matches!(self, Self::Plain)
    }

    /// 분류 이름을 반환합니다 (메트릭 레이블, 와이어 인코딩에 사용).
    pub fn as_str(&self) -> &str {
        match self {
            Self::Plain => Self::PLAIN,
            Self::Continuation(kind) => kind,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 완성된 논리 메시지
///
/// 하나 이상의 [`LogLine`] 텍스트를 도착 순서대로 개행으로 이은 결과입니다.
/// 플러시된 이후에는 변경되지 않습니다.
///
/// # 불변식
/// - 서로 다른 두 `Continuation` kind의 라인이 섞이지 않습니다.
/// - `Plain` 메시지는 항상 정확히 한 라인입니다.
#[derive(Debug, Clone)]
pub struct LogicalMessage {
    /// 메시지 고유 ID (UUID v4, 플러시 시점에 부여)
    pub id: String,
    /// 원본 소스 식별자
    pub source_id: String,
    /// 병합된 텍스트
    pub merged_text: String,
    /// 메시지를 만든 분류
    pub kind: Classification,
    /// 병합된 라인 수
    pub line_count: usize,
    /// 첫 라인의 시각
    pub first_timestamp: SystemTime,
    /// 소스 메타데이터 (첫 라인 기준)
    pub metadata: SourceMetadata,
    /// 첫 라인의 구조화 필드
    pub structured_fields: Option<StructuredFields>,
}

impl LogicalMessage {
    /// 단일 라인으로 메시지를 생성합니다.
    pub fn single(line: LogLine, kind: Classification) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: line.source_id,
            merged_text: line.text,
            kind,
            line_count: 1,
            first_timestamp: line.timestamp,
            metadata: line.metadata,
            structured_fields: line.structured_fields,
        }
    }

    /// 병합된 라인들을 순서대로 반환합니다.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.merged_text.split('\n')
    }
}

impl fmt::Display for LogicalMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LogicalMessage[{}] source={} kind={} lines={}",
            &self.id[..8.min(self.id.len())],
            self.source_id,
            self.kind,
            self.line_count,
        )
    }
}
