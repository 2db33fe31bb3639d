//! 그룹 버퍼 -- 한 소스의 진행 중인 다중 라인 그룹을 관리합니다.
//!
//! [`GroupBuffer`]는 분류된 라인을 받아 같은 kind의 연속 라인을 병합하고,
//! kind가 바뀌거나 `Plain` 라인이 오면 진행 중인 그룹을 플러시합니다.
//!
//! # 병합 규칙
//! 진행 중인 그룹 `G`와 새 라인 `L`(분류 `C`)에 대해:
//! 1. `C == Plain`: `G`가 있으면 먼저 플러시하고, `L`을 단독 메시지로 즉시 방출
//! 2. `G`가 없음: `L`로 새 그룹 시작
//! 3. `C == G.kind`: `L`을 `G`에 이어 붙임 (용량 초과 시 `G`를 플러시하고 새 그룹 시작)
//! 4. `C != G.kind`: `G`를 플러시하고 `L`로 새 그룹 시작
//!
//! 바이트 상한보다 긴 라인은 상한에 맞게 잘린 뒤 처리되므로, 방출되는 어떤
//! 메시지도 `max_bytes`를 넘지 않습니다.
//!
//! 소유 태스크 하나만 버퍼를 변경하므로 내부에 잠금이 없습니다.

use std::fmt;
use std::time::SystemTime;

use metrics::counter;

use stackfold_core::metrics as m;
use stackfold_core::types::{
    Classification, LogLine, LogicalMessage, SourceMetadata, StructuredFields,
};

/// 그룹 플러시 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    /// 다른 연속 kind의 라인이 도착함
    KindChange,
    /// `Plain` 라인이 도착함
    Plain,
    /// 유휴 타임아웃 경과
    Timeout,
    /// 그룹 라인/바이트 상한 도달
    Capacity,
    /// 명시적 flush-all 또는 종료
    Shutdown,
}

impl FlushReason {
    /// 메트릭 레이블 값
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KindChange => "kind_change",
            Self::Plain => "plain",
            Self::Timeout => "timeout",
            Self::Capacity => "capacity",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 버퍼가 방출한 완성 메시지
#[derive(Debug, Clone)]
pub enum Emission {
    /// 플러시된 연속 라인 그룹
    Group {
        /// 완성된 메시지
        message: LogicalMessage,
        /// 플러시 사유
        reason: FlushReason,
    },
    /// 병합되지 않는 단독 `Plain` 메시지
    Standalone(LogicalMessage),
}

impl Emission {
    /// 방출된 메시지를 참조합니다.
    pub fn message(&self) -> &LogicalMessage {
        match self {
            Self::Group { message, .. } | Self::Standalone(message) => message,
        }
    }

    /// 메시지를 꺼냅니다.
    pub fn into_message(self) -> LogicalMessage {
        match self {
            Self::Group { message, .. } | Self::Standalone(message) => message,
        }
    }

    /// 그룹 플러시인 경우 사유를 반환합니다.
    pub fn reason(&self) -> Option<FlushReason> {
        match self {
            Self::Group { reason, .. } => Some(*reason),
            Self::Standalone(_) => None,
        }
    }
}

/// 진행 중인 그룹
#[derive(Debug)]
struct PendingGroup {
    source_id: String,
    kind: Classification,
    merged_text: String,
    line_count: usize,
    first_timestamp: SystemTime,
    metadata: SourceMetadata,
    structured_fields: Option<StructuredFields>,
}

impl PendingGroup {
    fn start(line: LogLine, kind: Classification) -> Self {
        Self {
            source_id: line.source_id,
            kind,
            merged_text: line.text,
            line_count: 1,
            first_timestamp: line.timestamp,
            metadata: line.metadata,
            structured_fields: line.structured_fields,
        }
    }

    /// `text`를 이어 붙였을 때의 바이트 수 (개행 포함)
    fn bytes_after_append(&self, text: &str) -> usize {
        self.merged_text.len() + 1 + text.len()
    }

    fn append(&mut self, text: &str) {
        self.merged_text.push('\n');
        self.merged_text.push_str(text);
        self.line_count += 1;
    }

    fn finish(self, reason: FlushReason) -> Emission {
        Emission::Group {
            message: LogicalMessage {
                id: uuid::Uuid::new_v4().to_string(),
                source_id: self.source_id,
                merged_text: self.merged_text,
                kind: self.kind,
                line_count: self.line_count,
                first_timestamp: self.first_timestamp,
                metadata: self.metadata,
                structured_fields: self.structured_fields,
            },
            reason,
        }
    }
}

/// 한 소스의 그룹 버퍼
#[derive(Debug)]
pub struct GroupBuffer {
    pending: Option<PendingGroup>,
    max_lines: usize,
    max_bytes: usize,
}

impl GroupBuffer {
    /// 그룹 상한을 지정하여 빈 버퍼를 생성합니다.
    ///
    /// 상한은 최소 1로 보정됩니다.
    pub fn new(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            pending: None,
            max_lines: max_lines.max(1),
            max_bytes: max_bytes.max(1),
        }
    }

    /// 분류된 라인을 버퍼에 제공합니다.
    ///
    /// 이 호출로 완성된 메시지를 방출 순서대로 반환합니다 (최대 2개).
    pub fn offer(&mut self, mut line: LogLine, classification: Classification) -> Vec<Emission> {
        let mut emitted = Vec::new();

        let original_len = line.text.len();
        if line.truncate_text(self.max_bytes) {
            counter!(m::AGGREGATOR_LINES_TRUNCATED_TOTAL).increment(1);
            tracing::debug!(
                source_id = %line.source_id,
                bytes = original_len,
                max_bytes = self.max_bytes,
                "line exceeds group byte cap, truncated"
            );
        }

        if classification.is_plain() {
            if let Some(group) = self.pending.take() {
                emitted.push(group.finish(FlushReason::Plain));
            }
            emitted.push(Emission::Standalone(LogicalMessage::single(
                line,
                Classification::Plain,
            )));
            return emitted;
        }

        match self.pending.take() {
            None => {}
            Some(mut group) if group.kind == classification => {
                let fits = group.line_count < self.max_lines
                    && group.bytes_after_append(&line.text) <= self.max_bytes;
                if fits {
                    group.append(&line.text);
                    self.pending = Some(group);
                    return emitted;
                }
                emitted.push(group.finish(FlushReason::Capacity));
            }
            Some(group) => emitted.push(group.finish(FlushReason::KindChange)),
        }

        self.pending = Some(PendingGroup::start(line, classification));
        emitted
    }

    /// 진행 중인 그룹을 플러시합니다. 그룹이 없으면 `None`입니다.
    pub fn flush(&mut self, reason: FlushReason) -> Option<Emission> {
        self.pending.take().map(|g| g.finish(reason))
    }

    /// 진행 중인 그룹이 없는지 반환합니다.
    pub fn is_empty(&self) -> bool {
        self.pending.is_none()
    }

    /// 진행 중인 그룹의 kind
    pub fn pending_kind(&self) -> Option<&Classification> {
        self.pending.as_ref().map(|g| &g.kind)
    }

    /// 진행 중인 그룹의 라인 수 (없으면 0)
    pub fn pending_lines(&self) -> usize {
        self.pending.as_ref().map_or(0, |g| g.line_count)
    }
}
