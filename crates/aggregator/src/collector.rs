//! 라인 수집기 -- 줄 단위 입력을 [`LogLine`]으로 디코딩하여 파이프라인에 전달합니다.
//!
//! # 입력 형식
//! - `envelope`: 한 줄이 JSON 객체 하나
//!   `{"source_id": "...", "text": "...", "time": "RFC 3339"?, "source": {name, id, image, hostname}?}`
//! - `plain`: 한 줄 전체가 `default_source_id` 소스의 로그 텍스트
//!
//! 라인 텍스트가 JSON 객체이면 파싱 결과를 `structured_fields`로 붙입니다.
//! 구조화 여부는 분류에 영향을 주지 않습니다.
//!
//! 물리적 한 줄은 [`CollectorConfig::read_limit`] 바이트까지만 메모리에 담고
//! 나머지는 다음 개행까지 읽어 버립니다.
//!
//! EOF에 도달하거나 취소 토큰이 발동하면 수집을 끝냅니다.

use std::io;
use std::str::FromStr;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use stackfold_core::config::InputSection;
use stackfold_core::metrics as m;
use stackfold_core::types::{LogLine, SourceMetadata, StructuredFields};

/// envelope 한 줄에서 텍스트 외 JSON 구조와 메타데이터에 허용하는 여유분
const ENVELOPE_OVERHEAD_BYTES: usize = 64 * 1024;

use crate::error::AggregatorError;

/// 입력 형식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InputFormat {
    /// JSON envelope (기본값)
    #[default]
    Envelope,
    /// 원시 텍스트
    Plain,
}

impl FromStr for InputFormat {
    type Err = AggregatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "envelope" => Ok(Self::Envelope),
            "plain" => Ok(Self::Plain),
            other => Err(AggregatorError::Config {
                field: "input.format".to_owned(),
                reason: format!("unknown input format '{other}'"),
            }),
        }
    }
}

/// 수집기 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// 입력 형식
    pub format: InputFormat,
    /// plain 형식에서 사용할 소스 식별자
    pub default_source_id: String,
    /// 라인 텍스트 최대 바이트 수 (초과분은 잘림)
    pub max_line_bytes: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            format: InputFormat::Envelope,
            default_source_id: "stdin".to_owned(),
            max_line_bytes: 1024 * 1024,
        }
    }
}

impl CollectorConfig {
    /// 물리적 한 줄에서 메모리에 담는 최대 바이트 수
    ///
    /// envelope은 JSON 이스케이프를 고려해 텍스트 상한의 두 배에 여유분을 더합니다.
    /// 이보다 긴 envelope 줄은 디코딩하지 않고 건너뜁니다.
    pub fn read_limit(&self) -> usize {
        match self.format {
            InputFormat::Plain => self.max_line_bytes.saturating_add(2),
            InputFormat::Envelope => self
                .max_line_bytes
                .saturating_mul(2)
                .saturating_add(ENVELOPE_OVERHEAD_BYTES),
        }
    }

    /// core의 `InputSection`에서 수집기 설정을 생성합니다.
    pub fn from_core(core: &InputSection) -> Result<Self, AggregatorError> {
        Ok(Self {
            format: core.format.parse()?,
            default_source_id: core.default_source_id.clone(),
            max_line_bytes: core.max_line_bytes,
        })
    }
}

/// envelope 형식의 한 줄
#[derive(Debug, Deserialize)]
struct Envelope {
    source_id: String,
    text: String,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    #[serde(default)]
    source: SourceMetadata,
}

/// 원시 라인 -> `LogLine` 디코더
#[derive(Debug, Clone)]
pub struct LineDecoder {
    config: CollectorConfig,
}

impl LineDecoder {
    /// 새 디코더를 생성합니다.
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    /// 줄 하나를 디코딩합니다. 끝의 개행 문자는 제거되어 있어야 합니다.
    pub fn decode(&self, raw: &str) -> Result<LogLine, AggregatorError> {
        let mut line = match self.config.format {
            InputFormat::Plain => LogLine::new(self.config.default_source_id.as_str(), raw),
            InputFormat::Envelope => {
                let envelope: Envelope = serde_json::from_str(raw)
                    .map_err(|e| AggregatorError::Decode(format!("invalid envelope: {e}")))?;
                if envelope.source_id.is_empty() {
                    return Err(AggregatorError::Decode(
                        "envelope source_id must not be empty".to_owned(),
                    ));
                }
                let timestamp = envelope
                    .time
                    .map_or_else(SystemTime::now, SystemTime::from);
                LogLine::new(envelope.source_id, envelope.text)
                    .with_timestamp(timestamp)
                    .with_metadata(envelope.source)
            }
        };

        if line.truncate_text(self.config.max_line_bytes) {
            counter!(m::AGGREGATOR_LINES_TRUNCATED_TOTAL).increment(1);
        }
        if let Some(fields) = parse_structured(&line.text) {
            line = line.with_structured_fields(fields);
        }
        Ok(line)
    }
}

/// 텍스트가 JSON 객체이면 필드 맵을 반환합니다.
fn parse_structured(text: &str) -> Option<StructuredFields> {
    let trimmed = text.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// `\n`까지 읽되 `buf`에는 최대 `limit` 바이트만 담습니다.
///
/// 읽은 전체 바이트 수(버린 부분 포함)와 잘림 여부를 반환합니다. 0이면 EOF입니다.
async fn read_line_bounded<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> io::Result<(usize, bool)>
where
    R: AsyncBufRead + Unpin,
{
    let mut read = 0;
    let mut truncated = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok((read, truncated));
        }

        let (used, done) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        let room = limit.saturating_sub(buf.len());
        if used > room {
            truncated = true;
        }
        buf.extend_from_slice(&available[..used.min(room)]);

        reader.consume(used);
        read += used;
        if done {
            return Ok((read, truncated));
        }
    }
}

/// 잘린 줄 끝에 남은 불완전한 UTF-8 시퀀스를 제거합니다.
fn trim_partial_utf8(buf: &mut Vec<u8>) {
    if let Err(e) = std::str::from_utf8(buf) {
        if e.error_len().is_none() {
            buf.truncate(e.valid_up_to());
        }
    }
}

/// 수집 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    /// 파이프라인에 전달한 라인 수
    pub forwarded: u64,
    /// 디코딩 실패 또는 길이 초과로 건너뛴 라인 수
    pub skipped: u64,
    /// 건너뛴 빈 줄 수
    pub blank: u64,
}

/// 줄 단위 입력 수집기
#[derive(Debug, Clone)]
pub struct LineCollector {
    decoder: LineDecoder,
}

impl LineCollector {
    /// 새 수집기를 생성합니다.
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            decoder: LineDecoder::new(config),
        }
    }

    /// EOF 또는 취소될 때까지 `reader`에서 라인을 읽어 `tx`로 보냅니다.
    ///
    /// 디코딩할 수 없는 줄은 경고를 남기고 건너뜁니다. 공백뿐인 줄은 로그 내용이
    /// 없으므로 전달하지 않고 [`CollectStats::blank`]로 셉니다.
    ///
    /// # Errors
    /// - 읽기 I/O 에러
    /// - 파이프라인 입력 채널이 닫힌 경우
    pub async fn run<R>(
        &self,
        mut reader: R,
        tx: mpsc::Sender<LogLine>,
        cancel: CancellationToken,
    ) -> Result<CollectStats, AggregatorError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut stats = CollectStats::default();
        let mut buf = Vec::new();
        let limit = self.decoder.config.read_limit();
        let format = self.decoder.config.format;

        loop {
            buf.clear();

            let (read, truncated) = tokio::select! {
                result = read_line_bounded(&mut reader, &mut buf, limit) => result?,
                () = cancel.cancelled() => {
                    tracing::debug!("line collector received shutdown signal");
                    break;
                }
            };

            if read == 0 {
                tracing::info!(
                    forwarded = stats.forwarded,
                    skipped = stats.skipped,
                    blank = stats.blank,
                    "input reached EOF"
                );
                break;
            }

            if truncated {
                if format == InputFormat::Envelope {
                    stats.skipped += 1;
                    counter!(m::AGGREGATOR_DECODE_ERRORS_TOTAL).increment(1);
                    tracing::warn!(bytes = read, limit, "skipping oversized envelope line");
                    continue;
                }
                trim_partial_utf8(&mut buf);
            }

            let raw = String::from_utf8_lossy(&buf);
            let raw = raw.trim_end_matches(['\n', '\r']);
            if raw.trim().is_empty() {
                stats.blank += 1;
                continue;
            }

            let line = match self.decoder.decode(raw) {
                Ok(line) => line,
                Err(e) => {
                    stats.skipped += 1;
                    counter!(m::AGGREGATOR_DECODE_ERRORS_TOTAL).increment(1);
                    tracing::warn!(error = %e, bytes = raw.len(), "skipping undecodable input line");
                    continue;
                }
            };

            tx.send(line)
                .await
                .map_err(|e| AggregatorError::Channel(format!("ingress closed: {e}")))?;
            stats.forwarded += 1;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_decoder() -> LineDecoder {
        LineDecoder::new(CollectorConfig::default())
    }

    #[test]
    fn input_format_from_str() {
        assert_eq!("plain".parse::<InputFormat>().unwrap(), InputFormat::Plain);
        assert!("xml".parse::<InputFormat>().is_err());
    }

    #[test]
    fn decode_envelope_with_metadata_and_time() {
        let raw = r#"{"source_id":"c0ffee","text":"Exception: boom","time":"2024-01-15T12:00:00Z","source":{"name":"web","id":"c0ffee","image":"app:1.2","hostname":"node-1"}}"#;
        let line = envelope_decoder().decode(raw).unwrap();
        assert_eq!(line.source_id, "c0ffee");
        assert_eq!(line.text, "Exception: boom");
        assert_eq!(line.metadata.image, "app:1.2");
        let expected: SystemTime = "2024-01-15T12:00:00Z"
            .parse::<DateTime<Utc>>()
            .unwrap()
            .into();
        assert_eq!(line.timestamp, expected);
        assert!(line.structured_fields.is_none());
    }

    #[test]
    fn decode_envelope_rejects_garbage() {
        let err = envelope_decoder().decode("not json").unwrap_err();
        assert!(matches!(err, AggregatorError::Decode(_)));
    }

    #[test]
    fn decode_envelope_rejects_empty_source() {
        let err = envelope_decoder()
            .decode(r#"{"source_id":"","text":"x"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("source_id"));
    }

    #[test]
    fn json_text_becomes_structured_fields() {
        let raw = r#"{"source_id":"a","text":"{\"level\":\"warn\",\"msg\":\"slow\"}"}"#;
        let line = envelope_decoder().decode(raw).unwrap();
        let fields = line.structured_fields.unwrap();
        assert_eq!(fields["level"], "warn");
    }

    #[test]
    fn json_array_text_is_not_structured() {
        let decoder = LineDecoder::new(CollectorConfig {
            format: InputFormat::Plain,
            ..Default::default()
        });
        assert!(decoder.decode("[1,2,3]").unwrap().structured_fields.is_none());
    }

    #[test]
    fn plain_uses_default_source() {
        let decoder = LineDecoder::new(CollectorConfig {
            format: InputFormat::Plain,
            default_source_id: "app".to_owned(),
            ..Default::default()
        });
        let line = decoder.decode("  at Foo.bar").unwrap();
        assert_eq!(line.source_id, "app");
        assert_eq!(line.text, "  at Foo.bar");
    }

    #[test]
    fn long_lines_are_truncated_on_char_boundary() {
        let decoder = LineDecoder::new(CollectorConfig {
            format: InputFormat::Plain,
            max_line_bytes: 5,
            ..Default::default()
        });
        // 'é'는 2바이트: "abcdé" = 6바이트 -> "abcd"
        assert_eq!(decoder.decode("abcdéfg").unwrap().text, "abcd");
    }

    #[tokio::test]
    async fn collector_forwards_until_eof() {
        let input = concat!(
            r#"{"source_id":"a","text":"one"}"#,
            "\n\n",
            "garbage\n",
            r#"{"source_id":"b","text":"two"}"#,
            "\r\n",
        );
        let (tx, mut rx) = mpsc::channel(16);
        let collector = LineCollector::new(CollectorConfig::default());
        let stats = collector
            .run(input.as_bytes(), tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            stats,
            CollectStats {
                forwarded: 2,
                skipped: 1,
                blank: 1
            }
        );
        assert_eq!(rx.recv().await.unwrap().text, "one");
        assert_eq!(rx.recv().await.unwrap().source_id, "b");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn bounded_read_discards_rest_of_long_line() {
        let mut input = vec![b'x'; 100_000];
        input.extend_from_slice(b"\nnext\n");
        let mut reader = tokio::io::BufReader::with_capacity(1024, input.as_slice());
        let mut buf = Vec::new();

        let (read, truncated) = read_line_bounded(&mut reader, &mut buf, 16).await.unwrap();
        assert_eq!(read, 100_001);
        assert!(truncated);
        assert_eq!(buf.len(), 16);

        buf.clear();
        let (read, truncated) = read_line_bounded(&mut reader, &mut buf, 16).await.unwrap();
        assert_eq!((read, truncated), (5, false));
        assert_eq!(buf, b"next\n");

        buf.clear();
        let (read, _) = read_line_bounded(&mut reader, &mut buf, 16).await.unwrap();
        assert_eq!(read, 0);
    }

    #[test]
    fn partial_utf8_tail_is_removed() {
        // "é" = 0xC3 0xA9, 첫 바이트만 남은 경우
        let mut buf = b"abc\xC3".to_vec();
        trim_partial_utf8(&mut buf);
        assert_eq!(buf, b"abc");

        let mut whole = "abé".as_bytes().to_vec();
        trim_partial_utf8(&mut whole);
        assert_eq!(whole, "abé".as_bytes());
    }

    #[tokio::test]
    async fn plain_collector_truncates_newline_less_input() {
        let mut input = "y".repeat(50_000);
        input.push_str("\nshort\n");
        let (tx, mut rx) = mpsc::channel(16);
        let collector = LineCollector::new(CollectorConfig {
            format: InputFormat::Plain,
            max_line_bytes: 64,
            ..Default::default()
        });
        let stats = collector
            .run(input.as_bytes(), tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.forwarded, 2);
        assert_eq!(rx.recv().await.unwrap().text, "y".repeat(64));
        assert_eq!(rx.recv().await.unwrap().text, "short");
    }

    #[tokio::test]
    async fn oversized_envelope_is_skipped() {
        let config = CollectorConfig {
            max_line_bytes: 16,
            ..Default::default()
        };
        let huge = format!(
            r#"{{"source_id":"a","text":"{}"}}"#,
            "z".repeat(config.read_limit() + 1)
        );
        let input = format!("{huge}\n{}\n", r#"{"source_id":"a","text":"ok"}"#);
        let (tx, mut rx) = mpsc::channel(16);
        let stats = LineCollector::new(config)
            .run(input.as_bytes(), tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.forwarded, 1);
        assert_eq!(rx.recv().await.unwrap().text, "ok");
    }

    #[tokio::test]
    async fn plain_blank_lines_are_counted() {
        let (tx, mut rx) = mpsc::channel(16);
        let collector = LineCollector::new(CollectorConfig {
            format: InputFormat::Plain,
            ..Default::default()
        });
        let stats = collector
            .run("first\n\n   \nsecond\n".as_bytes(), tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.forwarded, 2);
        assert_eq!(stats.blank, 2);
        assert_eq!(rx.recv().await.unwrap().text, "first");
        assert_eq!(rx.recv().await.unwrap().text, "second");
    }

    #[tokio::test]
    async fn collector_stops_on_cancel() {
        let (_writer, reader) = tokio::io::duplex(64);
        let reader = tokio::io::BufReader::new(reader);
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let collector = LineCollector::new(CollectorConfig::default());
        let stats = collector.run(reader, tx, cancel).await.unwrap();
        assert_eq!(stats.forwarded, 0);
    }

    #[tokio::test]
    async fn collector_fails_when_ingress_closed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let collector = LineCollector::new(CollectorConfig {
            format: InputFormat::Plain,
            ..Default::default()
        });
        let result = collector
            .run("hello\n".as_bytes(), tx, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AggregatorError::Channel(_))));
    }
}
