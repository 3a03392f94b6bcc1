use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::debug;

use amux_protocol::StreamEvent;

use crate::error::AmuxError;

/// Maximum length of a single output line (1 MiB). A child emitting a
/// longer line ends the stream with a failure instead of exhausting memory.
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Channel capacity between the reader task and the consumer. Bounded so a
/// stalled consumer applies backpressure instead of buffering unboundedly.
pub const STREAM_CHANNEL_CAPACITY: usize = 64;

const READ_BUF_SIZE: usize = 8192;

/// How a pump run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// The pipe reached EOF or errored; a terminal event was delivered
    /// (or at least attempted) and the session should be finalized.
    Finished,
    /// The consumer dropped the receiver mid-stream. The child is left
    /// alone: stream cancellation and process termination are independent.
    /// The caller should keep draining the pipe so the child is not
    /// killed by writing to a closed one.
    Cancelled,
}

/// Splits raw pipe bytes into decoded lines.
///
/// Bytes accumulate until a newline; decoding happens per complete line,
/// so a multi-byte UTF-8 sequence split across read boundaries is intact
/// by the time it is decoded. Trailing `\r` is stripped with the newline,
/// and lines that are empty after stripping are suppressed.
#[derive(Default)]
struct LineAssembler {
    partial: Vec<u8>,
}

impl LineAssembler {
    fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes; returns the complete lines it closed, in
    /// order. A decode failure is returned in place of its line so that
    /// lines completed earlier in the same chunk are still delivered
    /// before the stream fails.
    fn push(&mut self, chunk: &[u8]) -> Vec<Result<String, AmuxError>> {
        let mut out = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                match self.finish_line() {
                    Ok(Some(line)) => out.push(Ok(line)),
                    Ok(None) => {}
                    Err(e) => {
                        out.push(Err(e));
                        break;
                    }
                }
            } else if self.partial.len() >= MAX_LINE_LENGTH {
                out.push(Err(AmuxError::StreamDecode(format!(
                    "line exceeds {MAX_LINE_LENGTH} bytes"
                ))));
                break;
            } else {
                self.partial.push(byte);
            }
        }
        out
    }

    /// Close the current fragment, used both at `\n` and at EOF.
    fn finish_line(&mut self) -> Result<Option<String>, AmuxError> {
        let mut bytes = std::mem::take(&mut self.partial);
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        if bytes.is_empty() {
            return Ok(None);
        }
        let line = String::from_utf8(bytes)
            .map_err(|e| AmuxError::StreamDecode(format!("invalid utf-8 on stdout: {e}")))?;
        Ok(Some(line))
    }
}

/// Drive a child's output pipe into an event channel, line by line.
///
/// Each line is forwarded the moment its newline arrives; delivery latency
/// is bounded only by the child's own flush behavior. Exactly one terminal
/// event (`Completed` or `Failed`) ends the sequence; read and decode
/// errors are reported once and never retried.
pub async fn pump<R>(reader: &mut R, tx: mpsc::Sender<StreamEvent>) -> PumpOutcome
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_BUF_SIZE];
    let mut assembler = LineAssembler::new();

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                // EOF: deliver a trailing unterminated line, then complete.
                match assembler.finish_line() {
                    Ok(Some(line)) => {
                        if tx.send(StreamEvent::Line { line }).await.is_err() {
                            return PumpOutcome::Cancelled;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        let _ = tx
                            .send(StreamEvent::Failed {
                                message: e.to_string(),
                            })
                            .await;
                        return PumpOutcome::Finished;
                    }
                }
                let _ = tx.send(StreamEvent::Completed).await;
                debug!("stream reached end of output");
                return PumpOutcome::Finished;
            }
            Ok(n) => {
                for item in assembler.push(&buf[..n]) {
                    match item {
                        Ok(line) => {
                            if tx.send(StreamEvent::Line { line }).await.is_err() {
                                debug!("stream consumer dropped; stopping reader");
                                return PumpOutcome::Cancelled;
                            }
                        }
                        Err(e) => {
                            let _ = tx
                                .send(StreamEvent::Failed {
                                    message: e.to_string(),
                                })
                                .await;
                            return PumpOutcome::Finished;
                        }
                    }
                }
            }
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Failed {
                        message: format!("read error: {e}"),
                    })
                    .await;
                return PumpOutcome::Finished;
            }
        }
    }
}

/// Consume a pipe to EOF, discarding everything.
///
/// Used after cancellation: the pipe must stay open so the child can
/// keep writing without taking SIGPIPE, but nothing is forwarded.
pub async fn drain<R>(reader: &mut R)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn collect_lines(assembler: &mut LineAssembler, chunk: &[u8]) -> Vec<String> {
        assembler
            .push(chunk)
            .into_iter()
            .map(|item| item.unwrap())
            .collect()
    }

    #[test]
    fn splits_lines_and_strips_terminators() {
        let mut asm = LineAssembler::new();
        let lines = collect_lines(&mut asm, b"one\ntwo\r\nthree");
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(asm.finish_line().unwrap(), Some("three".to_string()));
    }

    #[test]
    fn suppresses_empty_lines() {
        let mut asm = LineAssembler::new();
        let lines = collect_lines(&mut asm, b"a\n\n\r\nb\n");
        assert_eq!(lines, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn multibyte_split_across_chunks_decodes_once() {
        // "héllo" with the é (0xC3 0xA9) split across two pushes.
        let mut asm = LineAssembler::new();
        assert!(collect_lines(&mut asm, b"h\xc3").is_empty());
        let lines = collect_lines(&mut asm, b"\xa9llo\n");
        assert_eq!(lines, vec!["héllo".to_string()]);
    }

    #[test]
    fn invalid_utf8_is_a_decode_error() {
        let mut asm = LineAssembler::new();
        let items = asm.push(b"\xff\xfe\n");
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(AmuxError::StreamDecode(_))));
    }

    #[test]
    fn lines_before_a_decode_error_survive() {
        let mut asm = LineAssembler::new();
        let items = asm.push(b"ok\n\xff\xfe\n");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "ok");
        assert!(matches!(items[1], Err(AmuxError::StreamDecode(_))));
    }

    #[test]
    fn oversized_line_is_rejected() {
        let mut asm = LineAssembler::new();
        let big = vec![b'a'; MAX_LINE_LENGTH];
        assert!(asm.push(&big).is_empty());
        let items = asm.push(b"b");
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(AmuxError::StreamDecode(_))));
    }

    #[tokio::test]
    async fn pump_delivers_lines_then_completes() {
        let (mut writer, mut reader) = tokio::io::duplex(256);
        let (tx, mut rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let handle = tokio::spawn(async move { pump(&mut reader, tx).await });

        writer.write_all(b"alpha\nbeta\n").await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Line {
                line: "alpha".to_string()
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Line {
                line: "beta".to_string()
            })
        );

        drop(writer);
        assert_eq!(rx.recv().await, Some(StreamEvent::Completed));
        assert_eq!(rx.recv().await, None);
        assert_eq!(handle.await.unwrap(), PumpOutcome::Finished);
    }

    #[tokio::test]
    async fn pump_delivers_trailing_unterminated_line_at_eof() {
        let (mut writer, mut reader) = tokio::io::duplex(256);
        let (tx, mut rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let handle = tokio::spawn(async move { pump(&mut reader, tx).await });

        writer.write_all(b"no newline").await.unwrap();
        drop(writer);

        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Line {
                line: "no newline".to_string()
            })
        );
        assert_eq!(rx.recv().await, Some(StreamEvent::Completed));
        assert_eq!(handle.await.unwrap(), PumpOutcome::Finished);
    }

    #[tokio::test]
    async fn pump_reports_decode_error_once_and_ends() {
        let (mut writer, mut reader) = tokio::io::duplex(256);
        let (tx, mut rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let handle = tokio::spawn(async move { pump(&mut reader, tx).await });

        writer.write_all(b"ok\n\xff\xfe\nmore\n").await.unwrap();
        drop(writer);

        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Line {
                line: "ok".to_string()
            })
        );
        match rx.recv().await {
            Some(StreamEvent::Failed { message }) => {
                assert!(message.contains("utf-8"), "unexpected message: {message}")
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        // Nothing after the terminal event.
        assert_eq!(rx.recv().await, None);
        assert_eq!(handle.await.unwrap(), PumpOutcome::Finished);
    }

    #[tokio::test]
    async fn pump_stops_when_consumer_drops() {
        let (mut writer, mut reader) = tokio::io::duplex(64);
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            let outcome = pump(&mut reader, tx).await;
            (outcome, reader)
        });

        drop(rx);
        writer.write_all(b"line\n").await.unwrap();

        let (outcome, mut reader) = handle.await.unwrap();
        assert_eq!(outcome, PumpOutcome::Cancelled);

        // The pipe is still open: a cancelled pump hands the reader back
        // so the writer side can keep going until EOF.
        writer.write_all(b"unwatched output\n").await.unwrap();
        drop(writer);
        drain(&mut reader).await;
    }
}
