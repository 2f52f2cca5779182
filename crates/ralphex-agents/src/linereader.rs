use std::io::{self, BufRead, BufReader, Read};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use ralphex_core::CancelToken;

use crate::error::AgentError;
use crate::types::ChildProcess;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Dedicated reader thread over a child's stream. The thread blocks in the
/// kernel read; consumers drain its queue without ever blocking themselves,
/// which is what lets cancellation kill the child out from under it.
pub struct LineReader {
    rx: mpsc::Receiver<String>,
    handle: thread::JoinHandle<Result<(), AgentError>>,
}

impl LineReader {
    /// Spawn the reader. It reads until EOF with no line length limit,
    /// strips exactly one trailing `\r\n`, `\n`, or bare `\r` per line
    /// (embedded `\r` preserved), and queues each line.
    pub fn spawn(stream: Box<dyn Read + Send>) -> Self {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut buf: Vec<u8> = Vec::new();
            loop {
                buf.clear();
                let n = reader
                    .read_until(b'\n', &mut buf)
                    .map_err(|source| AgentError::Stream { source })?;
                if n == 0 {
                    return Ok(());
                }
                let line = String::from_utf8_lossy(&buf);
                if tx.send(trim_line_ending(&line).to_string()).is_err() {
                    // consumer went away; no point reading further
                    return Ok(());
                }
            }
        });
        Self { rx, handle }
    }

    /// Next queued line, without blocking.
    pub fn try_next(&self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Join the reader thread and deliver everything it queued before EOF.
    pub fn finish(self, mut on_line: impl FnMut(&str)) -> Result<(), AgentError> {
        let result = match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(AgentError::Stream {
                source: io::Error::new(io::ErrorKind::Other, "line reader thread panicked"),
            }),
        };
        while let Ok(line) = self.rx.try_recv() {
            on_line(&line);
        }
        result
    }
}

/// Consume a child's stream line by line, calling `on_line` for each line.
///
/// The blocking reads happen on a [`LineReader`] thread; this thread only
/// polls: drain queued lines, check the cancellation token, check child
/// exit, sleep. On cancellation the child is killed immediately — that is
/// what unblocks a reader parked on a silent child — the lines that already
/// arrived still reach `on_line`, and [`AgentError::Cancelled`] is returned.
pub fn stream_lines(
    cancel: &CancelToken,
    child: &mut Box<dyn ChildProcess>,
    mut on_line: impl FnMut(&str),
) -> Result<(), AgentError> {
    let stream = child.take_stream().ok_or_else(|| AgentError::Stream {
        source: io::Error::new(io::ErrorKind::BrokenPipe, "child has no stream"),
    })?;
    let reader = LineReader::spawn(stream);

    let exited = loop {
        while let Some(line) = reader.try_next() {
            on_line(&line);
        }
        if cancel.is_cancelled() {
            break false;
        }
        match child.try_wait() {
            Ok(true) => break true,
            Ok(false) => {}
            Err(err) => {
                child.kill();
                let _ = reader.finish(&mut on_line);
                return Err(err);
            }
        }
        cancel.sleep(POLL_INTERVAL);
    };

    if !exited {
        // cancelled while the child still runs: kill it so the reader's
        // blocked read returns, then surface the partial output
        child.kill();
        let _ = child.wait();
        let _ = reader.finish(&mut on_line);
        return Err(AgentError::Cancelled);
    }

    // child exited on its own: the reader drains the remaining buffered
    // output and hits EOF
    let read_result = reader.finish(&mut on_line);

    if let Err(err) = child.wait() {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        return Err(err);
    }
    read_result
}

/// Strip exactly one trailing line terminator: `\r\n`, `\n`, or a bare `\r`
/// (which appears when the stream ends without a newline). Embedded `\r`
/// characters in the content are preserved.
pub fn trim_line_ending(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut end = bytes.len();
    if end > 0 && bytes[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && bytes[end - 1] == b'\r' {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use ralphex_core::CancelToken;

    use super::{stream_lines, trim_line_ending, LineReader};
    use crate::error::AgentError;
    use crate::types::test_support::FakeRunner;
    use crate::types::{CommandRunner, StreamChannel};

    fn collect(input: &str) -> Vec<String> {
        let reader = LineReader::spawn(Box::new(Cursor::new(input.as_bytes().to_vec())));
        let mut lines = Vec::new();
        reader
            .finish(|line| lines.push(line.to_string()))
            .expect("finish reader");
        lines
    }

    #[test]
    fn reads_basic_multi_line_input() {
        assert_eq!(
            collect("line one\nline two\nline three\n"),
            vec!["line one", "line two", "line three"]
        );
    }

    #[test]
    fn handles_windows_line_endings() {
        assert_eq!(collect("line one\r\nline two\r\n"), vec!["line one", "line two"]);
    }

    #[test]
    fn delivers_final_line_without_newline() {
        assert_eq!(collect("line one\nline two"), vec!["line one", "line two"]);
    }

    #[test]
    fn preserves_empty_lines() {
        assert_eq!(collect("first\n\n\nlast\n"), vec!["first", "", "", "last"]);
    }

    #[test]
    fn empty_input_produces_no_lines() {
        assert!(collect("").is_empty());
    }

    #[test]
    fn single_line_without_newline() {
        assert_eq!(collect("hello"), vec!["hello"]);
    }

    #[test]
    fn preserves_embedded_carriage_returns() {
        assert_eq!(collect("data\r\r\n"), vec!["data\r"]);
    }

    #[test]
    fn handles_lines_larger_than_any_fixed_buffer() {
        let size = 4 * 1024 * 1024;
        let large = "x".repeat(size);
        let input = format!("{large}\nshort\n");

        let lines = collect(&input);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), size);
        assert_eq!(lines[1], "short");
    }

    #[test]
    fn mixed_json_and_plain_content_round_trips() {
        let input = "{\"type\":\"event\"}\n\nplain text\n{\"type\":\"delta\",\"text\":\"hello\"}\n";
        assert_eq!(
            collect(input),
            vec![
                "{\"type\":\"event\"}",
                "",
                "plain text",
                "{\"type\":\"delta\",\"text\":\"hello\"}"
            ]
        );
    }

    #[test]
    fn stream_lines_delivers_lines_until_child_exit() {
        let runner = FakeRunner::with_stream("one\ntwo\n");
        let mut child = runner
            .start("cmd", &[], None, StreamChannel::Stdout)
            .expect("start fake child");

        let mut lines = Vec::new();
        stream_lines(&CancelToken::new(), &mut child, |line| {
            lines.push(line.to_string());
        })
        .expect("stream lines");

        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn stream_lines_on_cancellation_keeps_partial_output() {
        let cancel = CancelToken::new();
        cancel.cancel();

        let runner = FakeRunner::with_stream("partial\n");
        let mut child = runner
            .start("cmd", &[], None, StreamChannel::Stdout)
            .expect("start fake child");

        let mut lines = Vec::new();
        let err = stream_lines(&cancel, &mut child, |line| {
            lines.push(line.to_string());
        })
        .expect_err("cancelled");

        assert!(matches!(err, AgentError::Cancelled));
        // everything the reader managed to queue is still delivered
        assert_eq!(lines, vec!["partial"]);
    }

    #[test]
    fn trim_line_ending_semantics() {
        let cases = [
            ("hello\n", "hello"),
            ("hello\r\n", "hello"),
            ("hello", "hello"),
            ("", ""),
            ("\n", ""),
            ("\r\n", ""),
            ("data\r\r\n", "data\r"),
            ("data\r\r\r\n", "data\r\r"),
            ("data\r", "data"),
            ("\r", ""),
        ];
        for (input, expected) in cases {
            assert_eq!(trim_line_ending(input), expected, "input {input:?}");
        }
    }
}
