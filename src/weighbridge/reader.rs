use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::error::TransientReadError;
use crate::events::{CoreEvent, GatedSink};

use super::link::SerialLink;

// Set to false to silence the reader loop
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const IDLE_POLL: Duration = Duration::from_millis(10);
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 256;
/// A frame longer than this without a newline is noise, not a reading.
const MAX_PENDING_BYTES: usize = 4096;

/// Splits a raw byte stream into trimmed ASCII lines.
///
/// Bytes outside 7-bit ASCII are dropped rather than failing the line;
/// partial lines are carried across reads until their newline arrives.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8], mut on_line: impl FnMut(String)) {
        for &byte in bytes {
            if byte == b'\n' {
                if let Some(line) = decode_line(&self.pending) {
                    on_line(line);
                }
                self.pending.clear();
                continue;
            }

            if self.pending.len() >= MAX_PENDING_BYTES {
                self.pending.clear();
            }
            self.pending.push(byte);
        }
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let text: String = raw
        .iter()
        .filter(|byte| byte.is_ascii())
        .map(|&byte| byte as char)
        .collect();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub(crate) struct LineReader {
    pub link: Box<dyn SerialLink>,
    pub port: String,
    pub lines: UnboundedSender<String>,
    pub events: Arc<GatedSink>,
    pub cancel: CancellationToken,
    pub degraded_after: u32,
}

enum Poll {
    Idle,
    Data,
}

impl LineReader {
    /// Drains the link into the line queue until cancelled. Runs on a
    /// blocking thread; read errors back off and retry, they never end the loop.
    pub fn run(mut self) {
        log_info!("serial reader started on {}", self.port);

        let mut assembler = LineAssembler::new();
        let mut buf = [0u8; READ_CHUNK];
        let mut failures: u32 = 0;
        let mut degraded = false;

        while !self.cancel.is_cancelled() {
            match self.poll_once(&mut assembler, &mut buf) {
                Ok(Poll::Data) => {
                    if degraded {
                        log_info!("serial link on {} recovered", self.port);
                        self.events.emit(CoreEvent::LinkRecovered {
                            port: self.port.clone(),
                        });
                    }
                    failures = 0;
                    degraded = false;
                }
                Ok(Poll::Idle) => thread::sleep(IDLE_POLL),
                Err(err) => {
                    failures = failures.saturating_add(1);
                    log_warn!("{} on {} (attempt {failures})", err, self.port);

                    if !degraded && failures >= self.degraded_after {
                        degraded = true;
                        self.events.emit(CoreEvent::LinkDegraded {
                            port: self.port.clone(),
                            consecutive_failures: failures,
                        });
                    }
                    thread::sleep(READ_ERROR_BACKOFF);
                }
            }
        }

        log_info!("serial reader on {} shutting down", self.port);
    }

    fn poll_once(
        &mut self,
        assembler: &mut LineAssembler,
        buf: &mut [u8],
    ) -> Result<Poll, TransientReadError> {
        let available = self.link.bytes_available()?;
        if available == 0 {
            return Ok(Poll::Idle);
        }

        let want = (available as usize).min(buf.len());
        let read = match self.link.read_bytes(&mut buf[..want]) {
            Ok(read) => read,
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => return Ok(Poll::Idle),
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            return Ok(Poll::Idle);
        }

        let lines = &self.lines;
        assembler.push(&buf[..read], |line| {
            log_debug!("raw line: {line:?}");
            // The sampler is gone only during shutdown; dropping the line is fine then.
            let _ = lines.send(line);
        });
        Ok(Poll::Data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSink;
    use std::collections::VecDeque;
    use std::io;
    use tokio::sync::mpsc;

    /// Fails a fixed number of polls, then delivers its frames once.
    struct FlakyLink {
        failures_left: u32,
        frames: VecDeque<u8>,
    }

    impl SerialLink for FlakyLink {
        fn bytes_available(&mut self) -> io::Result<u32> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device busy"));
            }
            Ok(self.frames.len() as u32)
        }

        fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.frames.len());
            for (slot, byte) in buf.iter_mut().zip(self.frames.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    fn collect(assembler: &mut LineAssembler, bytes: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        assembler.push(bytes, |line| out.push(line));
        out
    }

    #[test]
    fn splits_on_newline_and_trims_carriage_returns() {
        let mut assembler = LineAssembler::new();
        let lines = collect(&mut assembler, b"ST,GS 018000kg\r\n  \r\nUS 0180\r\n");
        assert_eq!(lines, vec!["ST,GS 018000kg", "US 0180"]);
    }

    #[test]
    fn carries_partial_lines_across_reads() {
        let mut assembler = LineAssembler::new();
        assert!(collect(&mut assembler, b"0180").is_empty());
        assert_eq!(collect(&mut assembler, b"00\n"), vec!["018000"]);
    }

    #[test]
    fn drops_undecodable_bytes_instead_of_failing() {
        let mut assembler = LineAssembler::new();
        let lines = collect(&mut assembler, &[0xff, b'1', 0x80, b'2', 0xfe, b'\n']);
        assert_eq!(lines, vec!["12"]);
    }

    #[test]
    fn runaway_frames_are_discarded() {
        let mut assembler = LineAssembler::new();
        let noise = vec![b'x'; MAX_PENDING_BYTES + 10];
        assert!(collect(&mut assembler, &noise).is_empty());
        let lines = collect(&mut assembler, b"\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].len() <= MAX_PENDING_BYTES);
    }

    #[test]
    fn read_errors_back_off_then_recover() {
        let (line_tx, mut line_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn EventSink> = Arc::new(event_tx);
        let cancel = CancellationToken::new();
        let reader = LineReader {
            link: Box::new(FlakyLink {
                failures_left: 3,
                frames: b"018000\r\n".iter().copied().collect(),
            }),
            port: "COM3".into(),
            lines: line_tx,
            events: Arc::new(GatedSink::new(sink)),
            cancel: cancel.clone(),
            degraded_after: 2,
        };

        let worker = thread::spawn(move || reader.run());
        assert_eq!(line_rx.blocking_recv().as_deref(), Some("018000"));
        cancel.cancel();
        worker.join().unwrap();

        let events: Vec<CoreEvent> = std::iter::from_fn(|| event_rx.try_recv().ok()).collect();
        assert_eq!(events.len(), 2, "{events:?}");
        assert!(matches!(
            &events[0],
            CoreEvent::LinkDegraded { port, consecutive_failures: 2 } if port == "COM3"
        ));
        assert!(matches!(&events[1], CoreEvent::LinkRecovered { port } if port == "COM3"));
    }

    #[test]
    fn cancelled_reader_stops_while_idle() {
        let (line_tx, _line_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let reader = LineReader {
            link: Box::new(FlakyLink {
                failures_left: 0,
                frames: VecDeque::new(),
            }),
            port: "COM3".into(),
            lines: line_tx,
            events: Arc::new(GatedSink::new(Arc::new(crate::events::NullSink))),
            cancel: cancel.clone(),
            degraded_after: 2,
        };

        let worker = thread::spawn(move || reader.run());
        thread::sleep(Duration::from_millis(30));
        cancel.cancel();
        worker.join().unwrap();
    }
}
