use std::io::Write;
use std::time::Duration;

use ralphex_core::events::EventStream;
use ralphex_core::CancelToken;

use crate::error::WebError;

const QUEUE_POLL: Duration = Duration::from_millis(500);
const HEARTBEAT_TICKS: u32 = 30;

/// Serve one server-sent-events connection from `events` until the client
/// disconnects or the run is cancelled. Queue reads use a short timeout so
/// cancellation is observed; idle connections get periodic comment
/// heartbeats so intermediaries keep the stream open.
pub fn stream_events(
    out: &mut impl Write,
    events: &EventStream,
    cancel: &CancelToken,
) -> Result<(), WebError> {
    out.write_all(
        b"HTTP/1.1 200 OK\r\n\
          Content-Type: text/event-stream\r\n\
          Cache-Control: no-cache\r\n\
          Connection: keep-alive\r\n\
          \r\n",
    )?;
    out.flush()?;

    let mut idle_ticks = 0_u32;
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        match events.recv_timeout(QUEUE_POLL) {
            Some(event) => {
                idle_ticks = 0;
                let payload = serde_json::to_string(&event)
                    .unwrap_or_else(|_| "{\"error\":\"encode\"}".to_string());
                // a client write failure just means the browser went away
                if write!(out, "data: {payload}\n\n").and_then(|()| out.flush()).is_err() {
                    return Ok(());
                }
            }
            None => {
                idle_ticks += 1;
                if idle_ticks >= HEARTBEAT_TICKS {
                    idle_ticks = 0;
                    if out.write_all(b": keep-alive\n\n").and_then(|()| out.flush()).is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}
