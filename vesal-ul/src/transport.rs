//! Framed PDU I/O over a TCP stream, with deadlines and cooperative
//! cancellation.
//!
//! Reads run under an explicit deadline and slice the socket timeout so
//! a cancellation signal is observed within one polling interval, at
//! every suspension point.

use crate::association::{
    CancelledSnafu, Error, IoSnafu, ReadSnafu, Result, TimeoutSnafu, TimerKind,
};
use crate::pdu::{Pdu, check_body_length, read_pdu, read_pdu_header, write_pdu};
use snafu::{ResultExt, ensure};
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How often blocked reads wake up to observe cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a blocked write may stall before failing.
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// A caller-supplied cancellation signal, honoured at every suspension
/// point. Cloning shares the signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; pending operations fail with
    /// [`Error::Cancelled`] at their next suspension point.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Read exactly `buf.len()` bytes before `deadline`.
fn read_exact_deadline(
    stream: &mut TcpStream,
    buf: &mut [u8],
    deadline: Instant,
    timer: TimerKind,
    cancel: &CancelToken,
) -> Result<()> {
    let mut filled = 0;

    while filled < buf.len() {
        ensure!(!cancel.is_cancelled(), CancelledSnafu);

        let remaining = deadline
            .checked_duration_since(Instant::now())
            .ok_or(Error::Timeout { timer })?;

        stream
            .set_read_timeout(Some(remaining.min(POLL_INTERVAL)))
            .context(IoSnafu)?;

        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(Error::Disconnected),
            Ok(n) => filled += n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(e) => return Err(Error::Io { source: e }),
        }
    }

    Ok(())
}

/// Read one framed PDU: the 6-byte header, a bounds check on the
/// declared body length, then the body.
pub(crate) fn read_pdu_stream(
    stream: &mut TcpStream,
    max_pdu: u32,
    deadline: Instant,
    timer: TimerKind,
    cancel: &CancelToken,
) -> Result<Pdu> {
    let mut header = [0u8; 6];
    read_exact_deadline(stream, &mut header, deadline, timer, cancel)?;

    let (pdu_type, length) = read_pdu_header(&header).context(ReadSnafu)?;

    // The length bound is enforced before the body buffer exists.
    check_body_length(pdu_type, length, max_pdu).context(ReadSnafu)?;

    let mut body = vec![0u8; length as usize];
    read_exact_deadline(stream, &mut body, deadline, timer, cancel)?;

    read_pdu(pdu_type, &body).context(ReadSnafu)
}

/// Serialise and send one PDU.
pub(crate) fn write_pdu_stream(stream: &mut TcpStream, pdu: &Pdu) -> Result<()> {
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, pdu);

    stream
        .set_write_timeout(Some(WRITE_TIMEOUT))
        .context(IoSnafu)?;
    stream.write_all(&bytes).context(IoSnafu)?;
    stream.flush().context(IoSnafu)
}

/// Send one PDU, swallowing any failure. Used on teardown paths where
/// the abort itself is best-effort.
pub(crate) fn write_pdu_best_effort(stream: &mut TcpStream, pdu: &Pdu) {
    let _ = write_pdu_stream(stream, pdu);
}

#[cfg(test)]
mod tests {
    use super::{CancelToken, TimerKind, read_pdu_stream};
    use crate::association::Error;
    use std::net::{TcpListener, TcpStream};
    use std::time::{Duration, Instant};

    #[test]
    fn read_times_out_against_a_silent_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut stream = TcpStream::connect(addr).unwrap();
        let (_peer, _) = listener.accept().unwrap();

        let deadline = Instant::now() + Duration::from_millis(300);
        let result = read_pdu_stream(
            &mut stream,
            16384,
            deadline,
            TimerKind::Artim,
            &CancelToken::new(),
        );

        assert!(matches!(
            result,
            Err(Error::Timeout {
                timer: TimerKind::Artim
            })
        ));
    }

    #[test]
    fn cancellation_interrupts_a_read() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut stream = TcpStream::connect(addr).unwrap();
        let (_peer, _) = listener.accept().unwrap();

        let cancel = CancelToken::new();
        let canceller = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });

        let deadline = Instant::now() + Duration::from_secs(10);
        let started = Instant::now();
        let result = read_pdu_stream(&mut stream, 16384, deadline, TimerKind::Dimse, &cancel);

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));

        handle.join().unwrap();
    }
}
