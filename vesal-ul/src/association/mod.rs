//! Association establishment, maintenance and teardown for both the
//! requestor (SCU) and acceptor (SCP) roles.

pub mod scp;
pub mod scu;
pub mod state;

use crate::pdu::{Abort, AbortSource, AssociateRj, ReadError};
use core::fmt;
use snafu::Snafu;

/// A presentation context agreed for the duration of an association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedPresentationContext {
    /// The session-scoped odd identifier.
    pub id: u8,
    /// The abstract syntax (SOP class) UID.
    pub abstract_syntax: String,
    /// The transfer syntax the acceptor chose.
    pub transfer_syntax: String,
}

/// Which timer a timeout error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// The TCP connection timeout.
    Connect,
    /// The association request/reject/release timer of PS3.8.
    Artim,
    /// The timer bounding one DIMSE response.
    Dimse,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connection"),
            Self::Artim => write!(f, "ARTIM"),
            Self::Dimse => write!(f, "DIMSE"),
        }
    }
}

/// Errors of the association and DIMSE layers.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("invalid options: {what}"))]
    InvalidOptions { what: &'static str },

    #[snafu(display("could not connect to {host}:{port}"))]
    Connect {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    #[snafu(display("connection to {host}:{port} timed out"))]
    ConnectTimeout { host: String, port: u16 },

    #[snafu(display("{timer} timer expired"))]
    Timeout { timer: TimerKind },

    #[snafu(display("association rejected: {rejection}"))]
    Rejected { rejection: AssociateRj },

    #[snafu(display("association aborted by peer ({source_kind:?}, reason {reason})"))]
    Aborted { source_kind: AbortSource, reason: u8 },

    #[snafu(display("unexpected {pdu} PDU in state {state:?}"))]
    UnexpectedPdu {
        pdu: &'static str,
        state: state::State,
    },

    #[snafu(display("no accepted presentation context for {uid}"))]
    NoPresentationContext { uid: String },

    #[snafu(display("malformed PDU"))]
    Read { source: ReadError },

    #[snafu(display("malformed DIMSE message: {what}"))]
    Dimse { what: &'static str },

    #[snafu(display("message exceeds the reassembly limit"))]
    MessageTooLarge,

    #[snafu(display("the peer closed the connection"))]
    Disconnected,

    #[snafu(display("I/O failure"))]
    Io { source: std::io::Error },

    #[snafu(display("operation cancelled"))]
    Cancelled,
}

impl Error {
    /// The process exit code a command-line host should surface for
    /// this error: 2 invalid argument, 64 protocol rejection, 65
    /// timeout, 66 abort received, 74 I/O failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidOptions { .. } => 2,
            Self::Rejected { .. } => 64,
            Self::ConnectTimeout { .. } | Self::Timeout { .. } => 65,
            Self::Aborted { .. } => 66,
            _ => 74,
        }
    }

    pub(crate) fn from_abort(abort: Abort) -> Self {
        Self::Aborted {
            source_kind: abort.source,
            reason: abort.reason,
        }
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// The state-machine event corresponding to the receipt of a PDU.
pub(crate) fn pdu_event(pdu: &crate::pdu::Pdu) -> state::Event {
    use crate::pdu::Pdu;
    use state::Event;

    match pdu {
        Pdu::AssociateRq(_) => Event::AssociateRqReceived,
        Pdu::AssociateAc(_) => Event::AssociateAcReceived,
        Pdu::AssociateRj(_) => Event::AssociateRjReceived,
        Pdu::PData { .. } => Event::PDataReceived,
        Pdu::ReleaseRq => Event::ReleaseRqReceived,
        Pdu::ReleaseRp => Event::ReleaseRpReceived,
        Pdu::Abort(_) => Event::AbortReceived,
    }
}

/// Validate an application entity title: 1 to 16 printable ASCII
/// characters, no backslash, not all spaces, and no leading or trailing
/// space.
pub fn validate_ae_title(title: &str) -> Result<()> {
    if title.is_empty() || title.len() > 16 {
        return InvalidOptionsSnafu {
            what: "AE title must be 1 to 16 characters",
        }
        .fail();
    }

    if !title
        .bytes()
        .all(|b| (0x20..=0x7E).contains(&b) && b != b'\\')
    {
        return InvalidOptionsSnafu {
            what: "AE title must be printable ASCII without backslash",
        }
        .fail();
    }

    if title.trim() != title || title.trim().is_empty() {
        return InvalidOptionsSnafu {
            what: "AE title must not carry leading or trailing spaces",
        }
        .fail();
    }

    Ok(())
}

/// Validate a UID: 1 to 64 characters of digits and dots.
pub(crate) fn validate_uid(uid: &str, what: &'static str) -> Result<()> {
    let valid = !uid.is_empty()
        && uid.len() <= 64
        && uid.bytes().all(|b| b.is_ascii_digit() || b == b'.')
        && !uid.starts_with('.')
        && !uid.ends_with('.');

    if valid {
        Ok(())
    } else {
        InvalidOptionsSnafu { what }.fail()
    }
}

#[cfg(test)]
mod tests {
    use super::validate_ae_title;

    #[test]
    fn ae_titles() {
        assert!(validate_ae_title("STORESCP").is_ok());
        assert!(validate_ae_title("A").is_ok());
        assert!(validate_ae_title("MY ARCHIVE 1").is_ok());

        assert!(validate_ae_title("").is_err());
        assert!(validate_ae_title("                ").is_err());
        assert!(validate_ae_title(" LEADING").is_err());
        assert!(validate_ae_title("TRAILING ").is_err());
        assert!(validate_ae_title("SEVENTEEN-CHARS-X").is_err());
        assert!(validate_ae_title("BACK\\SLASH").is_err());
        assert!(validate_ae_title("NUL\u{0}BYTE").is_err());
    }
}
