//! The DICOM Upper Layer protocol data units of PS3.8 Section 9.3 and
//! their variable items.

pub(crate) mod reader;
pub(crate) mod writer;

use core::fmt;

pub use reader::{ReadError, check_body_length, read_pdu, read_pdu_header};
pub use writer::write_pdu;

/// The smallest maximum-PDU-length a peer may advertise.
pub const MINIMUM_PDU_SIZE: u32 = 4096;
/// The absolute ceiling on any PDU body this implementation accepts.
pub const MAXIMUM_PDU_SIZE: u32 = 128 * 1024 * 1024;
/// The ceiling on association negotiation PDUs (types 1 through 3).
pub const MAXIMUM_ASSOCIATION_PDU_SIZE: u32 = 1024 * 1024;
/// The maximum-PDU-length advertised by default.
pub const DEFAULT_MAX_PDU: u32 = 16384;

/// A decoded upper-layer PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    /// A-ASSOCIATE-RQ (type 0x01).
    AssociateRq(AssociateRq),
    /// A-ASSOCIATE-AC (type 0x02).
    AssociateAc(AssociateAc),
    /// A-ASSOCIATE-RJ (type 0x03).
    AssociateRj(AssociateRj),
    /// P-DATA-TF (type 0x04).
    PData { values: Vec<Pdv> },
    /// A-RELEASE-RQ (type 0x05).
    ReleaseRq,
    /// A-RELEASE-RP (type 0x06).
    ReleaseRp,
    /// A-ABORT (type 0x07).
    Abort(Abort),
}

impl Pdu {
    /// The wire name of the PDU, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AssociateRq(_) => "A-ASSOCIATE-RQ",
            Self::AssociateAc(_) => "A-ASSOCIATE-AC",
            Self::AssociateRj(_) => "A-ASSOCIATE-RJ",
            Self::PData { .. } => "P-DATA-TF",
            Self::ReleaseRq => "A-RELEASE-RQ",
            Self::ReleaseRp => "A-RELEASE-RP",
            Self::Abort(_) => "A-ABORT",
        }
    }
}

/// An association request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociateRq {
    /// Protocol version; bit 0 identifies version 1.
    pub protocol_version: u16,
    /// The AE title of the peer being called.
    pub called_ae_title: String,
    /// The AE title of the calling peer.
    pub calling_ae_title: String,
    /// The application context name UID.
    pub application_context: String,
    /// Proposed presentation contexts.
    pub presentation_contexts: Vec<ProposedPresentationContext>,
    /// The user information item.
    pub user_info: UserInfo,
}

/// An association acceptance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociateAc {
    pub protocol_version: u16,
    /// Echo of the called AE title from the request.
    pub called_ae_title: String,
    /// Echo of the calling AE title from the request.
    pub calling_ae_title: String,
    pub application_context: String,
    /// The negotiation result per proposed presentation context.
    pub presentation_contexts: Vec<PresentationContextResult>,
    pub user_info: UserInfo,
}

/// One proposed presentation context: an odd id, an abstract syntax and
/// an ordered list of acceptable transfer syntaxes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedPresentationContext {
    pub id: u8,
    pub abstract_syntax: String,
    pub transfer_syntaxes: Vec<String>,
}

/// The negotiation outcome for one presentation context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationContextResult {
    pub id: u8,
    pub result: PresentationContextResultReason,
    /// The accepted transfer syntax; only meaningful on acceptance.
    pub transfer_syntax: String,
}

/// Result values of Table 9-18.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationContextResultReason {
    Acceptance,
    UserRejection,
    NoReason,
    AbstractSyntaxNotSupported,
    TransferSyntaxesNotSupported,
}

impl PresentationContextResultReason {
    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Acceptance),
            1 => Some(Self::UserRejection),
            2 => Some(Self::NoReason),
            3 => Some(Self::AbstractSyntaxNotSupported),
            4 => Some(Self::TransferSyntaxesNotSupported),
            _ => None,
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Acceptance => 0,
            Self::UserRejection => 1,
            Self::NoReason => 2,
            Self::AbstractSyntaxNotSupported => 3,
            Self::TransferSyntaxesNotSupported => 4,
        }
    }
}

/// The user information item (0x50) and its sub-items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// Maximum PDU length the peer is willing to receive; 0 means
    /// unlimited.
    pub max_pdu_length: u32,
    /// Implementation class UID (0x52).
    pub implementation_class_uid: String,
    /// Implementation version name (0x55), at most 16 characters.
    pub implementation_version_name: Option<String>,
    /// Unrecognized sub-items (user identity negotiation among them),
    /// preserved verbatim.
    pub other_items: Vec<RawUserItem>,
}

impl Default for UserInfo {
    fn default() -> Self {
        Self {
            max_pdu_length: DEFAULT_MAX_PDU,
            implementation_class_uid: String::new(),
            implementation_version_name: None,
            other_items: Vec::new(),
        }
    }
}

/// An opaque user-information sub-item carried through unmodified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawUserItem {
    pub item_type: u8,
    pub data: Vec<u8>,
}

/// An association rejection: result, source and a source-specific
/// reason (Table 9-21).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociateRj {
    pub result: RejectResult,
    pub source: RejectSource,
    pub reason: u8,
}

impl fmt::Display for AssociateRj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "result {:?}, source {:?}, reason {}",
            self.result, self.source, self.reason
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectResult {
    Permanent,
    Transient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectSource {
    ServiceUser,
    ServiceProviderAcse,
    ServiceProviderPresentation,
}

/// Rejection reasons when the source is the service user.
pub mod reject_reason {
    pub const NO_REASON_GIVEN: u8 = 1;
    pub const APPLICATION_CONTEXT_NOT_SUPPORTED: u8 = 2;
    pub const CALLING_AE_TITLE_NOT_RECOGNIZED: u8 = 3;
    pub const CALLED_AE_TITLE_NOT_RECOGNIZED: u8 = 7;
}

/// An A-ABORT: source and reason (Table 9-26).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abort {
    pub source: AbortSource,
    pub reason: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortSource {
    ServiceUser,
    ServiceProvider,
}

/// Abort reasons when the source is the service provider.
pub mod abort_reason {
    pub const NOT_SPECIFIED: u8 = 0;
    pub const UNRECOGNIZED_PDU: u8 = 1;
    pub const UNEXPECTED_PDU: u8 = 2;
    pub const UNRECOGNIZED_PDU_PARAMETER: u8 = 4;
    pub const UNEXPECTED_PDU_PARAMETER: u8 = 5;
    pub const INVALID_PDU_PARAMETER: u8 = 6;
}

/// One presentation data value: the fragment of a command or data set
/// carried inside a P-DATA-TF PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdv {
    /// The presentation context the fragment belongs to.
    pub context_id: u8,
    /// Bit 0 of the message control header: command vs data set.
    pub is_command: bool,
    /// Bit 1 of the message control header: last fragment.
    pub is_last: bool,
    pub data: Vec<u8>,
}

/// Variable item types of PS3.8 Section 9.3.2.
pub(crate) mod item_types {
    pub(crate) const APPLICATION_CONTEXT: u8 = 0x10;
    pub(crate) const PRESENTATION_CONTEXT_RQ: u8 = 0x20;
    pub(crate) const PRESENTATION_CONTEXT_AC: u8 = 0x21;
    pub(crate) const ABSTRACT_SYNTAX: u8 = 0x30;
    pub(crate) const TRANSFER_SYNTAX: u8 = 0x40;
    pub(crate) const USER_INFORMATION: u8 = 0x50;
    pub(crate) const MAXIMUM_LENGTH: u8 = 0x51;
    pub(crate) const IMPLEMENTATION_CLASS_UID: u8 = 0x52;
    pub(crate) const IMPLEMENTATION_VERSION_NAME: u8 = 0x55;
}

/// PDU type bytes.
pub(crate) mod pdu_types {
    pub(crate) const ASSOCIATE_RQ: u8 = 0x01;
    pub(crate) const ASSOCIATE_AC: u8 = 0x02;
    pub(crate) const ASSOCIATE_RJ: u8 = 0x03;
    pub(crate) const P_DATA_TF: u8 = 0x04;
    pub(crate) const RELEASE_RQ: u8 = 0x05;
    pub(crate) const RELEASE_RP: u8 = 0x06;
    pub(crate) const ABORT: u8 = 0x07;
}
