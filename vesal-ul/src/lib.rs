/*!
The DICOM Upper Layer protocol: PDU encoding, the PS3.8 association
state machine, SCU and SCP orchestration, and DIMSE C-ECHO / C-STORE
message exchange over synchronous sockets.

An SCU opens an association with [`ScuOptions::connect`], runs
[`ClientAssociation::c_echo`] or [`ClientAssociation::c_store`], and
ends with [`ClientAssociation::release`]. An SCP is started with
[`Scp::start`], serving each accepted connection on its own worker
thread bounded by a counting gate, with handlers invoked per request.

Data sets are carried as opaque bytes in the transfer syntax negotiated
per presentation context; interpreting them is the business of the
data-set layer above this crate.
*/

#![forbid(unsafe_code)]

pub mod association;
pub mod dimse;
pub mod pdu;
mod transport;
pub mod uids;

pub use association::scp::{
    AssociationDecision, Scp, ScpHandlers, ScpOptions, StoreRequest,
};
pub use association::scu::{ClientAssociation, ScuOptions};
pub use association::state::{Action, Event, State, StateMachine};
pub use association::{
    AcceptedPresentationContext, Error, Result, TimerKind, validate_ae_title,
};
pub use dimse::{CommandSet, Status};
pub use transport::CancelToken;
