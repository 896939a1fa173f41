//! The service class user role: open a TCP connection, negotiate an
//! association, run DIMSE operations, release or abort.

use super::state::{Event, StateMachine};
use super::{
    AcceptedPresentationContext, ConnectSnafu, ConnectTimeoutSnafu, Error,
    InvalidOptionsSnafu, NoPresentationContextSnafu, Result, TimerKind, validate_ae_title,
    validate_uid,
};
use crate::dimse::{self, CommandSet, Status, tags};
use crate::pdu::{
    Abort, AbortSource, AssociateRq, DEFAULT_MAX_PDU, MINIMUM_PDU_SIZE, Pdu,
    PresentationContextResultReason, ProposedPresentationContext, UserInfo, abort_reason,
};
use crate::transport::{CancelToken, read_pdu_stream, write_pdu_best_effort, write_pdu_stream};
use crate::uids;
use snafu::ResultExt;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration of an outbound association.
#[derive(Debug, Clone)]
pub struct ScuOptions {
    /// The peer host name or address.
    pub host: String,
    /// The peer port.
    pub port: u16,
    /// The AE title of the peer.
    pub called_ae_title: String,
    /// Our own AE title.
    pub calling_ae_title: String,
    /// Bound on the TCP connect.
    pub connection_timeout: Duration,
    /// The ARTIM timer bounding association establishment and release.
    pub association_timeout: Duration,
    /// Bound on the receipt of a single DIMSE response.
    pub dimse_timeout: Duration,
    /// The maximum PDU length we advertise.
    pub max_pdu_length: u32,
}

impl ScuOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            called_ae_title: "ANY-SCP".to_string(),
            calling_ae_title: "VESAL-SCU".to_string(),
            connection_timeout: Duration::from_secs(30),
            association_timeout: Duration::from_secs(30),
            dimse_timeout: Duration::from_secs(30),
            max_pdu_length: DEFAULT_MAX_PDU,
        }
    }

    fn validate(&self, contexts: &[ProposedPresentationContext]) -> Result<()> {
        validate_ae_title(&self.called_ae_title)?;
        validate_ae_title(&self.calling_ae_title)?;

        if self.port == 0 {
            return InvalidOptionsSnafu { what: "port must be nonzero" }.fail();
        }

        if self.max_pdu_length < MINIMUM_PDU_SIZE {
            return InvalidOptionsSnafu {
                what: "maximum PDU length must be at least 4096",
            }
            .fail();
        }

        for timeout in [
            self.connection_timeout,
            self.association_timeout,
            self.dimse_timeout,
        ] {
            if timeout.is_zero() {
                return InvalidOptionsSnafu { what: "timeouts must be positive" }.fail();
            }
        }

        if contexts.is_empty() {
            return InvalidOptionsSnafu {
                what: "at least one presentation context is required",
            }
            .fail();
        }

        let mut seen = [false; 256];
        for context in contexts {
            if context.id % 2 == 0 {
                return InvalidOptionsSnafu {
                    what: "presentation context ids must be odd",
                }
                .fail();
            }

            if core::mem::replace(&mut seen[context.id as usize], true) {
                return InvalidOptionsSnafu {
                    what: "presentation context ids must be unique",
                }
                .fail();
            }

            validate_uid(&context.abstract_syntax, "abstract syntax UID")?;

            if context.transfer_syntaxes.is_empty() {
                return InvalidOptionsSnafu {
                    what: "every presentation context needs a transfer syntax",
                }
                .fail();
            }

            for transfer_syntax in &context.transfer_syntaxes {
                validate_uid(transfer_syntax, "transfer syntax UID")?;
            }
        }

        Ok(())
    }

    /// Open the transport and negotiate an association.
    pub fn connect(
        &self,
        contexts: &[ProposedPresentationContext],
    ) -> Result<ClientAssociation> {
        self.connect_with_cancel(contexts, CancelToken::new())
    }

    /// Like [`ScuOptions::connect`], honouring a caller-supplied
    /// cancellation signal at every suspension point.
    pub fn connect_with_cancel(
        &self,
        contexts: &[ProposedPresentationContext],
        cancel: CancelToken,
    ) -> Result<ClientAssociation> {
        self.validate(contexts)?;

        let mut machine = StateMachine::requestor();
        machine.handle(Event::AAssociateRequest);

        let address = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .context(ConnectSnafu {
                host: self.host.clone(),
                port: self.port,
            })?
            .next()
            .ok_or_else(|| Error::Connect {
                host: self.host.clone(),
                port: self.port,
                source: io::Error::new(io::ErrorKind::AddrNotAvailable, "no address resolved"),
            })?;

        let mut stream = match TcpStream::connect_timeout(&address, self.connection_timeout) {
            Ok(stream) => stream,
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                machine.handle(Event::TransportClosed);
                return ConnectTimeoutSnafu {
                    host: self.host.clone(),
                    port: self.port,
                }
                .fail();
            }
            Err(e) => {
                machine.handle(Event::TransportClosed);
                return Err(Error::Connect {
                    host: self.host.clone(),
                    port: self.port,
                    source: e,
                });
            }
        };

        let _ = stream.set_nodelay(true);
        machine.handle(Event::TransportConnectConfirm);

        let request = AssociateRq {
            protocol_version: 1,
            called_ae_title: self.called_ae_title.clone(),
            calling_ae_title: self.calling_ae_title.clone(),
            application_context: uids::APPLICATION_CONTEXT.to_string(),
            presentation_contexts: contexts.to_vec(),
            user_info: UserInfo {
                max_pdu_length: self.max_pdu_length,
                implementation_class_uid: uids::IMPLEMENTATION_CLASS.to_string(),
                implementation_version_name: Some(uids::IMPLEMENTATION_VERSION.to_string()),
                other_items: Vec::new(),
            },
        };

        write_pdu_stream(&mut stream, &Pdu::AssociateRq(request))?;

        let deadline = Instant::now() + self.association_timeout;
        let response = match read_pdu_stream(
            &mut stream,
            self.max_pdu_length,
            deadline,
            TimerKind::Artim,
            &cancel,
        ) {
            Ok(response) => response,
            Err(Error::Timeout { .. }) => {
                // ARTIM expiry closes the transport without an abort.
                machine.handle(Event::ArtimExpired);
                return ConnectTimeoutSnafu {
                    host: self.host.clone(),
                    port: self.port,
                }
                .fail();
            }
            Err(e) => return Err(e),
        };

        match response {
            Pdu::AssociateAc(ac) => {
                machine.handle(Event::AssociateAcReceived);

                let mut accepted = Vec::new();
                for result in &ac.presentation_contexts {
                    if result.result != PresentationContextResultReason::Acceptance {
                        debug!(
                            "presentation context {} not accepted: {:?}",
                            result.id, result.result
                        );
                        continue;
                    }

                    let Some(proposed) =
                        contexts.iter().find(|context| context.id == result.id)
                    else {
                        warn!("peer accepted unknown presentation context {}", result.id);
                        continue;
                    };

                    if !proposed
                        .transfer_syntaxes
                        .contains(&result.transfer_syntax)
                    {
                        warn!(
                            "peer chose a transfer syntax we never proposed for \
                            context {}",
                            result.id
                        );
                        continue;
                    }

                    accepted.push(AcceptedPresentationContext {
                        id: result.id,
                        abstract_syntax: proposed.abstract_syntax.clone(),
                        transfer_syntax: result.transfer_syntax.clone(),
                    });
                }

                // The effective maximum is the smaller of both sides'
                // advertised values; zero means the peer left it open.
                let remote_max = ac.user_info.max_pdu_length;
                let negotiated_max_pdu = if remote_max == 0 {
                    self.max_pdu_length
                } else {
                    self.max_pdu_length.min(remote_max)
                };

                info!(
                    "association established with {}:{} ({} contexts, max PDU {})",
                    self.host,
                    self.port,
                    accepted.len(),
                    negotiated_max_pdu,
                );

                Ok(ClientAssociation {
                    stream,
                    machine,
                    options: self.clone(),
                    accepted,
                    negotiated_max_pdu,
                    cancel,
                    next_message_id: 1,
                })
            }
            Pdu::AssociateRj(rejection) => {
                machine.handle(Event::AssociateRjReceived);
                Err(Error::Rejected { rejection })
            }
            Pdu::Abort(abort) => {
                machine.handle(Event::AbortReceived);
                Err(Error::from_abort(abort))
            }
            other => {
                machine.handle(super::pdu_event(&other));
                write_pdu_best_effort(
                    &mut stream,
                    &Pdu::Abort(Abort {
                        source: AbortSource::ServiceUser,
                        reason: abort_reason::UNEXPECTED_PDU,
                    }),
                );

                Err(Error::UnexpectedPdu {
                    pdu: other.name(),
                    state: machine.state(),
                })
            }
        }
    }
}

/// An established association in the user role.
pub struct ClientAssociation {
    stream: TcpStream,
    machine: StateMachine,
    options: ScuOptions,
    accepted: Vec<AcceptedPresentationContext>,
    negotiated_max_pdu: u32,
    cancel: CancelToken,
    next_message_id: u16,
}

impl std::fmt::Debug for ClientAssociation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAssociation")
            .field("stream", &"TcpStream")
            .field("machine", &self.machine)
            .field("options", &self.options)
            .field("accepted", &self.accepted)
            .field("negotiated_max_pdu", &self.negotiated_max_pdu)
            .field("cancel", &self.cancel)
            .field("next_message_id", &self.next_message_id)
            .finish()
    }
}

impl ClientAssociation {
    /// The presentation contexts the peer accepted.
    pub fn accepted_contexts(&self) -> &[AcceptedPresentationContext] {
        &self.accepted
    }

    /// The smaller of both sides' advertised maximum PDU lengths.
    pub fn negotiated_max_pdu(&self) -> u32 {
        self.negotiated_max_pdu
    }

    fn find_context(&self, abstract_syntax: &str) -> Result<AcceptedPresentationContext> {
        self.accepted
            .iter()
            .find(|context| context.abstract_syntax == abstract_syntax)
            .cloned()
            .ok_or_else(|| {
                NoPresentationContextSnafu {
                    uid: abstract_syntax.to_string(),
                }
                .build()
            })
    }

    fn next_message_id(&mut self) -> u16 {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1).max(1);
        id
    }

    /// Issue a C-ECHO and return the status of the response.
    pub fn c_echo(&mut self) -> Result<Status> {
        let context = self.find_context(uids::VERIFICATION)?;
        let message_id = self.next_message_id();

        let command = dimse::echo_rq(message_id, uids::VERIFICATION);
        self.send_message(context.id, &command.encode(), None)?;

        let response = self.read_response(context.id, message_id)?;

        Ok(Status(
            response
                .get_u16(tags::STATUS)
                .ok_or(Error::Dimse { what: "response without a status" })?,
        ))
    }

    /// Issue a C-STORE of an encoded data set and return the status of
    /// the response.
    pub fn c_store(
        &mut self,
        sop_class_uid: &str,
        sop_instance_uid: &str,
        dataset: &[u8],
    ) -> Result<Status> {
        let context = self.find_context(sop_class_uid)?;
        let message_id = self.next_message_id();

        let command = dimse::store_rq(message_id, sop_class_uid, sop_instance_uid, 0);
        self.send_message(context.id, &command.encode(), Some(dataset))?;

        let response = self.read_response(context.id, message_id)?;

        Ok(Status(
            response
                .get_u16(tags::STATUS)
                .ok_or(Error::Dimse { what: "response without a status" })?,
        ))
    }

    /// Request an orderly release and wait for the peer's confirmation.
    pub fn release(mut self) -> Result<()> {
        self.machine.handle(Event::AReleaseRequest);
        write_pdu_stream(&mut self.stream, &Pdu::ReleaseRq)?;

        let deadline = Instant::now() + self.options.association_timeout;

        loop {
            match read_pdu_stream(
                &mut self.stream,
                self.options.max_pdu_length,
                deadline,
                TimerKind::Artim,
                &self.cancel,
            ) {
                Ok(Pdu::ReleaseRp) => {
                    self.machine.handle(Event::ReleaseRpReceived);
                    return Ok(());
                }
                // Pending data indications may still arrive while the
                // release is in flight.
                Ok(Pdu::PData { .. }) => {
                    self.machine.handle(Event::PDataReceived);
                }
                Ok(Pdu::Abort(abort)) => {
                    self.machine.handle(Event::AbortReceived);
                    return Err(Error::from_abort(abort));
                }
                Ok(other) => {
                    self.machine.handle(super::pdu_event(&other));
                    write_pdu_best_effort(
                        &mut self.stream,
                        &Pdu::Abort(Abort {
                            source: AbortSource::ServiceUser,
                            reason: abort_reason::UNEXPECTED_PDU,
                        }),
                    );
                    return Err(Error::UnexpectedPdu {
                        pdu: other.name(),
                        state: self.machine.state(),
                    });
                }
                Err(Error::Timeout { .. }) => {
                    // ARTIM expiry: close without an abort.
                    self.machine.handle(Event::ArtimExpired);
                    return Err(Error::Timeout { timer: TimerKind::Artim });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Abort the association immediately.
    pub fn abort(mut self, source: AbortSource, reason: u8) -> Result<()> {
        self.machine.handle(Event::AAbortRequest);
        write_pdu_best_effort(&mut self.stream, &Pdu::Abort(Abort { source, reason }));

        Ok(())
    }

    /// Send one command set and optional data set, fragmented so no PDU
    /// exceeds the negotiated maximum.
    fn send_message(
        &mut self,
        context_id: u8,
        command: &[u8],
        dataset: Option<&[u8]>,
    ) -> Result<()> {
        self.machine.handle(Event::PDataRequest);

        for pdv in dimse::fragment(context_id, true, command, self.negotiated_max_pdu) {
            self.check_cancelled()?;
            write_pdu_stream(&mut self.stream, &Pdu::PData { values: vec![pdv] })?;
        }

        if let Some(dataset) = dataset {
            for pdv in dimse::fragment(context_id, false, dataset, self.negotiated_max_pdu) {
                self.check_cancelled()?;
                write_pdu_stream(&mut self.stream, &Pdu::PData { values: vec![pdv] })?;
            }
        }

        Ok(())
    }

    fn check_cancelled(&mut self) -> Result<()> {
        if self.cancel.is_cancelled() {
            write_pdu_best_effort(
                &mut self.stream,
                &Pdu::Abort(Abort {
                    source: AbortSource::ServiceUser,
                    reason: abort_reason::NOT_SPECIFIED,
                }),
            );
            return Err(Error::Cancelled);
        }

        Ok(())
    }

    /// Read PDUs until the command response with the expected message id
    /// arrives on the expected presentation context.
    fn read_response(&mut self, context_id: u8, message_id: u16) -> Result<CommandSet> {
        let mut assembler = dimse::PdvAssembler::default();
        let deadline = Instant::now() + self.options.dimse_timeout;

        loop {
            match read_pdu_stream(
                &mut self.stream,
                self.options.max_pdu_length,
                deadline,
                TimerKind::Dimse,
                &self.cancel,
            ) {
                Ok(Pdu::PData { values }) => {
                    self.machine.handle(Event::PDataReceived);

                    for pdv in values {
                        let Some(message) = assembler.feed(pdv)? else {
                            continue;
                        };

                        if !message.is_command || message.context_id != context_id {
                            debug!("ignoring unexpected message fragment");
                            continue;
                        }

                        let command = CommandSet::decode(&message.data)?;

                        // Responses are matched by message id.
                        if command.get_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO)
                            != Some(message_id)
                        {
                            debug!("response for a different message id; skipping");
                            continue;
                        }

                        return Ok(command);
                    }
                }
                Ok(Pdu::Abort(abort)) => {
                    self.machine.handle(Event::AbortReceived);
                    return Err(Error::from_abort(abort));
                }
                Ok(other) => {
                    self.machine.handle(super::pdu_event(&other));
                    write_pdu_best_effort(
                        &mut self.stream,
                        &Pdu::Abort(Abort {
                            source: AbortSource::ServiceUser,
                            reason: abort_reason::UNEXPECTED_PDU,
                        }),
                    );
                    return Err(Error::UnexpectedPdu {
                        pdu: other.name(),
                        state: self.machine.state(),
                    });
                }
                Err(Error::Timeout { timer }) => {
                    // A DIMSE timeout aborts the association.
                    self.machine.handle(Event::AAbortRequest);
                    write_pdu_best_effort(
                        &mut self.stream,
                        &Pdu::Abort(Abort {
                            source: AbortSource::ServiceUser,
                            reason: abort_reason::NOT_SPECIFIED,
                        }),
                    );
                    return Err(Error::Timeout { timer });
                }
                Err(e) => return Err(e),
            }
        }
    }
}
