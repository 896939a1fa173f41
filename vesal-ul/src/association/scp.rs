//! The service class provider role: a listening socket, one worker per
//! accepted connection bounded by a counting gate, association
//! negotiation, and the DIMSE request loop.

use super::state::{Event, StateMachine};
use super::{
    AcceptedPresentationContext, Error, InvalidOptionsSnafu, IoSnafu, Result, TimerKind,
    validate_ae_title,
};
use crate::dimse::{self, CommandSet, PdvAssembler, Status, commands, tags};
use crate::pdu::{
    Abort, AbortSource, AssociateAc, AssociateRj, AssociateRq, DEFAULT_MAX_PDU,
    MINIMUM_PDU_SIZE, Pdu, PresentationContextResult, PresentationContextResultReason,
    ProposedPresentationContext, RejectResult, RejectSource, UserInfo, abort_reason,
    reject_reason,
};
use crate::transport::{CancelToken, read_pdu_stream, write_pdu_best_effort, write_pdu_stream};
use crate::uids;
use snafu::ResultExt;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often the accept loop polls for new connections and shutdown.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Configuration of the listening side.
#[derive(Debug, Clone)]
pub struct ScpOptions {
    /// The address to bind, e.g. `"0.0.0.0"`.
    pub bind_address: String,
    /// The port to bind; 0 picks an ephemeral port.
    pub port: u16,
    /// Our AE title; association requests naming another called AE
    /// title are rejected.
    pub ae_title: String,
    /// Bound on concurrently served associations.
    pub max_associations: usize,
    /// The ARTIM timer bounding the first PDU and idle reads.
    pub artim_timeout: Duration,
    /// How long [`Scp::stop`] waits for workers to drain.
    pub shutdown_timeout: Duration,
    /// The maximum PDU length we advertise.
    pub max_pdu_length: u32,
}

impl Default for ScpOptions {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 104,
            ae_title: "VESAL-SCP".to_string(),
            max_associations: 100,
            artim_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            max_pdu_length: DEFAULT_MAX_PDU,
        }
    }
}

/// The outcome of the association acceptance handler.
#[derive(Debug, Clone, Copy)]
pub enum AssociationDecision {
    /// Accept the association; presentation contexts are negotiated by
    /// the server.
    Accept,
    /// Reject with the given result, source and reason.
    Reject {
        result: RejectResult,
        source: RejectSource,
        reason: u8,
    },
}

/// A reassembled C-STORE request as passed to the store handler.
#[derive(Debug)]
pub struct StoreRequest<'a> {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    /// The transfer syntax negotiated for the carrying context.
    pub transfer_syntax: String,
    /// The complete data set bytes, encoded per the transfer syntax.
    pub dataset: &'a [u8],
}

type AssociationHandler = dyn Fn(&AssociateRq) -> AssociationDecision + Send + Sync;
type EchoHandler = dyn Fn(&CommandSet) -> Status + Send + Sync;
type StoreHandler = dyn Fn(&StoreRequest<'_>) -> Status + Send + Sync;

/// The request handlers of the provider. Each is invoked once per
/// request, from the worker thread serving the association.
#[derive(Clone, Default)]
pub struct ScpHandlers {
    association: Option<Arc<AssociationHandler>>,
    echo: Option<Arc<EchoHandler>>,
    store: Option<Arc<StoreHandler>>,
}

impl ScpHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the default acceptance policy (accept when the called
    /// AE title matches).
    pub fn on_association(
        mut self,
        handler: impl Fn(&AssociateRq) -> AssociationDecision + Send + Sync + 'static,
    ) -> Self {
        self.association = Some(Arc::new(handler));
        self
    }

    /// Override the default C-ECHO handler (always success).
    pub fn on_c_echo(
        mut self,
        handler: impl Fn(&CommandSet) -> Status + Send + Sync + 'static,
    ) -> Self {
        self.echo = Some(Arc::new(handler));
        self
    }

    /// Install a C-STORE handler. Without one, C-STORE requests are
    /// answered with 0xA900 (SOP class not supported).
    pub fn on_c_store(
        mut self,
        handler: impl Fn(&StoreRequest<'_>) -> Status + Send + Sync + 'static,
    ) -> Self {
        self.store = Some(Arc::new(handler));
        self
    }
}

/// A counting gate bounding the number of concurrent workers.
#[derive(Debug)]
struct Gate {
    active: Mutex<usize>,
    released: Condvar,
    limit: usize,
}

impl Gate {
    fn new(limit: usize) -> Self {
        Self {
            active: Mutex::new(0),
            released: Condvar::new(),
            limit,
        }
    }

    /// Wait for a slot. Returns `false` if cancelled while waiting.
    fn acquire(&self, cancel: &CancelToken) -> bool {
        let mut active = self.active.lock().unwrap();

        while *active >= self.limit {
            if cancel.is_cancelled() {
                return false;
            }

            let (guard, _) = self
                .released
                .wait_timeout(active, Duration::from_millis(100))
                .unwrap();
            active = guard;
        }

        *active += 1;
        true
    }

    fn release(&self) {
        let mut active = self.active.lock().unwrap();
        *active -= 1;
        self.released.notify_one();
    }

    fn active(&self) -> usize {
        *self.active.lock().unwrap()
    }
}

/// Releases the gate slot when the worker exits, on every path.
struct GateGuard(Arc<Gate>);

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// A running provider: an accept loop plus one worker thread per open
/// association.
pub struct Scp {
    cancel: CancelToken,
    accept_thread: Option<JoinHandle<()>>,
    gate: Arc<Gate>,
    local_addr: SocketAddr,
    shutdown_timeout: Duration,
    served: Arc<AtomicUsize>,
}

impl Scp {
    /// Bind the listening socket and start accepting associations.
    pub fn start(options: ScpOptions, handlers: ScpHandlers) -> Result<Self> {
        validate_ae_title(&options.ae_title)?;

        if options.max_associations == 0 {
            return InvalidOptionsSnafu {
                what: "at least one association must be allowed",
            }
            .fail();
        }

        if options.max_pdu_length < MINIMUM_PDU_SIZE {
            return InvalidOptionsSnafu {
                what: "maximum PDU length must be at least 4096",
            }
            .fail();
        }

        if options.artim_timeout.is_zero() || options.shutdown_timeout.is_zero() {
            return InvalidOptionsSnafu { what: "timeouts must be positive" }.fail();
        }

        let listener = TcpListener::bind((options.bind_address.as_str(), options.port))
            .context(IoSnafu)?;
        listener.set_nonblocking(true).context(IoSnafu)?;
        let local_addr = listener.local_addr().context(IoSnafu)?;

        let cancel = CancelToken::new();
        let gate = Arc::new(Gate::new(options.max_associations));
        let served = Arc::new(AtomicUsize::new(0));
        let shutdown_timeout = options.shutdown_timeout;

        let accept_thread = {
            let cancel = cancel.clone();
            let gate = Arc::clone(&gate);
            let served = Arc::clone(&served);
            let options = Arc::new(options);

            thread::spawn(move || {
                accept_loop(listener, options, handlers, gate, cancel, served);
            })
        };

        info!("listening for associations on {local_addr}");

        Ok(Self {
            cancel,
            accept_thread: Some(accept_thread),
            gate,
            local_addr,
            shutdown_timeout,
            served,
        })
    }

    /// The bound address, useful when an ephemeral port was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The number of associations served so far.
    pub fn associations_served(&self) -> usize {
        self.served.load(Ordering::Relaxed)
    }

    /// Stop accepting, signal the workers, and wait up to the shutdown
    /// timeout for them to drain.
    pub fn stop(mut self) -> Result<()> {
        self.cancel.cancel();

        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }

        let deadline = Instant::now() + self.shutdown_timeout;
        while self.gate.active() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }

        if self.gate.active() > 0 {
            warn!("workers still running after the shutdown timeout");
        }

        Ok(())
    }
}

impl Drop for Scp {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn accept_loop(
    listener: TcpListener,
    options: Arc<ScpOptions>,
    handlers: ScpHandlers,
    gate: Arc<Gate>,
    cancel: CancelToken,
    served: Arc<AtomicUsize>,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        match listener.accept() {
            Ok((stream, peer)) => {
                if !gate.acquire(&cancel) {
                    break;
                }

                debug!("accepted connection from {peer}");
                served.fetch_add(1, Ordering::Relaxed);

                let guard = GateGuard(Arc::clone(&gate));
                let options = Arc::clone(&options);
                let handlers = handlers.clone();
                let cancel = cancel.clone();

                thread::spawn(move || {
                    let _guard = guard;

                    if let Err(e) = serve_association(stream, &options, &handlers, &cancel) {
                        debug!("association with {peer} ended with an error: {e}");
                    }
                });
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                warn!("failed to accept a connection: {e}");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

/// Serve one association on its own worker thread, from the first PDU
/// to transport close.
fn serve_association(
    mut stream: TcpStream,
    options: &ScpOptions,
    handlers: &ScpHandlers,
    cancel: &CancelToken,
) -> Result<()> {
    let _ = stream.set_nodelay(true);

    let mut machine = StateMachine::acceptor();
    machine.handle(Event::TransportConnectIndication);

    // The first PDU must arrive within the ARTIM window and must be an
    // association request.
    let deadline = Instant::now() + options.artim_timeout;
    let request = match read_pdu_stream(
        &mut stream,
        options.max_pdu_length,
        deadline,
        TimerKind::Artim,
        cancel,
    ) {
        Ok(Pdu::AssociateRq(request)) => request,
        Ok(other) => {
            machine.handle(super::pdu_event(&other));
            write_pdu_best_effort(
                &mut stream,
                &Pdu::Abort(Abort {
                    source: AbortSource::ServiceProvider,
                    reason: abort_reason::UNEXPECTED_PDU,
                }),
            );
            return Ok(());
        }
        Err(Error::Timeout { .. }) => {
            // ARTIM expiry in Sta2: close the transport, no abort.
            machine.handle(Event::ArtimExpired);
            return Ok(());
        }
        Err(Error::Disconnected) => {
            machine.handle(Event::TransportClosed);
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    machine.handle(Event::AssociateRqReceived);

    let decision = match &handlers.association {
        Some(handler) => handler(&request),
        None => default_association_decision(&request, options),
    };

    let (result, source, reason) = match decision {
        AssociationDecision::Accept => {
            return accept_association(
                stream, machine, request, options, handlers, cancel,
            );
        }
        AssociationDecision::Reject {
            result,
            source,
            reason,
        } => (result, source, reason),
    };

    machine.handle(Event::AAssociateResponseReject);
    write_pdu_stream(
        &mut stream,
        &Pdu::AssociateRj(AssociateRj {
            result,
            source,
            reason,
        }),
    )?;

    Ok(())
}

/// The default acceptance policy: the called AE title must match ours.
fn default_association_decision(
    request: &AssociateRq,
    options: &ScpOptions,
) -> AssociationDecision {
    if request.called_ae_title != options.ae_title {
        return AssociationDecision::Reject {
            result: RejectResult::Permanent,
            source: RejectSource::ServiceUser,
            reason: reject_reason::CALLED_AE_TITLE_NOT_RECOGNIZED,
        };
    }

    AssociationDecision::Accept
}

/// Choose the transfer syntax for one proposed context: Implicit VR
/// Little Endian when offered, the first proposal otherwise.
fn negotiate_context(proposed: &ProposedPresentationContext) -> PresentationContextResult {
    if proposed.id % 2 == 0 {
        return PresentationContextResult {
            id: proposed.id,
            result: PresentationContextResultReason::NoReason,
            transfer_syntax: String::new(),
        };
    }

    let transfer_syntax = proposed
        .transfer_syntaxes
        .iter()
        .find(|ts| *ts == uids::IMPLICIT_VR_LE)
        .or_else(|| proposed.transfer_syntaxes.first())
        .cloned();

    match transfer_syntax {
        Some(transfer_syntax) => PresentationContextResult {
            id: proposed.id,
            result: PresentationContextResultReason::Acceptance,
            transfer_syntax,
        },
        None => PresentationContextResult {
            id: proposed.id,
            result: PresentationContextResultReason::TransferSyntaxesNotSupported,
            transfer_syntax: String::new(),
        },
    }
}

fn accept_association(
    mut stream: TcpStream,
    mut machine: StateMachine,
    request: AssociateRq,
    options: &ScpOptions,
    handlers: &ScpHandlers,
    cancel: &CancelToken,
) -> Result<()> {
    let results: Vec<PresentationContextResult> = request
        .presentation_contexts
        .iter()
        .map(negotiate_context)
        .collect();

    let accepted: Vec<AcceptedPresentationContext> = results
        .iter()
        .filter(|result| result.result == PresentationContextResultReason::Acceptance)
        .filter_map(|result| {
            let proposed = request
                .presentation_contexts
                .iter()
                .find(|context| context.id == result.id)?;

            Some(AcceptedPresentationContext {
                id: result.id,
                abstract_syntax: proposed.abstract_syntax.clone(),
                transfer_syntax: result.transfer_syntax.clone(),
            })
        })
        .collect();

    let acceptance = AssociateAc {
        protocol_version: 1,
        called_ae_title: request.called_ae_title.clone(),
        calling_ae_title: request.calling_ae_title.clone(),
        application_context: request.application_context.clone(),
        presentation_contexts: results,
        user_info: UserInfo {
            max_pdu_length: options.max_pdu_length,
            implementation_class_uid: uids::IMPLEMENTATION_CLASS.to_string(),
            implementation_version_name: Some(uids::IMPLEMENTATION_VERSION.to_string()),
            other_items: Vec::new(),
        },
    };

    machine.handle(Event::AAssociateResponseAccept);
    write_pdu_stream(&mut stream, &Pdu::AssociateAc(acceptance))?;

    // Responses must never exceed the peer's advertised maximum.
    let remote_max = request.user_info.max_pdu_length;
    let send_max = if remote_max == 0 {
        options.max_pdu_length
    } else {
        options.max_pdu_length.min(remote_max)
    };

    info!(
        "association established with {} ({} contexts accepted)",
        request.calling_ae_title,
        accepted.len(),
    );

    dimse_loop(
        &mut stream,
        &mut machine,
        &accepted,
        send_max,
        options,
        handlers,
        cancel,
    )
}

/// The established-phase loop: reassemble messages from P-DATA-TF PDUs
/// and dispatch C-ECHO and C-STORE requests until release, abort or
/// teardown.
fn dimse_loop(
    stream: &mut TcpStream,
    machine: &mut StateMachine,
    accepted: &[AcceptedPresentationContext],
    send_max: u32,
    options: &ScpOptions,
    handlers: &ScpHandlers,
    cancel: &CancelToken,
) -> Result<()> {
    let mut assembler = PdvAssembler::default();
    // A C-STORE command awaiting its data set, keyed by context id.
    let mut pending_store: Option<(CommandSet, u8)> = None;

    loop {
        let deadline = Instant::now() + options.artim_timeout;

        let pdu = match read_pdu_stream(
            stream,
            options.max_pdu_length,
            deadline,
            TimerKind::Artim,
            cancel,
        ) {
            Ok(pdu) => pdu,
            Err(Error::Timeout { .. }) | Err(Error::Cancelled) => {
                machine.handle(Event::AAbortRequest);
                write_pdu_best_effort(
                    stream,
                    &Pdu::Abort(Abort {
                        source: AbortSource::ServiceProvider,
                        reason: abort_reason::NOT_SPECIFIED,
                    }),
                );
                return Ok(());
            }
            Err(Error::Disconnected) => {
                machine.handle(Event::TransportClosed);
                return Ok(());
            }
            Err(e) => {
                machine.handle(Event::InvalidPdu);
                write_pdu_best_effort(
                    stream,
                    &Pdu::Abort(Abort {
                        source: AbortSource::ServiceProvider,
                        reason: abort_reason::UNRECOGNIZED_PDU,
                    }),
                );
                return Err(e);
            }
        };

        match pdu {
            Pdu::PData { values } => {
                machine.handle(Event::PDataReceived);

                for pdv in values {
                    // A PDV naming a context that was never accepted is
                    // a protocol violation.
                    if !accepted.iter().any(|context| context.id == pdv.context_id) {
                        machine.handle(Event::AAbortRequest);
                        write_pdu_best_effort(
                            stream,
                            &Pdu::Abort(Abort {
                                source: AbortSource::ServiceProvider,
                                reason: abort_reason::UNEXPECTED_PDU_PARAMETER,
                            }),
                        );
                        return Ok(());
                    }

                    let Some(message) = assembler.feed(pdv)? else {
                        continue;
                    };

                    if message.is_command {
                        let command = CommandSet::decode(&message.data)?;

                        match command.command_field() {
                            Some(commands::C_ECHO_RQ) => {
                                let status = match &handlers.echo {
                                    Some(handler) => handler(&command),
                                    None => Status::SUCCESS,
                                };

                                let response = dimse::echo_rsp(&command, status);
                                send_response(
                                    stream,
                                    machine,
                                    message.context_id,
                                    &response,
                                    send_max,
                                )?;
                            }
                            Some(commands::C_STORE_RQ) => {
                                if command.has_data_set() {
                                    pending_store = Some((command, message.context_id));
                                } else {
                                    let response = dimse::store_rsp(
                                        &command,
                                        Status::PROCESSING_FAILURE,
                                    );
                                    send_response(
                                        stream,
                                        machine,
                                        message.context_id,
                                        &response,
                                        send_max,
                                    )?;
                                }
                            }
                            Some(field) if field & 0x8000 == 0 => {
                                // An operation this provider does not
                                // implement.
                                let mut response = CommandSet::new();
                                response.put_u16(tags::COMMAND_FIELD, field | 0x8000);
                                response.put_u16(
                                    tags::MESSAGE_ID_BEING_RESPONDED_TO,
                                    command.get_u16(tags::MESSAGE_ID).unwrap_or(0),
                                );
                                response
                                    .put_u16(tags::COMMAND_DATA_SET_TYPE, dimse::NO_DATA_SET);
                                response.put_u16(
                                    tags::STATUS,
                                    Status::UNRECOGNIZED_OPERATION.0,
                                );

                                send_response(
                                    stream,
                                    machine,
                                    message.context_id,
                                    &response,
                                    send_max,
                                )?;
                            }
                            _ => {
                                machine.handle(Event::AAbortRequest);
                                write_pdu_best_effort(
                                    stream,
                                    &Pdu::Abort(Abort {
                                        source: AbortSource::ServiceProvider,
                                        reason: abort_reason::INVALID_PDU_PARAMETER,
                                    }),
                                );
                                return Ok(());
                            }
                        }
                    } else {
                        // A completed data set; it belongs to the
                        // pending C-STORE on the same context.
                        let Some((command, _)) = pending_store
                            .take_if(|(_, context_id)| *context_id == message.context_id)
                        else {
                            warn!("discarding a data set no command asked for");
                            continue;
                        };

                        let context = accepted
                            .iter()
                            .find(|context| context.id == message.context_id)
                            .expect("context id checked on arrival");

                        let store_request = StoreRequest {
                            sop_class_uid: command
                                .get_uid(tags::AFFECTED_SOP_CLASS_UID)
                                .unwrap_or_default()
                                .to_string(),
                            sop_instance_uid: command
                                .get_uid(tags::AFFECTED_SOP_INSTANCE_UID)
                                .unwrap_or_default()
                                .to_string(),
                            transfer_syntax: context.transfer_syntax.clone(),
                            dataset: &message.data,
                        };

                        let status = match &handlers.store {
                            Some(handler) => handler(&store_request),
                            None => Status::SOP_CLASS_NOT_SUPPORTED,
                        };

                        let response = dimse::store_rsp(&command, status);
                        send_response(stream, machine, message.context_id, &response, send_max)?;
                    }
                }
            }
            Pdu::ReleaseRq => {
                machine.handle(Event::ReleaseRqReceived);
                machine.handle(Event::AReleaseResponse);
                write_pdu_stream(stream, &Pdu::ReleaseRp)?;
                machine.handle(Event::TransportClosed);

                return Ok(());
            }
            Pdu::Abort(_) => {
                machine.handle(Event::AbortReceived);
                return Ok(());
            }
            other => {
                machine.handle(super::pdu_event(&other));
                write_pdu_best_effort(
                    stream,
                    &Pdu::Abort(Abort {
                        source: AbortSource::ServiceProvider,
                        reason: abort_reason::UNEXPECTED_PDU,
                    }),
                );

                return Ok(());
            }
        }
    }
}

fn send_response(
    stream: &mut TcpStream,
    machine: &mut StateMachine,
    context_id: u8,
    response: &CommandSet,
    send_max: u32,
) -> Result<()> {
    machine.handle(Event::PDataRequest);

    for pdv in dimse::fragment(context_id, true, &response.encode(), send_max) {
        write_pdu_stream(stream, &Pdu::PData { values: vec![pdv] })?;
    }

    Ok(())
}
