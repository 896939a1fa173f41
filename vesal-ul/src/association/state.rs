//! The association state machine of PS3.8 Section 9.2.
//!
//! States and events carry their standard names; the transition
//! function is total: any event with no defined transition is a
//! protocol violation that aborts the association.

/// Association states Sta1 through Sta13 (PS3.8 Table 9-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Idle, no transport connection.
    Sta1,
    /// Transport open, awaiting A-ASSOCIATE-RQ (acceptor).
    Sta2,
    /// Awaiting the local A-ASSOCIATE response primitive (acceptor).
    Sta3,
    /// Awaiting transport connection opening (requestor).
    Sta4,
    /// Awaiting A-ASSOCIATE-AC or -RJ (requestor).
    Sta5,
    /// Association established and ready for data transfer.
    Sta6,
    /// Awaiting A-RELEASE-RP (requestor).
    Sta7,
    /// Awaiting the local A-RELEASE response primitive (acceptor).
    Sta8,
    /// Release collision: requestor awaiting the local release response.
    Sta9,
    /// Release collision: acceptor awaiting A-RELEASE-RP.
    Sta10,
    /// Release collision: requestor awaiting A-RELEASE-RP.
    Sta11,
    /// Release collision: acceptor awaiting the local release response.
    Sta12,
    /// Awaiting the transport connection close.
    Sta13,
}

/// The events of PS3.8 Table 9-10, named by their triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A-ASSOCIATE request primitive (local).
    AAssociateRequest,
    /// The outbound transport connection is confirmed.
    TransportConnectConfirm,
    /// An inbound transport connection was accepted.
    TransportConnectIndication,
    /// A-ASSOCIATE-RQ PDU received.
    AssociateRqReceived,
    /// A-ASSOCIATE-AC PDU received.
    AssociateAcReceived,
    /// A-ASSOCIATE-RJ PDU received.
    AssociateRjReceived,
    /// Local acceptance of a pending association request.
    AAssociateResponseAccept,
    /// Local rejection of a pending association request.
    AAssociateResponseReject,
    /// P-DATA request primitive (local send).
    PDataRequest,
    /// P-DATA-TF PDU received.
    PDataReceived,
    /// A-RELEASE request primitive (local).
    AReleaseRequest,
    /// A-RELEASE-RQ PDU received.
    ReleaseRqReceived,
    /// A-RELEASE-RP PDU received.
    ReleaseRpReceived,
    /// A-RELEASE response primitive (local).
    AReleaseResponse,
    /// A-ABORT request primitive (local).
    AAbortRequest,
    /// A-ABORT PDU received.
    AbortReceived,
    /// The transport connection was closed by the peer.
    TransportClosed,
    /// The ARTIM timer expired.
    ArtimExpired,
    /// An unrecognizable PDU was received.
    InvalidPdu,
}

/// What the orchestrator must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing beyond the state change.
    None,
    /// Close the transport connection. No A-ABORT is issued.
    CloseTransport,
    /// Protocol violation: send A-ABORT (unexpected PDU) and await the
    /// transport close.
    SendAbort,
}

/// The state machine, parameterised over the role taken at association
/// time (the release-collision states differ between requestor and
/// acceptor).
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: State,
    requestor: bool,
}

impl StateMachine {
    /// A machine for the association requestor (SCU) role.
    pub fn requestor() -> Self {
        Self {
            state: State::Sta1,
            requestor: true,
        }
    }

    /// A machine for the association acceptor (SCP) role.
    pub fn acceptor() -> Self {
        Self {
            state: State::Sta1,
            requestor: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Apply one event. Undefined combinations abort the association:
    /// the machine moves to Sta13 and demands an A-ABORT.
    pub fn handle(&mut self, event: Event) -> Action {
        use Event::*;
        use State::*;

        let transition: Option<(State, Action)> = match (self.state, event) {
            // Establishment, requestor side.
            (Sta1, AAssociateRequest) => Some((Sta4, Action::None)),
            (Sta4, TransportConnectConfirm) => Some((Sta5, Action::None)),
            (Sta4, TransportClosed) => Some((Sta1, Action::None)),
            (Sta4, AAbortRequest) => Some((Sta1, Action::CloseTransport)),
            (Sta5, AssociateAcReceived) => Some((Sta6, Action::None)),
            (Sta5, AssociateRjReceived) => Some((Sta1, Action::CloseTransport)),

            // Establishment, acceptor side.
            (Sta1, TransportConnectIndication) => Some((Sta2, Action::None)),
            (Sta2, AssociateRqReceived) => Some((Sta3, Action::None)),
            (Sta2, ArtimExpired) => Some((Sta1, Action::CloseTransport)),
            (Sta3, AAssociateResponseAccept) => Some((Sta6, Action::None)),
            (Sta3, AAssociateResponseReject) => Some((Sta13, Action::None)),

            // Data transfer.
            (Sta6, PDataRequest) => Some((Sta6, Action::None)),
            (Sta6, PDataReceived) => Some((Sta6, Action::None)),

            // Release, requestor side.
            (Sta6, AReleaseRequest) => Some((Sta7, Action::None)),
            (Sta7, ReleaseRpReceived) => Some((Sta1, Action::CloseTransport)),
            // A release collision; the outcome depends on the role.
            (Sta7, ReleaseRqReceived) => {
                Some((if self.requestor { Sta9 } else { Sta10 }, Action::None))
            }
            (Sta7, PDataReceived) => Some((Sta7, Action::None)),
            (Sta9, AReleaseResponse) => Some((Sta11, Action::None)),
            (Sta11, ReleaseRpReceived) => Some((Sta1, Action::CloseTransport)),

            // Release, acceptor side.
            (Sta6, ReleaseRqReceived) => Some((Sta8, Action::None)),
            (Sta8, AReleaseResponse) => Some((Sta13, Action::None)),
            (Sta8, PDataRequest) => Some((Sta8, Action::None)),
            (Sta10, ReleaseRpReceived) => Some((Sta12, Action::None)),
            (Sta12, AReleaseResponse) => Some((Sta13, Action::None)),

            // Aborts and teardown, valid nearly everywhere.
            (Sta1, _) => Option::None,
            (_, AAbortRequest) => Some((Sta13, Action::SendAbort)),
            (_, AbortReceived) => Some((Sta1, Action::CloseTransport)),
            (_, TransportClosed) => Some((Sta1, Action::None)),
            (Sta13, ArtimExpired) => Some((Sta1, Action::CloseTransport)),
            // The ARTIM timer also bounds establishment and release
            // waits; expiry closes the transport without an abort.
            (Sta5 | Sta7 | Sta11, ArtimExpired) => Some((Sta1, Action::CloseTransport)),
            (Sta13, _) => Some((Sta13, Action::None)),

            _ => Option::None,
        };

        match transition {
            Some((next, action)) => {
                self.state = next;
                action
            }
            Option::None => {
                // Protocol violation: abort and await the close.
                self.state = Sta13;
                Action::SendAbort
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Action, Event, State, StateMachine};

    #[test]
    fn requestor_establishment_path() {
        let mut machine = StateMachine::requestor();
        assert_eq!(machine.state(), State::Sta1);

        assert_eq!(machine.handle(Event::AAssociateRequest), Action::None);
        assert_eq!(machine.state(), State::Sta4);

        assert_eq!(machine.handle(Event::TransportConnectConfirm), Action::None);
        assert_eq!(machine.state(), State::Sta5);

        // Receiving the acceptance in Sta5 establishes the association.
        assert_eq!(machine.handle(Event::AssociateAcReceived), Action::None);
        assert_eq!(machine.state(), State::Sta6);
    }

    #[test]
    fn artim_in_sta2_closes_without_abort() {
        let mut machine = StateMachine::acceptor();
        machine.handle(Event::TransportConnectIndication);
        assert_eq!(machine.state(), State::Sta2);

        let action = machine.handle(Event::ArtimExpired);
        assert_eq!(action, Action::CloseTransport);
        assert_eq!(machine.state(), State::Sta1);
    }

    #[test]
    fn acceptor_establishment_and_release() {
        let mut machine = StateMachine::acceptor();
        machine.handle(Event::TransportConnectIndication);
        machine.handle(Event::AssociateRqReceived);
        assert_eq!(machine.state(), State::Sta3);

        machine.handle(Event::AAssociateResponseAccept);
        assert_eq!(machine.state(), State::Sta6);

        machine.handle(Event::PDataReceived);
        machine.handle(Event::PDataRequest);
        assert_eq!(machine.state(), State::Sta6);

        machine.handle(Event::ReleaseRqReceived);
        assert_eq!(machine.state(), State::Sta8);

        machine.handle(Event::AReleaseResponse);
        assert_eq!(machine.state(), State::Sta13);

        machine.handle(Event::TransportClosed);
        assert_eq!(machine.state(), State::Sta1);
    }

    #[test]
    fn unexpected_pdu_aborts() {
        let mut machine = StateMachine::requestor();
        machine.handle(Event::AAssociateRequest);
        machine.handle(Event::TransportConnectConfirm);
        assert_eq!(machine.state(), State::Sta5);

        // A release request PDU is not legal while awaiting the AC.
        let action = machine.handle(Event::ReleaseRqReceived);
        assert_eq!(action, Action::SendAbort);
        assert_eq!(machine.state(), State::Sta13);
    }

    #[test]
    fn release_collision_requestor() {
        let mut machine = StateMachine::requestor();
        machine.handle(Event::AAssociateRequest);
        machine.handle(Event::TransportConnectConfirm);
        machine.handle(Event::AssociateAcReceived);
        machine.handle(Event::AReleaseRequest);
        assert_eq!(machine.state(), State::Sta7);

        machine.handle(Event::ReleaseRqReceived);
        assert_eq!(machine.state(), State::Sta9);

        machine.handle(Event::AReleaseResponse);
        assert_eq!(machine.state(), State::Sta11);

        let action = machine.handle(Event::ReleaseRpReceived);
        assert_eq!(action, Action::CloseTransport);
        assert_eq!(machine.state(), State::Sta1);
    }

    #[test]
    fn abort_received_closes() {
        let mut machine = StateMachine::acceptor();
        machine.handle(Event::TransportConnectIndication);
        machine.handle(Event::AssociateRqReceived);
        machine.handle(Event::AAssociateResponseAccept);

        let action = machine.handle(Event::AbortReceived);
        assert_eq!(action, Action::CloseTransport);
        assert_eq!(machine.state(), State::Sta1);
    }
}
