//! SCU and SCP exercised against each other over loopback sockets.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vesal_ul::pdu::{
    self, Pdu, Pdv, ProposedPresentationContext, read_pdu, read_pdu_header, write_pdu,
};
use vesal_ul::{
    AssociationDecision, Error, Scp, ScpHandlers, ScpOptions, ScuOptions, Status, uids,
};

fn scp_options(ae_title: &str) -> ScpOptions {
    ScpOptions {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        ae_title: ae_title.to_string(),
        artim_timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::from_secs(5),
        ..ScpOptions::default()
    }
}

fn scu_options(port: u16, called: &str) -> ScuOptions {
    let mut options = ScuOptions::new("127.0.0.1", port);
    options.called_ae_title = called.to_string();
    options.calling_ae_title = "VESAL-TEST".to_string();
    options.connection_timeout = Duration::from_secs(5);
    options.association_timeout = Duration::from_secs(5);
    options.dimse_timeout = Duration::from_secs(5);
    options
}

fn verification_context() -> ProposedPresentationContext {
    ProposedPresentationContext {
        id: 1,
        abstract_syntax: uids::VERIFICATION.to_string(),
        transfer_syntaxes: vec![uids::IMPLICIT_VR_LE.to_string()],
    }
}

#[test]
fn c_echo_round_trip() {
    let scp = Scp::start(scp_options("ECHO-SCP"), ScpHandlers::new()).unwrap();
    let port = scp.local_addr().port();

    let mut association = scu_options(port, "ECHO-SCP")
        .connect(&[verification_context()])
        .unwrap();

    assert_eq!(association.accepted_contexts().len(), 1);
    assert_eq!(
        association.accepted_contexts()[0].transfer_syntax,
        uids::IMPLICIT_VR_LE
    );

    let status = association.c_echo().unwrap();
    assert!(status.is_success());

    association.release().unwrap();
    scp.stop().unwrap();
}

#[test]
fn c_store_delivers_the_dataset() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    let handlers = ScpHandlers::new().on_c_store(move |request| {
        assert_eq!(request.sop_class_uid, uids::SECONDARY_CAPTURE_STORAGE);
        assert_eq!(request.sop_instance_uid, "1.2.3.4.5.6.7.8.9");
        assert_eq!(request.transfer_syntax, uids::IMPLICIT_VR_LE);

        *sink.lock().unwrap() = request.dataset.to_vec();
        Status::SUCCESS
    });

    let scp = Scp::start(scp_options("STORE-SCP"), handlers).unwrap();
    let port = scp.local_addr().port();

    let contexts = [ProposedPresentationContext {
        id: 1,
        abstract_syntax: uids::SECONDARY_CAPTURE_STORAGE.to_string(),
        transfer_syntaxes: vec![uids::IMPLICIT_VR_LE.to_string()],
    }];

    let mut association = scu_options(port, "STORE-SCP").connect(&contexts).unwrap();

    // Larger than the 16384-byte max PDU, so the data set must be
    // fragmented across several P-DATA-TF PDUs.
    let dataset: Vec<u8> = (0..100_000u32).map(|i| (i * 7) as u8).collect();

    let status = association
        .c_store(
            uids::SECONDARY_CAPTURE_STORAGE,
            "1.2.3.4.5.6.7.8.9",
            &dataset,
        )
        .unwrap();

    assert!(status.is_success());
    assert_eq!(*received.lock().unwrap(), dataset);

    association.release().unwrap();
    scp.stop().unwrap();
}

#[test]
fn c_store_without_a_handler_is_a900() {
    let scp = Scp::start(scp_options("NOSTORE-SCP"), ScpHandlers::new()).unwrap();
    let port = scp.local_addr().port();

    let contexts = [ProposedPresentationContext {
        id: 1,
        abstract_syntax: uids::SECONDARY_CAPTURE_STORAGE.to_string(),
        transfer_syntaxes: vec![uids::IMPLICIT_VR_LE.to_string()],
    }];

    let mut association = scu_options(port, "NOSTORE-SCP").connect(&contexts).unwrap();

    let status = association
        .c_store(uids::SECONDARY_CAPTURE_STORAGE, "1.2.3.4", &[0u8; 128])
        .unwrap();

    assert_eq!(status, Status::SOP_CLASS_NOT_SUPPORTED);

    association.release().unwrap();
    scp.stop().unwrap();
}

#[test]
fn wrong_called_ae_title_is_rejected() {
    let scp = Scp::start(scp_options("RIGHT-AE"), ScpHandlers::new()).unwrap();
    let port = scp.local_addr().port();

    let error = scu_options(port, "WRONG-AE")
        .connect(&[verification_context()])
        .unwrap_err();

    match &error {
        Error::Rejected { rejection } => {
            assert_eq!(
                rejection.reason,
                pdu::reject_reason::CALLED_AE_TITLE_NOT_RECOGNIZED
            );
        }
        other => panic!("expected a rejection, got {other}"),
    }
    assert_eq!(error.exit_code(), 64);

    scp.stop().unwrap();
}

#[test]
fn custom_association_handler_can_reject() {
    let handlers = ScpHandlers::new().on_association(|request| {
        assert_eq!(request.calling_ae_title, "VESAL-TEST");
        AssociationDecision::Reject {
            result: pdu::RejectResult::Transient,
            source: pdu::RejectSource::ServiceProviderPresentation,
            reason: 2,
        }
    });

    let scp = Scp::start(scp_options("BUSY-SCP"), handlers).unwrap();
    let port = scp.local_addr().port();

    let error = scu_options(port, "BUSY-SCP")
        .connect(&[verification_context()])
        .unwrap_err();

    match error {
        Error::Rejected { rejection } => {
            assert_eq!(rejection.result, pdu::RejectResult::Transient);
            assert_eq!(rejection.reason, 2);
        }
        other => panic!("expected a rejection, got {other}"),
    }

    scp.stop().unwrap();
}

#[test]
fn silent_peer_times_out_naming_the_endpoint() {
    // A listener that accepts nothing and answers nothing.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut options = scu_options(port, "SILENT-SCP");
    options.association_timeout = Duration::from_millis(300);

    let started = std::time::Instant::now();
    let error = options.connect(&[verification_context()]).unwrap_err();

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(error.exit_code(), 65);

    let message = format!("{error}");
    assert!(
        message.contains(&format!("127.0.0.1:{port}")),
        "timeout error must name the endpoint: {message}"
    );
}

#[test]
fn max_pdu_negotiation_takes_the_minimum() {
    for (local, remote, expected) in [
        (16384u32, 4096u32, 4096u32),
        (4096, 16384, 4096),
        (8192, 8192, 8192),
        (65536, 32768, 32768),
    ] {
        let mut options = scp_options("MAXPDU-SCP");
        options.max_pdu_length = remote;

        let scp = Scp::start(options, ScpHandlers::new()).unwrap();
        let port = scp.local_addr().port();

        let mut scu = scu_options(port, "MAXPDU-SCP");
        scu.max_pdu_length = local;

        let association = scu.connect(&[verification_context()]).unwrap();
        assert_eq!(association.negotiated_max_pdu(), expected);

        association.release().unwrap();
        scp.stop().unwrap();
    }
}

/// A bare-bones PDU peer for protocol-violation tests.
struct RawPeer {
    stream: TcpStream,
}

impl RawPeer {
    fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        Self { stream }
    }

    fn send(&mut self, pdu: &Pdu) {
        let mut bytes = Vec::new();
        write_pdu(&mut bytes, pdu);
        self.stream.write_all(&bytes).unwrap();
    }

    fn receive(&mut self) -> Pdu {
        let mut header = [0u8; 6];
        self.stream.read_exact(&mut header).unwrap();
        let (pdu_type, length) = read_pdu_header(&header).unwrap();

        let mut body = vec![0u8; length as usize];
        self.stream.read_exact(&mut body).unwrap();

        read_pdu(pdu_type, &body).unwrap()
    }

    /// Wait for the peer to close the connection.
    fn expect_close(&mut self) {
        let mut buf = [0u8; 1];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return,
                Ok(_) => continue,
                Err(e) => panic!("expected an orderly close, got {e}"),
            }
        }
    }

    fn associate(&mut self, called: &str) {
        self.send(&Pdu::AssociateRq(pdu::AssociateRq {
            protocol_version: 1,
            called_ae_title: called.to_string(),
            calling_ae_title: "RAW-PEER".to_string(),
            application_context: uids::APPLICATION_CONTEXT.to_string(),
            presentation_contexts: vec![ProposedPresentationContext {
                id: 1,
                abstract_syntax: uids::VERIFICATION.to_string(),
                transfer_syntaxes: vec![uids::IMPLICIT_VR_LE.to_string()],
            }],
            user_info: pdu::UserInfo {
                max_pdu_length: 16384,
                implementation_class_uid: "1.2.3.4".to_string(),
                implementation_version_name: None,
                other_items: Vec::new(),
            },
        }));

        match self.receive() {
            Pdu::AssociateAc(_) => {}
            other => panic!("expected an acceptance, got {}", other.name()),
        }
    }
}

#[test]
fn pdv_on_an_unaccepted_context_aborts() {
    let scp = Scp::start(scp_options("STRICT-SCP"), ScpHandlers::new()).unwrap();
    let port = scp.local_addr().port();

    let mut peer = RawPeer::connect(port);
    peer.associate("STRICT-SCP");

    // Context id 99 was never negotiated.
    peer.send(&Pdu::PData {
        values: vec![Pdv {
            context_id: 99,
            is_command: true,
            is_last: true,
            data: vec![0x00; 8],
        }],
    });

    match peer.receive() {
        Pdu::Abort(abort) => {
            assert_eq!(abort.source, pdu::AbortSource::ServiceProvider);
        }
        other => panic!("expected an abort, got {}", other.name()),
    }

    peer.expect_close();
    scp.stop().unwrap();
}

#[test]
fn non_associate_first_pdu_aborts() {
    let scp = Scp::start(scp_options("FIRST-SCP"), ScpHandlers::new()).unwrap();
    let port = scp.local_addr().port();

    let mut peer = RawPeer::connect(port);
    peer.send(&Pdu::ReleaseRq);

    match peer.receive() {
        Pdu::Abort(abort) => {
            assert_eq!(abort.source, pdu::AbortSource::ServiceProvider);
            assert_eq!(abort.reason, pdu::abort_reason::UNEXPECTED_PDU);
        }
        other => panic!("expected an abort, got {}", other.name()),
    }

    peer.expect_close();
    scp.stop().unwrap();
}

#[test]
fn oversized_pdu_is_refused() {
    let scp = Scp::start(scp_options("BOUND-SCP"), ScpHandlers::new()).unwrap();
    let port = scp.local_addr().port();

    let mut peer = RawPeer::connect(port);
    peer.associate("BOUND-SCP");

    // A P-DATA-TF header declaring a 200 MiB body, beyond the absolute
    // ceiling; the provider must give up without allocating it.
    let mut header = vec![0x04u8, 0x00];
    header.extend_from_slice(&(200u32 * 1024 * 1024).to_be_bytes());
    peer.stream.write_all(&header).unwrap();

    match peer.receive() {
        Pdu::Abort(_) => {}
        other => panic!("expected an abort, got {}", other.name()),
    }

    peer.expect_close();
    scp.stop().unwrap();
}

#[test]
fn shutdown_drains_and_counts() {
    let scp = Scp::start(scp_options("COUNT-SCP"), ScpHandlers::new()).unwrap();
    let port = scp.local_addr().port();

    for _ in 0..3 {
        let association = scu_options(port, "COUNT-SCP")
            .connect(&[verification_context()])
            .unwrap();
        association.release().unwrap();
    }

    assert!(scp.associations_served() >= 3);
    scp.stop().unwrap();
}
