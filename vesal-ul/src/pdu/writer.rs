//! PDU serialisation over [`bytes::BufMut`].

use super::*;
use bytes::BufMut;

/// Append a length-prefixed chunk: a big-endian u32 length followed by
/// whatever `fill` writes.
fn write_chunk_u32(out: &mut Vec<u8>, fill: impl FnOnce(&mut Vec<u8>)) {
    let mut chunk = Vec::new();
    fill(&mut chunk);

    out.put_u32(chunk.len() as u32);
    out.extend_from_slice(&chunk);
}

/// Append a length-prefixed chunk with a big-endian u16 length.
fn write_chunk_u16(out: &mut Vec<u8>, fill: impl FnOnce(&mut Vec<u8>)) {
    let mut chunk = Vec::new();
    fill(&mut chunk);

    out.put_u16(chunk.len() as u16);
    out.extend_from_slice(&chunk);
}

/// Append an AE title padded with spaces to 16 bytes.
fn write_ae_title(out: &mut Vec<u8>, title: &str) {
    let mut bytes = title.as_bytes().to_vec();
    bytes.resize(16, b' ');
    out.extend_from_slice(&bytes[..16]);
}

/// Serialise a PDU, header included.
pub fn write_pdu(out: &mut Vec<u8>, pdu: &Pdu) {
    match pdu {
        Pdu::AssociateRq(rq) => {
            out.put_u8(pdu_types::ASSOCIATE_RQ);
            out.put_u8(0x00);

            write_chunk_u32(out, |out| {
                out.put_u16(rq.protocol_version);
                out.put_u16(0x0000);
                write_ae_title(out, &rq.called_ae_title);
                write_ae_title(out, &rq.calling_ae_title);
                out.extend_from_slice(&[0u8; 32]);

                write_application_context(out, &rq.application_context);

                for context in &rq.presentation_contexts {
                    write_presentation_context_rq(out, context);
                }

                write_user_info(out, &rq.user_info);
            });
        }
        Pdu::AssociateAc(ac) => {
            out.put_u8(pdu_types::ASSOCIATE_AC);
            out.put_u8(0x00);

            write_chunk_u32(out, |out| {
                out.put_u16(ac.protocol_version);
                out.put_u16(0x0000);
                // Formally reserved; echoes the titles from the request.
                write_ae_title(out, &ac.called_ae_title);
                write_ae_title(out, &ac.calling_ae_title);
                out.extend_from_slice(&[0u8; 32]);

                write_application_context(out, &ac.application_context);

                for context in &ac.presentation_contexts {
                    write_presentation_context_ac(out, context);
                }

                write_user_info(out, &ac.user_info);
            });
        }
        Pdu::AssociateRj(rj) => {
            out.put_u8(pdu_types::ASSOCIATE_RJ);
            out.put_u8(0x00);

            write_chunk_u32(out, |out| {
                out.put_u8(0x00);
                out.put_u8(match rj.result {
                    RejectResult::Permanent => 1,
                    RejectResult::Transient => 2,
                });
                out.put_u8(match rj.source {
                    RejectSource::ServiceUser => 1,
                    RejectSource::ServiceProviderAcse => 2,
                    RejectSource::ServiceProviderPresentation => 3,
                });
                out.put_u8(rj.reason);
            });
        }
        Pdu::PData { values } => {
            out.put_u8(pdu_types::P_DATA_TF);
            out.put_u8(0x00);

            write_chunk_u32(out, |out| {
                for pdv in values {
                    write_chunk_u32(out, |out| {
                        out.put_u8(pdv.context_id);

                        let mut control = 0x00;
                        if pdv.is_command {
                            control |= 0x01;
                        }
                        if pdv.is_last {
                            control |= 0x02;
                        }
                        out.put_u8(control);

                        out.extend_from_slice(&pdv.data);
                    });
                }
            });
        }
        Pdu::ReleaseRq => {
            out.put_u8(pdu_types::RELEASE_RQ);
            out.put_u8(0x00);

            write_chunk_u32(out, |out| {
                out.extend_from_slice(&[0u8; 4]);
            });
        }
        Pdu::ReleaseRp => {
            out.put_u8(pdu_types::RELEASE_RP);
            out.put_u8(0x00);

            write_chunk_u32(out, |out| {
                out.extend_from_slice(&[0u8; 4]);
            });
        }
        Pdu::Abort(abort) => {
            out.put_u8(pdu_types::ABORT);
            out.put_u8(0x00);

            write_chunk_u32(out, |out| {
                out.put_u16(0x0000);
                out.put_u8(match abort.source {
                    AbortSource::ServiceUser => 0,
                    AbortSource::ServiceProvider => 2,
                });
                out.put_u8(abort.reason);
            });
        }
    }
}

fn write_application_context(out: &mut Vec<u8>, name: &str) {
    out.put_u8(item_types::APPLICATION_CONTEXT);
    out.put_u8(0x00);

    write_chunk_u16(out, |out| {
        out.extend_from_slice(name.as_bytes());
    });
}

fn write_presentation_context_rq(out: &mut Vec<u8>, context: &ProposedPresentationContext) {
    out.put_u8(item_types::PRESENTATION_CONTEXT_RQ);
    out.put_u8(0x00);

    write_chunk_u16(out, |out| {
        out.put_u8(context.id);
        out.extend_from_slice(&[0u8; 3]);

        // One abstract syntax sub-item, then one or more transfer
        // syntaxes.
        out.put_u8(item_types::ABSTRACT_SYNTAX);
        out.put_u8(0x00);
        write_chunk_u16(out, |out| {
            out.extend_from_slice(context.abstract_syntax.as_bytes());
        });

        for transfer_syntax in &context.transfer_syntaxes {
            out.put_u8(item_types::TRANSFER_SYNTAX);
            out.put_u8(0x00);
            write_chunk_u16(out, |out| {
                out.extend_from_slice(transfer_syntax.as_bytes());
            });
        }
    });
}

fn write_presentation_context_ac(out: &mut Vec<u8>, context: &PresentationContextResult) {
    out.put_u8(item_types::PRESENTATION_CONTEXT_AC);
    out.put_u8(0x00);

    write_chunk_u16(out, |out| {
        out.put_u8(context.id);
        out.put_u8(0x00);
        out.put_u8(context.result.to_u8());
        out.put_u8(0x00);

        // Exactly one transfer syntax sub-item; not significant unless
        // the context was accepted.
        out.put_u8(item_types::TRANSFER_SYNTAX);
        out.put_u8(0x00);
        write_chunk_u16(out, |out| {
            out.extend_from_slice(context.transfer_syntax.as_bytes());
        });
    });
}

fn write_user_info(out: &mut Vec<u8>, info: &UserInfo) {
    out.put_u8(item_types::USER_INFORMATION);
    out.put_u8(0x00);

    write_chunk_u16(out, |out| {
        out.put_u8(item_types::MAXIMUM_LENGTH);
        out.put_u8(0x00);
        write_chunk_u16(out, |out| {
            out.put_u32(info.max_pdu_length);
        });

        if !info.implementation_class_uid.is_empty() {
            out.put_u8(item_types::IMPLEMENTATION_CLASS_UID);
            out.put_u8(0x00);
            write_chunk_u16(out, |out| {
                out.extend_from_slice(info.implementation_class_uid.as_bytes());
            });
        }

        if let Some(version_name) = &info.implementation_version_name {
            out.put_u8(item_types::IMPLEMENTATION_VERSION_NAME);
            out.put_u8(0x00);
            write_chunk_u16(out, |out| {
                out.extend_from_slice(version_name.as_bytes());
            });
        }

        for item in &info.other_items {
            out.put_u8(item.item_type);
            out.put_u8(0x00);
            write_chunk_u16(out, |out| {
                out.extend_from_slice(&item.data);
            });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::super::*;

    fn round_trip(pdu: &Pdu) {
        let mut bytes = Vec::new();
        write_pdu(&mut bytes, pdu);

        let header: [u8; 6] = bytes[..6].try_into().unwrap();
        let (pdu_type, length) = read_pdu_header(&header).unwrap();

        assert_eq!(length as usize, bytes.len() - 6);

        let parsed = read_pdu(pdu_type, &bytes[6..]).unwrap();
        assert_eq!(&parsed, pdu);
    }

    fn sample_user_info() -> UserInfo {
        UserInfo {
            max_pdu_length: 16384,
            implementation_class_uid: "1.2.3.4.5".into(),
            implementation_version_name: Some("VESAL_01".into()),
            other_items: vec![RawUserItem {
                item_type: 0x58,
                data: vec![0x01, 0x00, 0x00, 0x02, b'h', b'i', 0x00, 0x00],
            }],
        }
    }

    #[test]
    fn associate_rq() {
        round_trip(&Pdu::AssociateRq(AssociateRq {
            protocol_version: 1,
            called_ae_title: "STORE-SCP".into(),
            calling_ae_title: "VESAL".into(),
            application_context: "1.2.840.10008.3.1.1.1".into(),
            presentation_contexts: vec![
                ProposedPresentationContext {
                    id: 1,
                    abstract_syntax: "1.2.840.10008.1.1".into(),
                    transfer_syntaxes: vec!["1.2.840.10008.1.2".into()],
                },
                ProposedPresentationContext {
                    id: 3,
                    abstract_syntax: "1.2.840.10008.5.1.4.1.1.7".into(),
                    transfer_syntaxes: vec![
                        "1.2.840.10008.1.2.4.90".into(),
                        "1.2.840.10008.1.2".into(),
                    ],
                },
            ],
            user_info: sample_user_info(),
        }));
    }

    #[test]
    fn associate_ac() {
        round_trip(&Pdu::AssociateAc(AssociateAc {
            protocol_version: 1,
            called_ae_title: "STORE-SCP".into(),
            calling_ae_title: "VESAL".into(),
            application_context: "1.2.840.10008.3.1.1.1".into(),
            presentation_contexts: vec![
                PresentationContextResult {
                    id: 1,
                    result: PresentationContextResultReason::Acceptance,
                    transfer_syntax: "1.2.840.10008.1.2".into(),
                },
                PresentationContextResult {
                    id: 3,
                    result: PresentationContextResultReason::AbstractSyntaxNotSupported,
                    transfer_syntax: String::new(),
                },
            ],
            user_info: sample_user_info(),
        }));
    }

    #[test]
    fn associate_rj() {
        round_trip(&Pdu::AssociateRj(AssociateRj {
            result: RejectResult::Permanent,
            source: RejectSource::ServiceUser,
            reason: reject_reason::CALLED_AE_TITLE_NOT_RECOGNIZED,
        }));
    }

    #[test]
    fn p_data() {
        round_trip(&Pdu::PData {
            values: vec![
                Pdv {
                    context_id: 1,
                    is_command: true,
                    is_last: true,
                    data: vec![0x00, 0x01, 0x02, 0x03],
                },
                Pdv {
                    context_id: 1,
                    is_command: false,
                    is_last: false,
                    data: vec![0xAA; 256],
                },
            ],
        });
    }

    #[test]
    fn release_and_abort() {
        round_trip(&Pdu::ReleaseRq);
        round_trip(&Pdu::ReleaseRp);
        round_trip(&Pdu::Abort(Abort {
            source: AbortSource::ServiceProvider,
            reason: abort_reason::UNEXPECTED_PDU,
        }));
    }

    #[test]
    fn oversized_bodies_are_rejected_before_allocation() {
        use super::super::reader::check_body_length;

        // Association PDUs are bounded at 1 MiB.
        assert!(check_body_length(0x01, MAXIMUM_ASSOCIATION_PDU_SIZE + 1, 16384).is_err());
        assert!(check_body_length(0x01, MAXIMUM_ASSOCIATION_PDU_SIZE, 16384).is_ok());

        // Everything else at the negotiated maximum, capped at 128 MiB.
        assert!(check_body_length(0x04, 16384, 16384).is_ok());
        assert!(check_body_length(0x04, MAXIMUM_PDU_SIZE + 1, u32::MAX).is_err());
        assert!(check_body_length(0x04, 70_000, 65536).is_err());
    }
}
