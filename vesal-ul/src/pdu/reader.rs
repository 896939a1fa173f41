//! PDU parsing over [`bytes::Buf`].
//!
//! The 6-byte PDU header is read separately from the body so the
//! transport layer can enforce the length bounds *before* allocating or
//! reading a body.

use super::*;
use bytes::Buf;
use snafu::{Snafu, ensure};

pub(crate) type Result<T, E = ReadError> = core::result::Result<T, E>;

/// Failures while decoding a PDU from the wire.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ReadError {
    #[snafu(display("unexpected end of PDU while reading {field}"))]
    UnexpectedEnd { field: &'static str },

    #[snafu(display("unknown PDU type {pdu_type:#04x}"))]
    UnknownPduType { pdu_type: u8 },

    #[snafu(display("PDU body of {length} bytes exceeds the {limit}-byte limit"))]
    PduTooLarge { length: u32, limit: u32 },

    #[snafu(display("{field} is not valid text"))]
    InvalidText { field: &'static str },

    #[snafu(display("missing application context item"))]
    MissingApplicationContext,

    #[snafu(display("missing {field} sub-item in presentation context"))]
    MissingSubItem { field: &'static str },

    #[snafu(display("invalid {field} value {value}"))]
    InvalidField { field: &'static str, value: u8 },
}

/// Split a PDU header into its type byte and body length.
pub fn read_pdu_header(header: &[u8; 6]) -> Result<(u8, u32)> {
    let pdu_type = header[0];

    if !(pdu_types::ASSOCIATE_RQ..=pdu_types::ABORT).contains(&pdu_type) {
        return UnknownPduTypeSnafu { pdu_type }.fail();
    }

    let length = u32::from_be_bytes([header[2], header[3], header[4], header[5]]);

    Ok((pdu_type, length))
}

/// Enforce the body-length bounds of the protocol before any
/// allocation: association PDUs are capped at 1 MiB, everything else at
/// the negotiated maximum (never above 128 MiB).
pub fn check_body_length(pdu_type: u8, length: u32, max_pdu: u32) -> Result<()> {
    let limit = match pdu_type {
        pdu_types::ASSOCIATE_RQ | pdu_types::ASSOCIATE_AC | pdu_types::ASSOCIATE_RJ => {
            MAXIMUM_ASSOCIATION_PDU_SIZE
        }
        _ => max_pdu.max(MINIMUM_PDU_SIZE).min(MAXIMUM_PDU_SIZE),
    };

    ensure!(length <= limit, PduTooLargeSnafu { length, limit });

    Ok(())
}

/// Decode a PDU body whose header was already read.
pub fn read_pdu(pdu_type: u8, body: &[u8]) -> Result<Pdu> {
    let mut buf = body;

    match pdu_type {
        pdu_types::ASSOCIATE_RQ => read_associate_rq(&mut buf),
        pdu_types::ASSOCIATE_AC => read_associate_ac(&mut buf),
        pdu_types::ASSOCIATE_RJ => read_associate_rj(&mut buf),
        pdu_types::P_DATA_TF => read_p_data(&mut buf),
        pdu_types::RELEASE_RQ => Ok(Pdu::ReleaseRq),
        pdu_types::RELEASE_RP => Ok(Pdu::ReleaseRp),
        pdu_types::ABORT => read_abort(&mut buf),
        _ => UnknownPduTypeSnafu { pdu_type }.fail(),
    }
}

fn take_u8(buf: &mut &[u8], field: &'static str) -> Result<u8> {
    ensure!(buf.remaining() >= 1, UnexpectedEndSnafu { field });
    Ok(buf.get_u8())
}

fn take_u16(buf: &mut &[u8], field: &'static str) -> Result<u16> {
    ensure!(buf.remaining() >= 2, UnexpectedEndSnafu { field });
    Ok(buf.get_u16())
}

fn take_u32(buf: &mut &[u8], field: &'static str) -> Result<u32> {
    ensure!(buf.remaining() >= 4, UnexpectedEndSnafu { field });
    Ok(buf.get_u32())
}

fn take_bytes<'a>(buf: &mut &'a [u8], len: usize, field: &'static str) -> Result<&'a [u8]> {
    ensure!(buf.remaining() >= len, UnexpectedEndSnafu { field });

    let (taken, rest) = buf.split_at(len);
    *buf = rest;

    Ok(taken)
}

/// Decode an ISO 646 string field, trimming padding spaces and NULs.
fn take_text(buf: &mut &[u8], len: usize, field: &'static str) -> Result<String> {
    let bytes = take_bytes(buf, len, field)?;

    let text = str::from_utf8(bytes).map_err(|_| ReadError::InvalidText { field })?;
    ensure!(text.is_ascii(), InvalidTextSnafu { field });

    Ok(text.trim_matches([' ', '\0']).to_string())
}

fn read_associate_rq(buf: &mut &[u8]) -> Result<Pdu> {
    let protocol_version = take_u16(buf, "protocol version")?;
    take_u16(buf, "reserved")?;

    // Called and calling AE titles: 16 characters each, space padded.
    let called_ae_title = take_text(buf, 16, "called AE title")?;
    let calling_ae_title = take_text(buf, 16, "calling AE title")?;

    take_bytes(buf, 32, "reserved")?;

    let mut application_context = None;
    let mut presentation_contexts = Vec::new();
    let mut user_info = UserInfo {
        max_pdu_length: 0,
        ..UserInfo::default()
    };

    while buf.has_remaining() {
        match read_variable_item(buf)? {
            VariableItem::ApplicationContext(name) => application_context = Some(name),
            VariableItem::PresentationContextRq(context) => {
                presentation_contexts.push(context);
            }
            VariableItem::UserInformation(info) => user_info = info,
            VariableItem::PresentationContextAc(_) => {
                return InvalidFieldSnafu {
                    field: "variable item",
                    value: item_types::PRESENTATION_CONTEXT_AC,
                }
                .fail();
            }
            VariableItem::Skipped => {}
        }
    }

    Ok(Pdu::AssociateRq(AssociateRq {
        protocol_version,
        called_ae_title,
        calling_ae_title,
        application_context: application_context.ok_or(ReadError::MissingApplicationContext)?,
        presentation_contexts,
        user_info,
    }))
}

fn read_associate_ac(buf: &mut &[u8]) -> Result<Pdu> {
    let protocol_version = take_u16(buf, "protocol version")?;
    take_u16(buf, "reserved")?;

    // The AE title fields are formally reserved in the AC but carry an
    // echo of the request.
    let called_ae_title = take_text(buf, 16, "called AE title")?;
    let calling_ae_title = take_text(buf, 16, "calling AE title")?;

    take_bytes(buf, 32, "reserved")?;

    let mut application_context = None;
    let mut presentation_contexts = Vec::new();
    let mut user_info = UserInfo {
        max_pdu_length: 0,
        ..UserInfo::default()
    };

    while buf.has_remaining() {
        match read_variable_item(buf)? {
            VariableItem::ApplicationContext(name) => application_context = Some(name),
            VariableItem::PresentationContextAc(context) => {
                presentation_contexts.push(context);
            }
            VariableItem::UserInformation(info) => user_info = info,
            VariableItem::PresentationContextRq(_) => {
                return InvalidFieldSnafu {
                    field: "variable item",
                    value: item_types::PRESENTATION_CONTEXT_RQ,
                }
                .fail();
            }
            VariableItem::Skipped => {}
        }
    }

    Ok(Pdu::AssociateAc(AssociateAc {
        protocol_version,
        called_ae_title,
        calling_ae_title,
        application_context: application_context.ok_or(ReadError::MissingApplicationContext)?,
        presentation_contexts,
        user_info,
    }))
}

fn read_associate_rj(buf: &mut &[u8]) -> Result<Pdu> {
    take_u8(buf, "reserved")?;

    let result = match take_u8(buf, "rejection result")? {
        1 => RejectResult::Permanent,
        2 => RejectResult::Transient,
        value => {
            return InvalidFieldSnafu {
                field: "rejection result",
                value,
            }
            .fail();
        }
    };

    let source = match take_u8(buf, "rejection source")? {
        1 => RejectSource::ServiceUser,
        2 => RejectSource::ServiceProviderAcse,
        3 => RejectSource::ServiceProviderPresentation,
        value => {
            return InvalidFieldSnafu {
                field: "rejection source",
                value,
            }
            .fail();
        }
    };

    let reason = take_u8(buf, "rejection reason")?;

    Ok(Pdu::AssociateRj(AssociateRj {
        result,
        source,
        reason,
    }))
}

fn read_abort(buf: &mut &[u8]) -> Result<Pdu> {
    take_u16(buf, "reserved")?;

    let source = match take_u8(buf, "abort source")? {
        0 | 1 => AbortSource::ServiceUser,
        2 => AbortSource::ServiceProvider,
        value => {
            return InvalidFieldSnafu {
                field: "abort source",
                value,
            }
            .fail();
        }
    };

    let reason = take_u8(buf, "abort reason")?;

    Ok(Pdu::Abort(Abort { source, reason }))
}

fn read_p_data(buf: &mut &[u8]) -> Result<Pdu> {
    let mut values = Vec::new();

    while buf.has_remaining() {
        let length = take_u32(buf, "PDV length")? as usize;
        ensure!(length >= 2, UnexpectedEndSnafu { field: "PDV body" });

        let mut item = take_bytes(buf, length, "PDV body")?;

        let context_id = take_u8(&mut item, "presentation context id")?;
        let control = take_u8(&mut item, "message control header")?;

        values.push(Pdv {
            context_id,
            is_command: control & 0x01 != 0,
            is_last: control & 0x02 != 0,
            data: item.to_vec(),
        });
    }

    Ok(Pdu::PData { values })
}

enum VariableItem {
    ApplicationContext(String),
    PresentationContextRq(ProposedPresentationContext),
    PresentationContextAc(PresentationContextResult),
    UserInformation(UserInfo),
    Skipped,
}

fn read_variable_item(buf: &mut &[u8]) -> Result<VariableItem> {
    let item_type = take_u8(buf, "item type")?;
    take_u8(buf, "reserved")?;
    let length = take_u16(buf, "item length")? as usize;
    let mut item = take_bytes(buf, length, "item body")?;

    match item_type {
        item_types::APPLICATION_CONTEXT => {
            let name = take_text(&mut item, length, "application context")?;
            Ok(VariableItem::ApplicationContext(name))
        }
        item_types::PRESENTATION_CONTEXT_RQ => {
            let id = take_u8(&mut item, "presentation context id")?;
            take_bytes(&mut item, 3, "reserved")?;

            let mut abstract_syntax = None;
            let mut transfer_syntaxes = Vec::new();

            while item.has_remaining() {
                let sub_type = take_u8(&mut item, "sub-item type")?;
                take_u8(&mut item, "reserved")?;
                let sub_length = take_u16(&mut item, "sub-item length")? as usize;

                match sub_type {
                    item_types::ABSTRACT_SYNTAX => {
                        abstract_syntax =
                            Some(take_text(&mut item, sub_length, "abstract syntax")?);
                    }
                    item_types::TRANSFER_SYNTAX => {
                        transfer_syntaxes
                            .push(take_text(&mut item, sub_length, "transfer syntax")?);
                    }
                    _ => {
                        take_bytes(&mut item, sub_length, "sub-item body")?;
                    }
                }
            }

            ensure!(
                !transfer_syntaxes.is_empty(),
                MissingSubItemSnafu {
                    field: "transfer syntax",
                }
            );

            Ok(VariableItem::PresentationContextRq(
                ProposedPresentationContext {
                    id,
                    abstract_syntax: abstract_syntax.ok_or(ReadError::MissingSubItem {
                        field: "abstract syntax",
                    })?,
                    transfer_syntaxes,
                },
            ))
        }
        item_types::PRESENTATION_CONTEXT_AC => {
            let id = take_u8(&mut item, "presentation context id")?;
            take_u8(&mut item, "reserved")?;
            let result_value = take_u8(&mut item, "presentation context result")?;
            take_u8(&mut item, "reserved")?;

            let result = PresentationContextResultReason::from_u8(result_value).ok_or(
                ReadError::InvalidField {
                    field: "presentation context result",
                    value: result_value,
                },
            )?;

            let mut transfer_syntax = String::new();

            while item.has_remaining() {
                let sub_type = take_u8(&mut item, "sub-item type")?;
                take_u8(&mut item, "reserved")?;
                let sub_length = take_u16(&mut item, "sub-item length")? as usize;

                if sub_type == item_types::TRANSFER_SYNTAX {
                    transfer_syntax = take_text(&mut item, sub_length, "transfer syntax")?;
                } else {
                    take_bytes(&mut item, sub_length, "sub-item body")?;
                }
            }

            Ok(VariableItem::PresentationContextAc(
                PresentationContextResult {
                    id,
                    result,
                    transfer_syntax,
                },
            ))
        }
        item_types::USER_INFORMATION => {
            let mut info = UserInfo {
                max_pdu_length: 0,
                ..UserInfo::default()
            };

            while item.has_remaining() {
                let sub_type = take_u8(&mut item, "user item type")?;
                take_u8(&mut item, "reserved")?;
                let sub_length = take_u16(&mut item, "user item length")? as usize;

                match sub_type {
                    item_types::MAXIMUM_LENGTH => {
                        let mut body = take_bytes(&mut item, sub_length, "maximum length")?;
                        info.max_pdu_length = take_u32(&mut body, "maximum length")?;
                    }
                    item_types::IMPLEMENTATION_CLASS_UID => {
                        info.implementation_class_uid =
                            take_text(&mut item, sub_length, "implementation class UID")?;
                    }
                    item_types::IMPLEMENTATION_VERSION_NAME => {
                        info.implementation_version_name = Some(take_text(
                            &mut item,
                            sub_length,
                            "implementation version name",
                        )?);
                    }
                    other => {
                        // User identity negotiation and anything else we
                        // do not interpret is passed through untouched.
                        let data = take_bytes(&mut item, sub_length, "user item body")?;
                        info.other_items.push(RawUserItem {
                            item_type: other,
                            data: data.to_vec(),
                        });
                    }
                }
            }

            Ok(VariableItem::UserInformation(info))
        }
        other => {
            tracing::warn!("skipping unknown variable item {other:#04x}");
            Ok(VariableItem::Skipped)
        }
    }
}
