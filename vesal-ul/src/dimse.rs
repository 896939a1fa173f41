//! The DIMSE layer: command-set encoding in Implicit VR Little Endian,
//! the C-ECHO and C-STORE message shapes, DIMSE status codes, and the
//! fragmentation and reassembly of messages into PDVs.

use crate::association::{DimseSnafu, Error, Result};
use crate::pdu::Pdv;
use core::fmt;
use std::collections::HashMap;

/// Command group elements (PS3.7 Annex E).
pub mod tags {
    pub const COMMAND_GROUP_LENGTH: u16 = 0x0000;
    pub const AFFECTED_SOP_CLASS_UID: u16 = 0x0002;
    pub const COMMAND_FIELD: u16 = 0x0100;
    pub const MESSAGE_ID: u16 = 0x0110;
    pub const MESSAGE_ID_BEING_RESPONDED_TO: u16 = 0x0120;
    pub const PRIORITY: u16 = 0x0700;
    pub const COMMAND_DATA_SET_TYPE: u16 = 0x0800;
    pub const STATUS: u16 = 0x0900;
    pub const AFFECTED_SOP_INSTANCE_UID: u16 = 0x1000;
}

/// Command field values.
pub mod commands {
    pub const C_STORE_RQ: u16 = 0x0001;
    pub const C_STORE_RSP: u16 = 0x8001;
    pub const C_ECHO_RQ: u16 = 0x0030;
    pub const C_ECHO_RSP: u16 = 0x8030;
}

/// The CommandDataSetType value meaning "no data set follows".
pub const NO_DATA_SET: u16 = 0x0101;

/// Hard cap on the reassembled size of one command or data set.
const MAX_MESSAGE_SIZE: usize = 1024 * 1024 * 1024;

/// A DIMSE status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(pub u16);

impl Status {
    pub const SUCCESS: Self = Self(0x0000);
    pub const CANCEL: Self = Self(0xFE00);
    pub const PENDING: Self = Self(0xFF00);
    pub const SOP_CLASS_NOT_SUPPORTED: Self = Self(0xA900);
    pub const OUT_OF_RESOURCES: Self = Self(0xA700);
    pub const PROCESSING_FAILURE: Self = Self(0x0110);
    pub const UNRECOGNIZED_OPERATION: Self = Self(0x0211);

    pub fn is_success(self) -> bool {
        self.0 == 0x0000
    }

    pub fn is_pending(self) -> bool {
        matches!(self.0, 0xFF00 | 0xFF01)
    }

    pub fn is_warning(self) -> bool {
        matches!(self.0, 0x0001 | 0x0107 | 0x0116 | 0xB000..=0xBFFF)
    }

    pub fn is_failure(self) -> bool {
        !self.is_success() && !self.is_pending() && !self.is_warning() && self.0 != 0xFE00
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06X}", self.0)
    }
}

/// The value of one command element: well-known elements are typed,
/// anything else is carried as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandValue {
    Ushort(u16),
    Ulong(u32),
    Uid(String),
    Bytes(Vec<u8>),
}

/// An ordered set of group-0x0000 elements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSet {
    elements: Vec<(u16, CommandValue)>,
}

impl CommandSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u16(&mut self, element: u16, value: u16) {
        self.elements.push((element, CommandValue::Ushort(value)));
    }

    pub fn put_uid(&mut self, element: u16, value: &str) {
        self.elements
            .push((element, CommandValue::Uid(value.to_string())));
    }

    pub fn get_u16(&self, element: u16) -> Option<u16> {
        self.elements.iter().find_map(|(tag, value)| {
            if *tag == element {
                match value {
                    CommandValue::Ushort(v) => Some(*v),
                    _ => None,
                }
            } else {
                None
            }
        })
    }

    pub fn get_uid(&self, element: u16) -> Option<&str> {
        self.elements.iter().find_map(|(tag, value)| {
            if *tag == element {
                match value {
                    CommandValue::Uid(v) => Some(v.as_str()),
                    _ => None,
                }
            } else {
                None
            }
        })
    }

    /// The command field, present in every well-formed command set.
    pub fn command_field(&self) -> Option<u16> {
        self.get_u16(tags::COMMAND_FIELD)
    }

    /// Whether a data set follows this command.
    pub fn has_data_set(&self) -> bool {
        self.get_u16(tags::COMMAND_DATA_SET_TYPE)
            .is_some_and(|v| v != NO_DATA_SET)
    }

    /// Serialise as Implicit VR Little Endian, with the group length
    /// element first.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();

        for (element, value) in &self.elements {
            if *element == tags::COMMAND_GROUP_LENGTH {
                continue;
            }

            let bytes = match value {
                CommandValue::Ushort(v) => v.to_le_bytes().to_vec(),
                CommandValue::Ulong(v) => v.to_le_bytes().to_vec(),
                CommandValue::Uid(v) => {
                    let mut bytes = v.as_bytes().to_vec();
                    if bytes.len() % 2 != 0 {
                        // UI values are padded to even length with NUL.
                        bytes.push(0x00);
                    }
                    bytes
                }
                CommandValue::Bytes(v) => v.clone(),
            };

            body.extend_from_slice(&0x0000u16.to_le_bytes());
            body.extend_from_slice(&element.to_le_bytes());
            body.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            body.extend_from_slice(&bytes);
        }

        let mut out = Vec::with_capacity(body.len() + 12);
        out.extend_from_slice(&0x0000u16.to_le_bytes());
        out.extend_from_slice(&tags::COMMAND_GROUP_LENGTH.to_le_bytes());
        out.extend_from_slice(&4u32.to_le_bytes());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);

        out
    }

    /// Parse an Implicit VR Little Endian command set. Any element of
    /// group 0x0000 is accepted; unknown elements keep their raw bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut elements = Vec::new();
        let mut offset = 0;

        let read_u16 = |data: &[u8], offset: usize| -> Result<u16> {
            data.get(offset..offset + 2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .ok_or(Error::Dimse {
                    what: "truncated element header",
                })
        };

        while offset < data.len() {
            let group = read_u16(data, offset)?;
            let element = read_u16(data, offset + 2)?;
            let length = data
                .get(offset + 4..offset + 8)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .ok_or(Error::Dimse {
                    what: "truncated element header",
                })? as usize;
            offset += 8;

            let value_bytes = data.get(offset..offset + length).ok_or(Error::Dimse {
                what: "element value exceeds the command set",
            })?;
            offset += length;

            if group != 0x0000 {
                // Foreign groups have no place in a command set; skip.
                continue;
            }

            let value = match element {
                tags::COMMAND_GROUP_LENGTH => {
                    if length != 4 {
                        return DimseSnafu {
                            what: "group length must be four bytes",
                        }
                        .fail();
                    }
                    CommandValue::Ulong(u32::from_le_bytes([
                        value_bytes[0],
                        value_bytes[1],
                        value_bytes[2],
                        value_bytes[3],
                    ]))
                }
                tags::COMMAND_FIELD
                | tags::MESSAGE_ID
                | tags::MESSAGE_ID_BEING_RESPONDED_TO
                | tags::PRIORITY
                | tags::COMMAND_DATA_SET_TYPE
                | tags::STATUS => {
                    if length != 2 {
                        return DimseSnafu {
                            what: "unsigned short element with bad length",
                        }
                        .fail();
                    }
                    CommandValue::Ushort(u16::from_le_bytes([value_bytes[0], value_bytes[1]]))
                }
                tags::AFFECTED_SOP_CLASS_UID | tags::AFFECTED_SOP_INSTANCE_UID => {
                    let text = str::from_utf8(value_bytes).map_err(|_| Error::Dimse {
                        what: "UID element is not valid text",
                    })?;
                    CommandValue::Uid(text.trim_matches(['\0', ' ']).to_string())
                }
                _ => CommandValue::Bytes(value_bytes.to_vec()),
            };

            elements.push((element, value));
        }

        Ok(Self { elements })
    }
}

/// Build a C-ECHO request.
pub fn echo_rq(message_id: u16, sop_class_uid: &str) -> CommandSet {
    let mut command = CommandSet::new();
    command.put_uid(tags::AFFECTED_SOP_CLASS_UID, sop_class_uid);
    command.put_u16(tags::COMMAND_FIELD, commands::C_ECHO_RQ);
    command.put_u16(tags::MESSAGE_ID, message_id);
    command.put_u16(tags::COMMAND_DATA_SET_TYPE, NO_DATA_SET);

    command
}

/// Build the C-ECHO response matching a request.
pub fn echo_rsp(request: &CommandSet, status: Status) -> CommandSet {
    let mut command = CommandSet::new();

    if let Some(uid) = request.get_uid(tags::AFFECTED_SOP_CLASS_UID) {
        command.put_uid(tags::AFFECTED_SOP_CLASS_UID, uid);
    }
    command.put_u16(tags::COMMAND_FIELD, commands::C_ECHO_RSP);
    command.put_u16(
        tags::MESSAGE_ID_BEING_RESPONDED_TO,
        request.get_u16(tags::MESSAGE_ID).unwrap_or(0),
    );
    command.put_u16(tags::COMMAND_DATA_SET_TYPE, NO_DATA_SET);
    command.put_u16(tags::STATUS, status.0);

    command
}

/// Build a C-STORE request; the data set follows in separate PDVs.
pub fn store_rq(
    message_id: u16,
    sop_class_uid: &str,
    sop_instance_uid: &str,
    priority: u16,
) -> CommandSet {
    let mut command = CommandSet::new();
    command.put_uid(tags::AFFECTED_SOP_CLASS_UID, sop_class_uid);
    command.put_u16(tags::COMMAND_FIELD, commands::C_STORE_RQ);
    command.put_u16(tags::MESSAGE_ID, message_id);
    command.put_u16(tags::PRIORITY, priority);
    command.put_u16(tags::COMMAND_DATA_SET_TYPE, 0x0000);
    command.put_uid(tags::AFFECTED_SOP_INSTANCE_UID, sop_instance_uid);

    command
}

/// Build the C-STORE response matching a request.
pub fn store_rsp(request: &CommandSet, status: Status) -> CommandSet {
    let mut command = CommandSet::new();

    if let Some(uid) = request.get_uid(tags::AFFECTED_SOP_CLASS_UID) {
        command.put_uid(tags::AFFECTED_SOP_CLASS_UID, uid);
    }
    command.put_u16(tags::COMMAND_FIELD, commands::C_STORE_RSP);
    command.put_u16(
        tags::MESSAGE_ID_BEING_RESPONDED_TO,
        request.get_u16(tags::MESSAGE_ID).unwrap_or(0),
    );
    command.put_u16(tags::COMMAND_DATA_SET_TYPE, NO_DATA_SET);
    command.put_u16(tags::STATUS, status.0);
    if let Some(uid) = request.get_uid(tags::AFFECTED_SOP_INSTANCE_UID) {
        command.put_uid(tags::AFFECTED_SOP_INSTANCE_UID, uid);
    }

    command
}

/// Split a command or data set into PDVs that keep every P-DATA-TF PDU
/// within the peer's advertised maximum. Command and data fragments are
/// never mixed in a single PDV.
pub(crate) fn fragment(
    context_id: u8,
    is_command: bool,
    data: &[u8],
    max_pdu: u32,
) -> Vec<Pdv> {
    // A PDV item costs four length bytes plus the id and control bytes.
    let chunk_size = (max_pdu as usize).saturating_sub(6).max(1);

    if data.is_empty() {
        return vec![Pdv {
            context_id,
            is_command,
            is_last: true,
            data: Vec::new(),
        }];
    }

    let chunks: Vec<&[u8]> = data.chunks(chunk_size).collect();
    let last = chunks.len() - 1;

    chunks
        .into_iter()
        .enumerate()
        .map(|(idx, chunk)| Pdv {
            context_id,
            is_command,
            is_last: idx == last,
            data: chunk.to_vec(),
        })
        .collect()
}

/// Reassembles command and data-set streams from incoming PDVs,
/// accumulating per presentation context and role until a last-fragment
/// marker arrives.
#[derive(Debug, Default)]
pub(crate) struct PdvAssembler {
    buffers: HashMap<(u8, bool), Vec<u8>>,
}

/// A fully reassembled command or data set.
#[derive(Debug)]
pub(crate) struct AssembledMessage {
    pub(crate) context_id: u8,
    pub(crate) is_command: bool,
    pub(crate) data: Vec<u8>,
}

impl PdvAssembler {
    /// Feed one PDV; returns a message when its last fragment arrives.
    pub(crate) fn feed(&mut self, pdv: Pdv) -> Result<Option<AssembledMessage>> {
        let key = (pdv.context_id, pdv.is_command);
        let buffer = self.buffers.entry(key).or_default();

        if buffer.len() + pdv.data.len() > MAX_MESSAGE_SIZE {
            self.buffers.remove(&key);
            return Err(Error::MessageTooLarge);
        }

        buffer.extend_from_slice(&pdv.data);

        if pdv.is_last {
            let data = self.buffers.remove(&key).unwrap_or_default();

            Ok(Some(AssembledMessage {
                context_id: pdv.context_id,
                is_command: pdv.is_command,
                data,
            }))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_set_round_trip() {
        let command = store_rq(7, "1.2.840.10008.5.1.4.1.1.7", "1.2.3.4.5.6.7.8.9", 0);
        let encoded = command.encode();

        // Group length leads and covers the rest of the set.
        assert_eq!(&encoded[..4], &[0x00, 0x00, 0x00, 0x00]);
        let group_length = u32::from_le_bytes(encoded[8..12].try_into().unwrap());
        assert_eq!(group_length as usize, encoded.len() - 12);

        let decoded = CommandSet::decode(&encoded).unwrap();
        assert_eq!(decoded.command_field(), Some(commands::C_STORE_RQ));
        assert_eq!(decoded.get_u16(tags::MESSAGE_ID), Some(7));
        assert_eq!(
            decoded.get_uid(tags::AFFECTED_SOP_CLASS_UID),
            Some("1.2.840.10008.5.1.4.1.1.7")
        );
        assert_eq!(
            decoded.get_uid(tags::AFFECTED_SOP_INSTANCE_UID),
            Some("1.2.3.4.5.6.7.8.9")
        );
        assert!(decoded.has_data_set());
    }

    #[test]
    fn unknown_elements_are_preserved_as_bytes() {
        // A private group-0000 element the dictionary does not know.
        let mut data = Vec::new();
        data.extend_from_slice(&0x0000u16.to_le_bytes());
        data.extend_from_slice(&0x5110u16.to_le_bytes());
        data.extend_from_slice(&4u32.to_le_bytes());
        data.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

        let decoded = CommandSet::decode(&data).unwrap();
        assert_eq!(
            decoded.elements,
            vec![(0x5110, CommandValue::Bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]))]
        );
    }

    #[test]
    fn echo_messages() {
        let request = echo_rq(1, "1.2.840.10008.1.1");
        assert_eq!(request.command_field(), Some(commands::C_ECHO_RQ));
        assert!(!request.has_data_set());

        let response = echo_rsp(&request, Status::SUCCESS);
        assert_eq!(response.command_field(), Some(commands::C_ECHO_RSP));
        assert_eq!(response.get_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO), Some(1));
        assert_eq!(response.get_u16(tags::STATUS), Some(0x0000));
    }

    #[test]
    fn fragmentation_respects_max_pdu() {
        let data = vec![0x42u8; 100_000];
        let pdvs = fragment(3, false, &data, 16384);

        assert!(pdvs.len() > 1);
        assert!(pdvs.iter().all(|pdv| pdv.data.len() + 6 <= 16384));
        assert!(pdvs[..pdvs.len() - 1].iter().all(|pdv| !pdv.is_last));
        assert!(pdvs.last().unwrap().is_last);

        let total: usize = pdvs.iter().map(|pdv| pdv.data.len()).sum();
        assert_eq!(total, data.len());
    }

    #[test]
    fn assembler_reunites_fragments() {
        let mut assembler = PdvAssembler::default();
        let data: Vec<u8> = (0..=255).collect();

        let pdvs = fragment(1, true, &data, 4096 + 70);
        let mut result = None;

        for pdv in pdvs {
            if let Some(message) = assembler.feed(pdv).unwrap() {
                result = Some(message);
            }
        }

        let message = result.expect("last fragment must complete the message");
        assert_eq!(message.context_id, 1);
        assert!(message.is_command);
        assert_eq!(message.data, data);
    }

    #[test]
    fn interleaved_contexts_do_not_mix() {
        let mut assembler = PdvAssembler::default();

        let first = fragment(1, false, &[0x11; 300], 4102);
        let second = fragment(3, false, &[0x22; 300], 4102);

        // Interleave fragments of two messages.
        let mut done = Vec::new();
        for (a, b) in first.into_iter().zip(second) {
            if let Some(msg) = assembler.feed(a).unwrap() {
                done.push(msg);
            }
            if let Some(msg) = assembler.feed(b).unwrap() {
                done.push(msg);
            }
        }

        assert_eq!(done.len(), 2);
        assert!(done[0].data.iter().all(|&b| b == 0x11));
        assert!(done[1].data.iter().all(|&b| b == 0x22));
    }
}
