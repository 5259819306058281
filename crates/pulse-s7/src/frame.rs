// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! ISO-on-TCP framing and S7comm request/response encoding.
//!
//! Transport stack, outermost first: TPKT (RFC 1006, 4 bytes), COTP
//! (connection setup and a 3-byte data header), then the S7 PDU. A session
//! is established with a COTP connection request followed by an S7
//! setup-communication exchange that negotiates the PDU size; after that,
//! read-var (0x04) and write-var (0x05) jobs carry the traffic.
//!
//! S7 data is strictly big-endian; the per-address byte-order setting does
//! not apply here.

use pulse_core::error::HandlerError;
use pulse_core::types::DataType;

/// TPKT version byte.
pub const TPKT_VERSION: u8 = 0x03;
/// COTP PDU type: connection confirm.
const COTP_CONNECTION_CONFIRM: u8 = 0xD0;
/// S7 protocol ID.
const S7_PROTOCOL_ID: u8 = 0x32;
/// PDU size requested during setup; the PLC may negotiate it down.
pub const REQUESTED_PDU_SIZE: u16 = 480;

/// Default rack and slot, matching compact CPUs. The second remote-TSAP
/// byte encodes `rack * 0x20 + slot`.
pub const DEFAULT_RACK: u8 = 0;
/// Default CPU slot.
pub const DEFAULT_SLOT: u8 = 1;

// =============================================================================
// Addressing
// =============================================================================

/// S7 memory area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S7Area {
    /// Data block (`DBn.`).
    DataBlock,
    /// Flag memory (`M`).
    Merker,
    /// Process input image (`I` / `E`).
    Input,
    /// Process output image (`Q` / `A`).
    Output,
}

impl S7Area {
    /// Area code as carried in the request item.
    pub fn code(&self) -> u8 {
        match self {
            Self::DataBlock => 0x84,
            Self::Merker => 0x83,
            Self::Input => 0x81,
            Self::Output => 0x82,
        }
    }
}

/// Access width, derived from the address token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S7Width {
    /// Single bit (`DBX`, `M10.1`).
    Bit,
    /// One byte (`DBB`, `MB`).
    Byte,
    /// 16-bit word (`DBW`, `MW`).
    Word,
    /// 32-bit double word (`DBD`, `MD`).
    DWord,
}

impl S7Width {
    /// Payload size in bytes (1 for bit access).
    pub fn byte_len(&self) -> u16 {
        match self {
            Self::Bit | Self::Byte => 1,
            Self::Word => 2,
            Self::DWord => 4,
        }
    }

    /// Transport size code for the request item.
    fn transport_size(&self) -> u8 {
        match self {
            Self::Bit => 0x01,
            _ => 0x02, // byte access; length counts bytes
        }
    }

    /// Unit count for the request item (bits for bit access, else bytes).
    fn request_length(&self) -> u16 {
        match self {
            Self::Bit => 1,
            other => other.byte_len(),
        }
    }
}

/// One parsed S7 address.
///
/// Supported forms: `DB1.DBW0`, `DB1.DBD4`, `DB2.DBB5`, `DB1.DBX0.3`,
/// `MW10`, `MD20`, `MB5`, `M10.1`, `IW0`, `QW2`, `I0.0`, `Q0.1`. The
/// German mnemonics `E`/`A` are accepted for inputs/outputs. A plain
/// area-plus-offset with no width letter reads as a word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S7Address {
    /// Memory area.
    pub area: S7Area,
    /// Data block number; 0 outside DB addressing.
    pub db_number: u16,
    /// Byte offset within the area.
    pub byte_offset: u16,
    /// Bit index for bit access.
    pub bit: u8,
    /// Access width.
    pub width: S7Width,
}

impl S7Address {
    /// Parses an address string. Returns `None` for malformed input.
    pub fn parse(address: &str) -> Option<Self> {
        let upper = address.trim().to_ascii_uppercase();
        if let Some(rest) = upper.strip_prefix("DB") {
            return Self::parse_db(rest);
        }

        let mut chars = upper.chars();
        let area = match chars.next()? {
            'M' => S7Area::Merker,
            'I' | 'E' => S7Area::Input,
            'Q' | 'A' => S7Area::Output,
            _ => return None,
        };
        let rest = chars.as_str();
        let (width, rest) = match rest.chars().next()? {
            'B' => (Some(S7Width::Byte), &rest[1..]),
            'W' => (Some(S7Width::Word), &rest[1..]),
            'D' => (Some(S7Width::DWord), &rest[1..]),
            _ => (None, rest),
        };
        Self::parse_offset(area, 0, width, rest)
    }

    fn parse_db(rest: &str) -> Option<Self> {
        let (db_part, item) = rest.split_once('.')?;
        let db_number = db_part.parse::<u16>().ok()?;
        let item = item.strip_prefix("DB")?;
        let (width, offset_part) = match item.chars().next()? {
            'X' => (Some(S7Width::Bit), &item[1..]),
            'B' => (Some(S7Width::Byte), &item[1..]),
            'W' => (Some(S7Width::Word), &item[1..]),
            'D' => (Some(S7Width::DWord), &item[1..]),
            _ => return None,
        };
        Self::parse_offset(S7Area::DataBlock, db_number, width, offset_part)
    }

    fn parse_offset(
        area: S7Area,
        db_number: u16,
        width: Option<S7Width>,
        text: &str,
    ) -> Option<Self> {
        if let Some((byte_part, bit_part)) = text.split_once('.') {
            // An explicit bit index forces bit access; widths other than
            // X/bit make no sense with one.
            if !matches!(width, None | Some(S7Width::Bit)) {
                return None;
            }
            let byte_offset = byte_part.parse::<u16>().ok()?;
            let bit = bit_part.parse::<u8>().ok()?;
            if bit > 7 {
                return None;
            }
            return Some(Self {
                area,
                db_number,
                byte_offset,
                bit,
                width: S7Width::Bit,
            });
        }

        let byte_offset = text.parse::<u16>().ok()?;
        let width = match width {
            Some(S7Width::Bit) => return None, // DBX needs a bit index
            Some(w) => w,
            None => S7Width::Word,
        };
        Some(Self {
            area,
            db_number,
            byte_offset,
            bit: 0,
            width,
        })
    }

    fn start_address(&self) -> u32 {
        u32::from(self.byte_offset) * 8 + u32::from(self.bit)
    }
}

impl std::fmt::Display for S7Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.area {
            S7Area::DataBlock => {
                let w = match self.width {
                    S7Width::Bit => "X",
                    S7Width::Byte => "B",
                    S7Width::Word => "W",
                    S7Width::DWord => "D",
                };
                write!(f, "DB{}.DB{}{}", self.db_number, w, self.byte_offset)?;
            }
            S7Area::Merker => write!(f, "M{}", self.byte_offset)?,
            S7Area::Input => write!(f, "I{}", self.byte_offset)?,
            S7Area::Output => write!(f, "Q{}", self.byte_offset)?,
        }
        if self.width == S7Width::Bit {
            write!(f, ".{}", self.bit)?;
        }
        Ok(())
    }
}

// =============================================================================
// Frame construction
// =============================================================================

fn tpkt(payload: &[u8]) -> Vec<u8> {
    let total = (payload.len() + 4) as u16;
    let mut frame = Vec::with_capacity(total as usize);
    frame.push(TPKT_VERSION);
    frame.push(0x00);
    frame.extend_from_slice(&total.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// COTP connection request addressing the CPU at the given rack/slot.
pub fn build_connect_request(rack: u8, slot: u8) -> Vec<u8> {
    let remote_tsap = [0x01, rack * 0x20 + slot];
    let cotp = [
        0x11, // length
        0xE0, // connection request
        0x00, 0x00, // destination reference
        0x00, 0x01, // source reference
        0x00, // class 0
        0xC0, 0x01, 0x0A, // TPDU size 1024
        0xC1, 0x02, 0x01, 0x00, // source TSAP
        0xC2, 0x02, remote_tsap[0], remote_tsap[1],
    ];
    tpkt(&cotp)
}

/// Validates a COTP connection confirm (the bytes after the TPKT header).
pub fn check_connect_confirm(payload: &[u8]) -> Result<(), HandlerError> {
    if payload.len() < 2 || payload[1] != COTP_CONNECTION_CONFIRM {
        return Err(HandlerError::protocol(
            "PLC refused the COTP connection request",
        ));
    }
    Ok(())
}

fn s7_job(pdu_ref: u16, params: &[u8], data: &[u8]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(10 + params.len() + data.len());
    pdu.push(S7_PROTOCOL_ID);
    pdu.push(0x01); // ROSCTR: job
    pdu.extend_from_slice(&[0x00, 0x00]); // redundancy id
    pdu.extend_from_slice(&pdu_ref.to_be_bytes());
    pdu.extend_from_slice(&(params.len() as u16).to_be_bytes());
    pdu.extend_from_slice(&(data.len() as u16).to_be_bytes());
    pdu.extend_from_slice(params);
    pdu.extend_from_slice(data);

    // COTP data header precedes the S7 PDU.
    let mut payload = vec![0x02, 0xF0, 0x80];
    payload.extend_from_slice(&pdu);
    tpkt(&payload)
}

/// Setup-communication job negotiating the PDU size.
pub fn build_setup_request(pdu_ref: u16) -> Vec<u8> {
    let mut params = vec![0xF0, 0x00];
    params.extend_from_slice(&1u16.to_be_bytes()); // max AMQ caller
    params.extend_from_slice(&1u16.to_be_bytes()); // max AMQ callee
    params.extend_from_slice(&REQUESTED_PDU_SIZE.to_be_bytes());
    s7_job(pdu_ref, &params, &[])
}

fn request_item(address: S7Address) -> [u8; 12] {
    let start = address.start_address();
    [
        0x12, // variable specification
        0x0A, // spec length
        0x10, // syntax: S7ANY
        address.width.transport_size(),
        (address.width.request_length() >> 8) as u8,
        (address.width.request_length() & 0xFF) as u8,
        (address.db_number >> 8) as u8,
        (address.db_number & 0xFF) as u8,
        address.area.code(),
        (start >> 16) as u8,
        (start >> 8) as u8,
        (start & 0xFF) as u8,
    ]
}

/// Read-var job for one address.
pub fn build_read_request(pdu_ref: u16, address: S7Address) -> Vec<u8> {
    let mut params = vec![0x04, 0x01]; // read var, one item
    params.extend_from_slice(&request_item(address));
    s7_job(pdu_ref, &params, &[])
}

/// Write-var job for one address with a big-endian payload.
pub fn build_write_request(pdu_ref: u16, address: S7Address, payload: &[u8]) -> Vec<u8> {
    let mut params = vec![0x05, 0x01]; // write var, one item
    params.extend_from_slice(&request_item(address));

    let mut data = Vec::with_capacity(4 + payload.len());
    data.push(0x00); // reserved
    if address.width == S7Width::Bit {
        data.push(0x03); // transport: bit, length in bits
        data.extend_from_slice(&1u16.to_be_bytes());
    } else {
        data.push(0x04); // transport: byte/word, length in bits
        data.extend_from_slice(&((payload.len() as u16) * 8).to_be_bytes());
    }
    data.extend_from_slice(payload);
    s7_job(pdu_ref, &params, &data)
}

// =============================================================================
// Response parsing
// =============================================================================

fn item_return_message(code: u8) -> &'static str {
    match code {
        0x03 => "object access denied",
        0x05 => "address out of range",
        0x06 => "data type mismatch",
        0x07 => "size mismatch",
        0x0A => "object does not exist",
        _ => "item rejected",
    }
}

/// Splits an ack-data PDU (the bytes after TPKT + COTP data header) into
/// its parameter and data sections, verifying the header error fields.
fn split_ack_data(pdu: &[u8]) -> Result<(&[u8], &[u8]), HandlerError> {
    if pdu.len() < 12 || pdu[0] != S7_PROTOCOL_ID {
        return Err(HandlerError::protocol("malformed S7 response header"));
    }
    if pdu[1] != 0x03 {
        return Err(HandlerError::protocol(format!(
            "unexpected S7 ROSCTR {:#04x}",
            pdu[1]
        )));
    }
    let param_len = u16::from_be_bytes([pdu[6], pdu[7]]) as usize;
    let data_len = u16::from_be_bytes([pdu[8], pdu[9]]) as usize;
    let error_class = pdu[10];
    let error_code = pdu[11];
    if error_class != 0 || error_code != 0 {
        return Err(HandlerError::protocol(format!(
            "S7 error class {:#04x} code {:#04x}",
            error_class, error_code
        )));
    }
    let params_start = 12;
    let data_start = params_start + param_len;
    if pdu.len() < data_start + data_len {
        return Err(HandlerError::protocol("truncated S7 response"));
    }
    Ok((
        &pdu[params_start..data_start],
        &pdu[data_start..data_start + data_len],
    ))
}

/// Negotiated PDU size from a setup-communication response.
pub fn parse_setup_response(pdu: &[u8]) -> Result<u16, HandlerError> {
    let (params, _) = split_ack_data(pdu)?;
    if params.len() < 8 || params[0] != 0xF0 {
        return Err(HandlerError::protocol("malformed setup-communication reply"));
    }
    Ok(u16::from_be_bytes([params[6], params[7]]))
}

/// Payload bytes of a single-item read-var response.
pub fn parse_read_response(pdu: &[u8]) -> Result<Vec<u8>, HandlerError> {
    let (params, data) = split_ack_data(pdu)?;
    if params.first() != Some(&0x04) {
        return Err(HandlerError::protocol("response is not a read-var ack"));
    }
    if data.len() < 4 {
        return Err(HandlerError::protocol("read-var response carries no item"));
    }
    let return_code = data[0];
    if return_code != 0xFF {
        return Err(HandlerError::protocol(format!(
            "read rejected ({:#04x}): {}",
            return_code,
            item_return_message(return_code)
        )));
    }
    let transport = data[1];
    let length = u16::from_be_bytes([data[2], data[3]]) as usize;
    // Transports 0x03/0x04 count bits, 0x09 counts bytes.
    let byte_len = match transport {
        0x03 | 0x04 => length.div_ceil(8),
        _ => length,
    };
    if data.len() < 4 + byte_len {
        return Err(HandlerError::protocol("truncated read-var payload"));
    }
    Ok(data[4..4 + byte_len].to_vec())
}

/// Checks the item return code of a single-item write-var response.
pub fn parse_write_response(pdu: &[u8]) -> Result<(), HandlerError> {
    let (params, data) = split_ack_data(pdu)?;
    if params.first() != Some(&0x05) {
        return Err(HandlerError::protocol("response is not a write-var ack"));
    }
    let return_code = *data
        .first()
        .ok_or_else(|| HandlerError::protocol("write-var response carries no item"))?;
    if return_code != 0xFF {
        return Err(HandlerError::protocol(format!(
            "write rejected ({:#04x}): {}",
            return_code,
            item_return_message(return_code)
        )));
    }
    Ok(())
}

// =============================================================================
// Value codec
// =============================================================================

/// Decodes a big-endian payload per the configured data type.
pub fn decode_value(bytes: &[u8], data_type: DataType) -> Option<f64> {
    match data_type {
        DataType::Bool => bytes.first().map(|b| if *b != 0 { 1.0 } else { 0.0 }),
        DataType::Int16 => {
            let arr: [u8; 2] = bytes.get(..2)?.try_into().ok()?;
            Some(f64::from(i16::from_be_bytes(arr)))
        }
        DataType::UInt16 => {
            let arr: [u8; 2] = bytes.get(..2)?.try_into().ok()?;
            Some(f64::from(u16::from_be_bytes(arr)))
        }
        DataType::Int32 => {
            let arr: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
            Some(f64::from(i32::from_be_bytes(arr)))
        }
        DataType::UInt32 => {
            let arr: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
            Some(f64::from(u32::from_be_bytes(arr)))
        }
        DataType::Float => {
            let arr: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
            let value = f32::from_be_bytes(arr);
            if value.is_finite() {
                Some(f64::from(value))
            } else {
                None
            }
        }
        DataType::String => {
            let text = String::from_utf8_lossy(bytes);
            let trimmed = text.trim_matches(|c: char| c == '\0' || c == ' ');
            trimmed.parse::<f64>().ok()
        }
    }
}

/// Encodes a value into the big-endian payload for the given access width.
///
/// Returns `None` when the value does not fit.
pub fn encode_value(value: f64, data_type: DataType, width: S7Width) -> Option<Vec<u8>> {
    match width {
        S7Width::Bit => Some(vec![u8::from(value != 0.0)]),
        S7Width::Byte => {
            let v = value.round();
            if !(0.0..=f64::from(u8::MAX)).contains(&v) {
                return None;
            }
            Some(vec![v as u8])
        }
        S7Width::Word => {
            let v = value.round();
            match data_type {
                DataType::UInt16 => {
                    if !(0.0..=f64::from(u16::MAX)).contains(&v) {
                        return None;
                    }
                    Some((v as u16).to_be_bytes().to_vec())
                }
                _ => {
                    if !(f64::from(i16::MIN)..=f64::from(i16::MAX)).contains(&v) {
                        return None;
                    }
                    Some((v as i16).to_be_bytes().to_vec())
                }
            }
        }
        S7Width::DWord => match data_type {
            DataType::Float => Some((value as f32).to_be_bytes().to_vec()),
            DataType::UInt32 => {
                let v = value.round();
                if !(0.0..=f64::from(u32::MAX)).contains(&v) {
                    return None;
                }
                Some((v as u32).to_be_bytes().to_vec())
            }
            _ => {
                let v = value.round();
                if !(f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(&v) {
                    return None;
                }
                Some((v as i32).to_be_bytes().to_vec())
            }
        },
    }
}

// =============================================================================
// Tests
// =============================================================================
