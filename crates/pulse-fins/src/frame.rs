// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! FINS/TCP frame construction and parsing.
//!
//! FINS/TCP wraps each FINS command frame in a 16-byte TCP header:
//! `"FINS"` magic, a length field counting everything after it, a command
//! word, and an error word. A fresh connection performs a node-address
//! handshake (command 0/1) before any data frames (command 2) flow.
//!
//! The FINS command frame itself is a 10-byte routing header (ICF through
//! SID) followed by the 2-byte command code and its parameters. This module
//! only builds the memory-area read (0101) and write (0102) commands the
//! collector needs.

use pulse_core::error::HandlerError;

/// Magic prefix of every FINS/TCP frame.
pub const FINS_MAGIC: [u8; 4] = *b"FINS";

/// TCP-level command: client node-address request.
pub const TCP_CMD_NODE_REQUEST: u32 = 0;
/// TCP-level command: server node-address reply.
pub const TCP_CMD_NODE_REPLY: u32 = 1;
/// TCP-level command: FINS frame payload.
pub const TCP_CMD_FRAME: u32 = 2;

/// FINS command code: memory area read.
pub const CMD_MEMORY_READ: u16 = 0x0101;
/// FINS command code: memory area write.
pub const CMD_MEMORY_WRITE: u16 = 0x0102;

// =============================================================================
// Memory areas and addresses
// =============================================================================

/// Omron memory areas addressable by the collector, word access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryArea {
    /// CIO (core I/O) area.
    Cio,
    /// Work area (W).
    Work,
    /// Holding area (H).
    Holding,
    /// Auxiliary area (A), read-only on the PLC side.
    Auxiliary,
    /// Data memory (D).
    Data,
}

impl MemoryArea {
    /// FINS memory-area code for word access.
    pub fn word_code(&self) -> u8 {
        match self {
            Self::Cio => 0xB0,
            Self::Work => 0xB1,
            Self::Holding => 0xB2,
            Self::Auxiliary => 0xB3,
            Self::Data => 0x82,
        }
    }

    /// Area letter as written in address strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cio => "CIO",
            Self::Work => "W",
            Self::Holding => "H",
            Self::Auxiliary => "A",
            Self::Data => "D",
        }
    }

    /// Whether the collector may write to this area.
    pub fn is_writable(&self) -> bool {
        !matches!(self, Self::Auxiliary)
    }
}

/// One parsed FINS word address, e.g. `D100`, `W12`, `CIO50`.
///
/// A bare numeric address defaults to data memory, the conventional home of
/// process values on Omron controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinsAddress {
    /// Memory area.
    pub area: MemoryArea,
    /// Word offset within the area.
    pub offset: u16,
}

impl FinsAddress {
    /// Parses an address string. Returns `None` for malformed input.
    pub fn parse(address: &str) -> Option<Self> {
        let trimmed = address.trim().to_ascii_uppercase();
        let (area, rest) = if let Some(rest) = trimmed.strip_prefix("CIO") {
            (MemoryArea::Cio, rest)
        } else if let Some(rest) = trimmed.strip_prefix('D') {
            (MemoryArea::Data, rest)
        } else if let Some(rest) = trimmed.strip_prefix('W') {
            (MemoryArea::Work, rest)
        } else if let Some(rest) = trimmed.strip_prefix('H') {
            (MemoryArea::Holding, rest)
        } else if let Some(rest) = trimmed.strip_prefix('A') {
            (MemoryArea::Auxiliary, rest)
        } else {
            (MemoryArea::Data, trimmed.as_str())
        };
        let offset = rest.parse::<u16>().ok()?;
        Some(Self { area, offset })
    }
}

impl std::fmt::Display for FinsAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.area.as_str(), self.offset)
    }
}

// =============================================================================
// Frame construction
// =============================================================================

fn tcp_header(length: u32, command: u32) -> Vec<u8> {
    let mut frame = Vec::with_capacity(16 + length as usize - 8);
    frame.extend_from_slice(&FINS_MAGIC);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(&command.to_be_bytes());
    frame.extend_from_slice(&0u32.to_be_bytes()); // error code
    frame
}

/// Node-address handshake request. A client node of 0 asks the PLC to
/// assign one.
pub fn build_node_request() -> Vec<u8> {
    let mut frame = tcp_header(12, TCP_CMD_NODE_REQUEST);
    frame.extend_from_slice(&0u32.to_be_bytes()); // client node: auto-assign
    frame
}

/// Extracts `(client_node, server_node)` from a node-address reply body
/// (the bytes after the TCP command/error words).
pub fn parse_node_reply(body: &[u8]) -> Result<(u8, u8), HandlerError> {
    if body.len() < 8 {
        return Err(HandlerError::protocol(format!(
            "short FINS node-address reply: {} bytes",
            body.len()
        )));
    }
    Ok((body[3], body[7]))
}

/// Wraps a FINS command in the routing header and TCP framing.
pub fn build_command_frame(
    client_node: u8,
    server_node: u8,
    sid: u8,
    command: u16,
    params: &[u8],
) -> Vec<u8> {
    let fins_len = 10 + 2 + params.len();
    let mut frame = tcp_header((8 + fins_len) as u32, TCP_CMD_FRAME);
    // FINS routing header: command frame, response required, local network.
    frame.push(0x80); // ICF
    frame.push(0x00); // RSV
    frame.push(0x02); // GCT
    frame.push(0x00); // DNA
    frame.push(server_node); // DA1
    frame.push(0x00); // DA2
    frame.push(0x00); // SNA
    frame.push(client_node); // SA1
    frame.push(0x00); // SA2
    frame.push(sid);
    frame.extend_from_slice(&command.to_be_bytes());
    frame.extend_from_slice(params);
    frame
}

/// Memory-area read parameters: area code, word address, bit 0, word count.
pub fn build_read_params(address: FinsAddress, word_count: u16) -> Vec<u8> {
    let mut params = Vec::with_capacity(6);
    params.push(address.area.word_code());
    params.extend_from_slice(&address.offset.to_be_bytes());
    params.push(0x00);
    params.extend_from_slice(&word_count.to_be_bytes());
    params
}

/// Memory-area write parameters: addressing as for reads, followed by the
/// big-endian data words.
pub fn build_write_params(address: FinsAddress, words: &[u16]) -> Vec<u8> {
    let mut params = Vec::with_capacity(6 + words.len() * 2);
    params.push(address.area.word_code());
    params.extend_from_slice(&address.offset.to_be_bytes());
    params.push(0x00);
    params.extend_from_slice(&(words.len() as u16).to_be_bytes());
    for word in words {
        params.extend_from_slice(&word.to_be_bytes());
    }
    params
}

// =============================================================================
// Response parsing
// =============================================================================

/// Human-readable description for the common FINS end codes.
fn end_code_message(code: u16) -> String {
    let detail = match code {
        0x0101 => "area classification missing",
        0x0102 => "access size error",
        0x0103 => "address range error",
        0x0104 => "address range exceeded",
        0x1101 => "no such memory area",
        0x1103 => "address out of range",
        0x2101 => "area read-protected",
        0x2102 => "area write-protected",
        _ => "device rejected the request",
    };
    format!("FINS end code {:04X}: {}", code, detail)
}

/// Parses a FINS response frame (the bytes after the TCP command/error
/// words) into its data words.
///
/// Validates the routing header length, the echoed command code, and the
/// end code before decoding the big-endian payload words.
pub fn parse_command_response(body: &[u8], expected_command: u16) -> Result<Vec<u16>, HandlerError> {
    if body.len() < 14 {
        return Err(HandlerError::protocol(format!(
            "short FINS response: {} bytes",
            body.len()
        )));
    }
    let command = u16::from_be_bytes([body[10], body[11]]);
    if command != expected_command {
        return Err(HandlerError::protocol(format!(
            "FINS response command {:04X} does not match request {:04X}",
            command, expected_command
        )));
    }
    let end_code = u16::from_be_bytes([body[12], body[13]]);
    if end_code != 0 {
        return Err(HandlerError::protocol(end_code_message(end_code)));
    }
    let data = &body[14..];
    let words = data
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    Ok(words)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parsing() {
        assert_eq!(
            FinsAddress::parse("D100"),
            Some(FinsAddress {
                area: MemoryArea::Data,
                offset: 100
            })
        );
        assert_eq!(
            FinsAddress::parse("cio50"),
            Some(FinsAddress {
                area: MemoryArea::Cio,
                offset: 50
            })
        );
        assert_eq!(
            FinsAddress::parse("W12").map(|a| a.area),
            Some(MemoryArea::Work)
        );
        assert_eq!(
            FinsAddress::parse("H0").map(|a| a.area),
            Some(MemoryArea::Holding)
        );
        assert_eq!(
            FinsAddress::parse("A447").map(|a| a.area),
            Some(MemoryArea::Auxiliary)
        );
        // Bare numerics land in data memory.
        assert_eq!(
            FinsAddress::parse("250").map(|a| (a.area, a.offset)),
            Some((MemoryArea::Data, 250))
        );

        assert_eq!(FinsAddress::parse("DB1.DBW0"), None);
        assert_eq!(FinsAddress::parse(""), None);
        assert_eq!(FinsAddress::parse("D"), None);
    }

    #[test]
    fn test_area_codes() {
        assert_eq!(MemoryArea::Data.word_code(), 0x82);
        assert_eq!(MemoryArea::Cio.word_code(), 0xB0);
        assert_eq!(MemoryArea::Work.word_code(), 0xB1);
        assert!(!MemoryArea::Auxiliary.is_writable());
        assert!(MemoryArea::Data.is_writable());
    }

    #[test]
    fn test_node_request_shape() {
        let frame = build_node_request();
        assert_eq!(frame.len(), 20);
        assert_eq!(&frame[..4], b"FINS");
        assert_eq!(u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]), 12);
        assert_eq!(
            u32::from_be_bytes([frame[8], frame[9], frame[10], frame[11]]),
            TCP_CMD_NODE_REQUEST
        );
    }

    #[test]
    fn test_read_frame_shape() {
        let address = FinsAddress::parse("D100").unwrap();
        let params = build_read_params(address, 2);
        let frame = build_command_frame(5, 1, 7, CMD_MEMORY_READ, &params);

        assert_eq!(&frame[..4], b"FINS");
        // Length counts command + error + FINS frame.
        let length = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]);
        assert_eq!(length as usize, frame.len() - 8);
        // Routing: DA1 = server node, SA1 = client node, SID echoed.
        assert_eq!(frame[16], 0x80);
        assert_eq!(frame[20], 1);
        assert_eq!(frame[23], 5);
        assert_eq!(frame[25], 7);
        // Command code and read params.
        assert_eq!(&frame[26..28], &[0x01, 0x01]);
        assert_eq!(frame[28], 0x82);
        assert_eq!(&frame[29..31], &[0x00, 0x64]);
        assert_eq!(&frame[32..34], &[0x00, 0x02]);
    }

    #[test]
    fn test_response_parsing() {
        // Routing header (10) + command 0101 + end code 0000 + two words.
        let mut body = vec![0xC0, 0x00, 0x02, 0x00, 0x05, 0x00, 0x00, 0x01, 0x00, 0x07];
        body.extend_from_slice(&[0x01, 0x01, 0x00, 0x00, 0x12, 0x34, 0xAB, 0xCD]);

        let words = parse_command_response(&body, CMD_MEMORY_READ).unwrap();
        assert_eq!(words, vec![0x1234, 0xABCD]);
    }

    #[test]
    fn test_response_end_code_rejection() {
        let mut body = vec![0u8; 10];
        body.extend_from_slice(&[0x01, 0x01, 0x11, 0x03]);

        let err = parse_command_response(&body, CMD_MEMORY_READ).unwrap_err();
        assert!(matches!(err, HandlerError::Protocol { .. }));
        assert!(err.to_string().contains("1103"));
        // End-code rejections must not read as network failures.
        assert!(!err.is_network());
    }

    #[test]
    fn test_response_command_mismatch() {
        let mut body = vec![0u8; 10];
        body.extend_from_slice(&[0x01, 0x02, 0x00, 0x00]);
        assert!(parse_command_response(&body, CMD_MEMORY_READ).is_err());
    }

    #[test]
    fn test_node_reply_parsing() {
        let body = [0x00, 0x00, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(parse_node_reply(&body).unwrap(), (10, 1));
        assert!(parse_node_reply(&body[..4]).is_err());
    }

    #[test]
    fn test_write_params() {
        let address = FinsAddress::parse("W5").unwrap();
        let params = build_write_params(address, &[0x00FF, 0x1234]);
        assert_eq!(
            params,
            vec![0xB1, 0x00, 0x05, 0x00, 0x00, 0x02, 0x00, 0xFF, 0x12, 0x34]
        );
    }
}
