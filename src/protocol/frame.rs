//! MAPI frame codec: transport-level message boundaries over a byte stream.
//!
//! A frame is a 2-byte little-endian header (bit 0 is the final flag, bits
//! 1-15 the payload length) followed by that many payload bytes. A logical
//! message is the concatenation of payloads up to and including the frame
//! whose final bit is set.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::error::{Error, Result};

/// The largest payload a single frame may carry.
pub const MAX_FRAME_PAYLOAD: usize = 8190;

/// Splits `message` into wire-ready frames. Empty messages serialise as the
/// single frame `0x01 0x00` (length 0, final bit set).
pub fn encode_frames(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 2);

    if message.is_empty() {
        write_header(&mut out, 0, true);
        return out;
    }

    let mut offset = 0;
    while offset < message.len() {
        let remaining = message.len() - offset;
        let chunk_len = remaining.min(MAX_FRAME_PAYLOAD);
        let is_final = chunk_len == remaining;
        write_header(&mut out, chunk_len, is_final);
        out.extend_from_slice(&message[offset..offset + chunk_len]);
        offset += chunk_len;
    }

    out
}

fn write_header(out: &mut Vec<u8>, len: usize, fin: bool) {
    let header = ((len as u16) << 1) | (fin as u16);
    out.extend_from_slice(&header.to_le_bytes());
}

/// Reads one logical message (one or more frames) from `reader`. This is the
/// purely mechanical half of `Framer::receive` - it does not interpret the
/// result as a possible server error, which lets it be round-trip tested
/// against [`encode_frames`] directly.
pub fn decode_message<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut message = Vec::new();

    loop {
        let mut header_bytes = [0u8; 2];
        reader.read_exact(&mut header_bytes)?;
        let header = u16::from_le_bytes(header_bytes);
        let fin = header & 1 == 1;
        let len = (header >> 1) as usize;

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;
        message.extend_from_slice(&payload);

        if fin {
            break;
        }
    }

    Ok(message)
}

/// Parses a raw error payload of the form `!<decimal_code>!<message>`. Falls
/// back to `{code: None, message: payload}` if the code segment does not
/// parse as an integer.
pub fn parse_error_payload(payload: &[u8]) -> Error {
    let text = String::from_utf8_lossy(payload);
    let text = text.trim_end_matches(['\n', '\r']);

    let Some(rest) = text.strip_prefix('!') else {
        return Error::server(None, text.to_string());
    };

    if let Some((code_str, message)) = rest.split_once('!') {
        if let Ok(code) = code_str.parse::<i32>() {
            return Error::server(Some(code), message.to_string());
        }
    }

    Error::server(None, text.to_string())
}

/// Owns the TCP socket and turns it into a framed message channel.
pub struct Framer {
    stream: TcpStream,
}

impl Framer {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub fn set_timeouts(&self, read: Duration, write: Duration) -> Result<()> {
        self.stream.set_read_timeout(Some(read))?;
        self.stream.set_write_timeout(Some(write))?;
        Ok(())
    }

    pub fn peer_stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Sends a pre-built logical message, splitting it into frames.
    pub fn send(&mut self, message: &[u8]) -> Result<()> {
        let framed = encode_frames(message);
        self.stream.write_all(&framed)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Sends a MAPI control command: `X<command>\n`.
    pub fn send_command(&mut self, command: &str) -> Result<()> {
        let mut message = Vec::with_capacity(command.len() + 2);
        message.push(b'X');
        message.extend_from_slice(command.as_bytes());
        message.push(b'\n');
        self.send(&message)
    }

    /// Sends a SQL query: `s<sql>;`.
    pub fn send_query(&mut self, sql: &str) -> Result<()> {
        let mut message = Vec::with_capacity(sql.len() + 2);
        message.push(b's');
        message.extend_from_slice(sql.as_bytes());
        message.push(b';');
        self.send(&message)
    }

    /// Sends a raw line of protocol text, terminated the way `prepare`,
    /// `exec`, `deallocate`, `commit`, `rollback`, `start transaction` and
    /// `set ...` are: no prefix byte, just the text itself.
    pub fn send_text(&mut self, text: &str) -> Result<()> {
        self.send(text.as_bytes())
    }

    /// Reads one logical message and, if it is a server error payload,
    /// returns it as `Err`.
    pub fn receive(&mut self) -> Result<Vec<u8>> {
        let message = decode_message(&mut self.stream)?;
        if message.first() == Some(&b'!') {
            return Err(parse_error_payload(&message));
        }
        Ok(message)
    }
}
