// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Fixed-size wire frames. There is no length prefix: a frame's size is its
// framing. All integers are little-endian.
//
//   Message: tag(i64) | sender(i32) | request(i32) | payload(10 × i32)   56 bytes
//   LogLine: tag(i64) | sender(i32) | text(256 bytes, space padded)       268 bytes

use std::io::{self, Read, Write};

use crate::error::{Error, Result};
use crate::record::{Record, RECORD_FIELDS};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Constant frame tag.
pub const MSG_TAG: i64 = 1;

/// Integers in a message payload.
pub const PAYLOAD_LEN: usize = 10;

pub const MESSAGE_SIZE: usize = 8 + 4 + 4 + PAYLOAD_LEN * 4;

/// Capacity of a log-line frame's text buffer.
pub const LOG_TEXT_LEN: usize = 256;

pub const LOG_LINE_SIZE: usize = 8 + 4 + LOG_TEXT_LEN;

/// Ordinal asking the server for every record.
pub const DISPLAY_ALL: i32 = -999;

/// Request field of a message that asks for nothing (hello frames) and of
/// a negative acknowledgement from the server.
pub const NO_REQUEST: i32 = -1;

/// Payload slot carrying the zero-based ordinal of a modify request.
pub const MODIFY_ORDINAL_SLOT: usize = 9;

// ---------------------------------------------------------------------------
// RequestCode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCode {
    Create = 1,
    Display = 2,
    Modify = 3,
    ShowLog = 4,
    Count = 10,
    Disconnect = 99,
}

impl RequestCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for RequestCode {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self> {
        Ok(match code {
            1 => RequestCode::Create,
            2 => RequestCode::Display,
            3 => RequestCode::Modify,
            4 => RequestCode::ShowLog,
            10 => RequestCode::Count,
            99 => RequestCode::Disconnect,
            other => return Err(Error::UnknownRequest(other)),
        })
    }
}

fn read_frame<R: Read, const N: usize>(r: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    match r.read_exact(&mut buf) {
        Ok(()) => Ok(buf),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::ConnectionClosed),
        Err(e) => Err(e.into()),
    }
}

fn i32_at(buf: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn i64_at(buf: &[u8], at: usize) -> i64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    i64::from_le_bytes(b)
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Request/response frame. The same layout travels in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub tag: i64,
    pub sender: i32,
    /// A [`RequestCode`] from a client; in some replies, a count.
    pub request: i32,
    pub payload: [i32; PAYLOAD_LEN],
}

impl Message {
    /// Default frame: no request, zeroed payload.
    pub fn new(sender: i32) -> Self {
        Self {
            tag: MSG_TAG,
            sender,
            request: NO_REQUEST,
            payload: [0; PAYLOAD_LEN],
        }
    }

    pub fn request(sender: i32, code: RequestCode) -> Self {
        Self {
            request: code.as_i32(),
            ..Self::new(sender)
        }
    }

    /// Decode the request field as a code.
    pub fn code(&self) -> Result<RequestCode> {
        RequestCode::try_from(self.request)
    }

    /// Copy `record` into payload slots 0..9, leaving slot 9 alone.
    pub fn with_record(mut self, record: &Record) -> Self {
        self.payload[..RECORD_FIELDS].copy_from_slice(record.fields());
        self
    }

    /// Payload slots 0..9 as a record.
    pub fn record(&self) -> Record {
        let mut fields = [0i32; RECORD_FIELDS];
        fields.copy_from_slice(&self.payload[..RECORD_FIELDS]);
        Record::new(fields)
    }

    pub fn is_refusal(&self) -> bool {
        self.request == NO_REQUEST
    }

    pub fn encode(&self) -> [u8; MESSAGE_SIZE] {
        let mut out = [0u8; MESSAGE_SIZE];
        out[0..8].copy_from_slice(&self.tag.to_le_bytes());
        out[8..12].copy_from_slice(&self.sender.to_le_bytes());
        out[12..16].copy_from_slice(&self.request.to_le_bytes());
        for (i, v) in self.payload.iter().enumerate() {
            let at = 16 + i * 4;
            out[at..at + 4].copy_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn decode(buf: &[u8; MESSAGE_SIZE]) -> Self {
        let mut payload = [0i32; PAYLOAD_LEN];
        for (i, v) in payload.iter_mut().enumerate() {
            *v = i32_at(buf, 16 + i * 4);
        }
        Self {
            tag: i64_at(buf, 0),
            sender: i32_at(buf, 8),
            request: i32_at(buf, 12),
            payload,
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.encode())?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self::decode(&read_frame::<R, MESSAGE_SIZE>(r)?))
    }
}

// ---------------------------------------------------------------------------
// LogLine
// ---------------------------------------------------------------------------

/// One line of the server log in transit.
#[derive(Clone, PartialEq, Eq)]
pub struct LogLine {
    pub tag: i64,
    pub sender: i32,
    text: [u8; LOG_TEXT_LEN],
}

impl LogLine {
    /// Text longer than the buffer is cut at a character boundary. The
    /// content is followed by a NUL when it fits, then spaces.
    pub fn new(sender: i32, text: &str) -> Self {
        let mut buf = [b' '; LOG_TEXT_LEN];
        let mut end = text.len().min(LOG_TEXT_LEN - 1);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        buf[..end].copy_from_slice(&text.as_bytes()[..end]);
        buf[end] = 0;
        Self {
            tag: MSG_TAG,
            sender,
            text: buf,
        }
    }

    /// The carried text: up to the first NUL, or the buffer without its
    /// space padding when there is none.
    pub fn text(&self) -> String {
        let content = match self.text.iter().position(|&b| b == 0) {
            Some(end) => &self.text[..end],
            None => {
                let end = self
                    .text
                    .iter()
                    .rposition(|&b| b != b' ')
                    .map_or(0, |i| i + 1);
                &self.text[..end]
            }
        };
        String::from_utf8_lossy(content).into_owned()
    }

    pub fn encode(&self) -> [u8; LOG_LINE_SIZE] {
        let mut out = [0u8; LOG_LINE_SIZE];
        out[0..8].copy_from_slice(&self.tag.to_le_bytes());
        out[8..12].copy_from_slice(&self.sender.to_le_bytes());
        out[12..].copy_from_slice(&self.text);
        out
    }

    pub fn decode(buf: &[u8; LOG_LINE_SIZE]) -> Self {
        let mut text = [0u8; LOG_TEXT_LEN];
        text.copy_from_slice(&buf[12..]);
        Self {
            tag: i64_at(buf, 0),
            sender: i32_at(buf, 8),
            text,
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.encode())?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self::decode(&read_frame::<R, LOG_LINE_SIZE>(r)?))
    }
}

impl std::fmt::Debug for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogLine")
            .field("tag", &self.tag)
            .field("sender", &self.sender)
            .field("text", &self.text())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_sizes() {
        assert_eq!(MESSAGE_SIZE, 56);
        assert_eq!(LOG_LINE_SIZE, 268);
    }

    #[test]
    fn default_message() {
        let m = Message::new(4242);
        assert_eq!(m.tag, MSG_TAG);
        assert_eq!(m.sender, 4242);
        assert_eq!(m.request, NO_REQUEST);
        assert_eq!(m.payload, [0; PAYLOAD_LEN]);
    }

    #[test]
    fn message_bytes_are_exact() {
        let mut m = Message::request(7, RequestCode::Modify);
        m.payload = [2018, 1, 2, 3, 4, 5, 6, 7, 8, -1];
        let bytes = m.encode();
        assert_eq!(&bytes[0..8], &1i64.to_le_bytes());
        assert_eq!(&bytes[8..12], &7i32.to_le_bytes());
        assert_eq!(&bytes[12..16], &3i32.to_le_bytes());
        assert_eq!(&bytes[52..56], &(-1i32).to_le_bytes());
        assert_eq!(Message::decode(&bytes), m);
    }

    #[test]
    fn unknown_codes_are_rejected() {
        for code in [0, 5, 9, 11, 98, 100, -1] {
            assert!(matches!(
                RequestCode::try_from(code),
                Err(Error::UnknownRequest(c)) if c == code
            ));
        }
        assert_eq!(RequestCode::try_from(99).unwrap(), RequestCode::Disconnect);
    }

    #[test]
    fn record_rides_in_first_nine_slots() {
        let r = Record::new([2018, 1, 2, 3, 4, 5, 6, 7, 8]);
        let mut m = Message::request(1, RequestCode::Create).with_record(&r);
        m.payload[MODIFY_ORDINAL_SLOT] = 41;
        assert_eq!(m.record(), r);
        assert_eq!(m.payload[9], 41);
    }

    #[test]
    fn log_line_text_survives_padding() {
        let l = LogLine::new(3, "Client PID: 12 | Operation: connected");
        let back = LogLine::decode(&l.encode());
        assert_eq!(back.text(), "Client PID: 12 | Operation: connected");
        assert_eq!(back.sender, 3);
    }

    #[test]
    fn log_line_without_nul_trims_spaces() {
        let mut raw = [b' '; LOG_LINE_SIZE];
        raw[..8].copy_from_slice(&1i64.to_le_bytes());
        raw[8..12].copy_from_slice(&5i32.to_le_bytes());
        raw[12..17].copy_from_slice(b"hello");
        assert_eq!(LogLine::decode(&raw).text(), "hello");
    }

    #[test]
    fn long_log_line_is_truncated() {
        let long = "x".repeat(400);
        let l = LogLine::new(1, &long);
        assert_eq!(l.text().len(), LOG_TEXT_LEN - 1);
    }

    #[test]
    fn short_read_is_connection_closed() {
        let bytes = Message::new(1).encode();
        let mut cut = &bytes[..20];
        assert!(matches!(
            Message::read_from(&mut cut),
            Err(Error::ConnectionClosed)
        ));
    }
}
