//! # uPMU Wire Framing
//!
//! This module provides `FrameDecoder`, an incremental state machine that extracts
//! complete messages from the byte stream of one device connection. TCP delivers data in
//! arbitrary chunks, so a single `feed` call may complete zero, one or several frames.
//!
//! ## Wire Format
//!
//! All integers are little-endian `u32`.
//!
//! ```text
//! ack_id:4 | path_len:4 | serial_len:4 | payload_len:4
//!   | path:path_len (padded to a multiple of 4)
//!   | serial:serial_len (padded to a multiple of 4)
//!   | payload:payload_len
//! ```
//!
//! The receiver answers every frame with 4 bytes: the echoed `ack_id` on success or
//! `FAILURE_ACK` on failure. Devices wait for that answer before sending the next frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::warn;

use crate::sync_output::common::FramingError;

/// Response written to the device when a frame could not be stored.
pub const FAILURE_ACK: [u8; 4] = [0; 4];

const ACK_ID_SIZE: usize = 4;
const LENGTHS_SIZE: usize = 12;

pub const DEFAULT_MAX_PATH_LEN: u32 = 512;
pub const DEFAULT_MAX_SERIAL_LEN: u32 = 32;
pub const DEFAULT_MAX_PAYLOAD_LEN: u32 = 75_744_000;

/// Rounds a declared length up to the next multiple of 4.
pub fn padded_len(len: u32) -> usize {
    (len as usize + 3) & !3
}

/// One complete application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub ack_id: [u8; 4],
    pub path: String,
    pub serial_number: String,
    pub payload: Bytes,
}

/// Upper bounds on declared lengths; anything larger is treated as a corrupt stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_path_len: u32,
    pub max_serial_len: u32,
    pub max_payload_len: u32,
}

impl Default for FrameLimits {
    fn default() -> Self {
        FrameLimits {
            max_path_len: DEFAULT_MAX_PATH_LEN,
            max_serial_len: DEFAULT_MAX_SERIAL_LEN,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

impl FrameLimits {
    fn check(&self, header: &FrameHeader) -> Result<(), FramingError> {
        if header.path_len > self.max_path_len {
            return Err(FramingError::PathTooLong {
                length: header.path_len,
                limit: self.max_path_len,
            });
        }
        if header.serial_len > self.max_serial_len {
            return Err(FramingError::SerialTooLong {
                length: header.serial_len,
                limit: self.max_serial_len,
            });
        }
        if header.payload_len > self.max_payload_len {
            return Err(FramingError::PayloadTooLong {
                length: header.payload_len,
                limit: self.max_payload_len,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    ack_id: [u8; 4],
    path_len: u32,
    serial_len: u32,
    payload_len: u32,
}

#[derive(Debug)]
enum DecodeState {
    AwaitingAckId,
    AwaitingLengths {
        ack_id: [u8; 4],
    },
    AwaitingPath {
        header: FrameHeader,
    },
    AwaitingSerial {
        header: FrameHeader,
        path: String,
    },
    AwaitingPayload {
        header: FrameHeader,
        path: String,
        serial_number: String,
    },
}

/// Incremental decoder for the frames of a single connection.
///
/// Buffered bytes are only consumed once a whole field is available, so feeding a stream
/// in any chunking yields the same frames as feeding it at once.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    state: DecodeState,
    limits: FrameLimits,
    serial_number: Option<String>,
    frames_decoded: u64,
    failure: Option<FramingError>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        FrameDecoder::new(FrameLimits::default())
    }
}

impl FrameDecoder {
    pub fn new(limits: FrameLimits) -> Self {
        FrameDecoder {
            buffer: BytesMut::with_capacity(8 * 1024),
            state: DecodeState::AwaitingAckId,
            limits,
            serial_number: None,
            frames_decoded: 0,
            failure: None,
        }
    }

    /// Appends `bytes` to the connection buffer and returns every frame completed by them.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<Frame>)`: Completed frames in stream order (possibly empty). When a bad
    ///   header follows them, the frames are still returned and the error is kept in
    ///   `failure()`.
    /// * `Err(FramingError)`: If a header declares lengths above the configured limits
    ///   and no frame was completed before it, or the decoder already failed. The stream
    ///   cannot be resynchronised afterwards; the caller should drop the connection.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, FramingError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        loop {
            match self.advance() {
                Ok(Some(frame)) => {
                    // Extra bytes are parsed as the next frame rather than discarded, so
                    // the result does not depend on how reads were split.
                    if !self.buffer.is_empty() {
                        warn!(
                            "got {} extra bytes after {}; peer sent before acknowledgment",
                            self.buffer.len(),
                            frame.path
                        );
                    }
                    frames.push(frame);
                }
                Ok(None) => return Ok(frames),
                Err(e) => {
                    self.failure = Some(e.clone());
                    if frames.is_empty() {
                        return Err(e);
                    }
                    return Ok(frames);
                }
            }
        }
    }

    /// Framing error that stopped this decoder, if any.
    pub fn failure(&self) -> Option<&FramingError> {
        self.failure.as_ref()
    }

    /// Serial number reported by the most recent frame.
    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    /// Number of bytes received but not yet part of a completed frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// True when no partial frame is pending.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, DecodeState::AwaitingAckId) && self.buffer.is_empty()
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    fn advance(&mut self) -> Result<Option<Frame>, FramingError> {
        loop {
            let state = std::mem::replace(&mut self.state, DecodeState::AwaitingAckId);
            self.state = match state {
                DecodeState::AwaitingAckId => {
                    if self.buffer.len() < ACK_ID_SIZE {
                        return Ok(None);
                    }
                    let mut ack_id = [0u8; 4];
                    self.buffer.copy_to_slice(&mut ack_id);
                    DecodeState::AwaitingLengths { ack_id }
                }
                DecodeState::AwaitingLengths { ack_id } => {
                    if self.buffer.len() < LENGTHS_SIZE {
                        self.state = DecodeState::AwaitingLengths { ack_id };
                        return Ok(None);
                    }
                    let header = FrameHeader {
                        ack_id,
                        path_len: self.buffer.get_u32_le(),
                        serial_len: self.buffer.get_u32_le(),
                        payload_len: self.buffer.get_u32_le(),
                    };
                    self.limits.check(&header)?;
                    DecodeState::AwaitingPath { header }
                }
                DecodeState::AwaitingPath { header } => {
                    let padded = padded_len(header.path_len);
                    if self.buffer.len() < padded {
                        self.state = DecodeState::AwaitingPath { header };
                        return Ok(None);
                    }
                    let raw = self.buffer.split_to(padded);
                    let path = String::from_utf8_lossy(&raw[..header.path_len as usize]).into_owned();
                    DecodeState::AwaitingSerial { header, path }
                }
                DecodeState::AwaitingSerial { header, path } => {
                    let padded = padded_len(header.serial_len);
                    if self.buffer.len() < padded {
                        self.state = DecodeState::AwaitingSerial { header, path };
                        return Ok(None);
                    }
                    let raw = self.buffer.split_to(padded);
                    let serial_number =
                        String::from_utf8_lossy(&raw[..header.serial_len as usize]).into_owned();
                    self.note_serial(&serial_number);
                    DecodeState::AwaitingPayload {
                        header,
                        path,
                        serial_number,
                    }
                }
                DecodeState::AwaitingPayload {
                    header,
                    path,
                    serial_number,
                } => {
                    let len = header.payload_len as usize;
                    if self.buffer.len() < len {
                        self.state = DecodeState::AwaitingPayload {
                            header,
                            path,
                            serial_number,
                        };
                        return Ok(None);
                    }
                    let payload = self.buffer.split_to(len).freeze();
                    self.frames_decoded += 1;
                    return Ok(Some(Frame {
                        ack_id: header.ack_id,
                        path,
                        serial_number,
                        payload,
                    }));
                }
            };
        }
    }

    fn note_serial(&mut self, serial_number: &str) {
        match &self.serial_number {
            Some(previous) if previous != serial_number => {
                warn!(
                    "serial number changed from {} to {}; updating serial number for next write",
                    previous, serial_number
                );
            }
            _ => {}
        }
        self.serial_number = Some(serial_number.to_string());
    }
}

/// Encodes one frame in wire format, padding path and serial with zero bytes.
pub fn encode_frame(ack_id: [u8; 4], path: &str, serial_number: &str, payload: &[u8]) -> Vec<u8> {
    let path_padded = padded_len(path.len() as u32);
    let serial_padded = padded_len(serial_number.len() as u32);
    let mut out = BytesMut::with_capacity(
        ACK_ID_SIZE + LENGTHS_SIZE + path_padded + serial_padded + payload.len(),
    );

    out.put_slice(&ack_id);
    out.put_u32_le(path.len() as u32);
    out.put_u32_le(serial_number.len() as u32);
    out.put_u32_le(payload.len() as u32);
    out.put_slice(path.as_bytes());
    out.put_bytes(0, path_padded - path.len());
    out.put_slice(serial_number.as_bytes());
    out.put_bytes(0, serial_padded - serial_number.len());
    out.put_slice(payload);
    out.to_vec()
}
