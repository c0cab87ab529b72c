//! Binary framing spoken by the sensor mat firmware.
//!
//! After the port opens the device sends a single ready byte. Each frame is
//! then requested with a trigger byte and answered with a little-endian
//! `u16` row count, a `u16` column count and `rows * cols` `u16` readings in
//! row-major order.

use std::io::{self, Read};

use crate::error::ProtocolError;
use crate::grid::Frame;

/// Byte the device sends once it has finished booting.
pub const READY_SIGNAL: u8 = 0x01;
/// Byte the host writes to ask for one frame.
pub const REQUEST_TRIGGER: u8 = 0x01;
/// Largest accepted row or column count in a frame header.
pub const MAX_FRAME_DIM: u16 = 256;

const HEADER_LEN: usize = 4;

pub fn encode_ready_check() -> u8 {
    READY_SIGNAL
}

pub fn encode_request() -> u8 {
    REQUEST_TRIGGER
}

/// Reads one complete frame from `reader`.
///
/// The header is checked against [`MAX_FRAME_DIM`] before the payload is
/// read, so a corrupted header cannot trigger an unbounded allocation.
pub fn decode_frame<R: Read + ?Sized>(reader: &mut R) -> Result<Frame, ProtocolError> {
    let mut header = [0u8; HEADER_LEN];
    read_full(reader, &mut header)?;
    let rows = u16::from_le_bytes([header[0], header[1]]);
    let cols = u16::from_le_bytes([header[2], header[3]]);

    if rows > MAX_FRAME_DIM || cols > MAX_FRAME_DIM {
        return Err(ProtocolError::OversizedFrame {
            rows,
            cols,
            max: MAX_FRAME_DIM,
        });
    }
    if rows == 0 || cols == 0 {
        return Err(ProtocolError::EmptyFrame { rows, cols });
    }

    let (rows, cols) = (rows as usize, cols as usize);
    let mut payload = vec![0u8; rows * cols * 2];
    read_full(reader, &mut payload)?;

    let values = payload
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Frame::from_vec(rows, cols, values).ok_or(ProtocolError::ShortRead {
        expected: rows * cols * 2,
        received: 0,
    })
}

/// Fills `buf` completely or reports how far it got.
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError> {
    let expected = buf.len();
    let mut received = 0;
    while received < expected {
        match reader.read(&mut buf[received..]) {
            Ok(0) => return Err(ProtocolError::ShortRead { expected, received }),
            Ok(n) => received += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut
                        | io::ErrorKind::WouldBlock
                        | io::ErrorKind::UnexpectedEof
                ) =>
            {
                return Err(ProtocolError::ShortRead { expected, received });
            }
            Err(e) => return Err(ProtocolError::Io(e)),
        }
    }
    Ok(())
}

/// Wire bytes for `frame`, as the firmware would send them.
#[cfg(test)]
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + frame.cells().len() * 2);
    out.extend_from_slice(&(frame.rows() as u16).to_le_bytes());
    out.extend_from_slice(&(frame.cols() as u16).to_le_bytes());
    for value in frame.cells() {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}
