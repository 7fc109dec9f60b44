//! Command protocol framing.
//!
//! Every message on the wire is a frame: the payload bytes followed by a
//! single NUL terminator. The server greets each new session with `HELLO`,
//! answers every command frame with the `ENTERCMD` prompt, and closes the
//! session silently when the payload is exactly `quit`.

use bytes::{Bytes, BytesMut};
use std::io::{self, Read, Write};

/// Greeting frame written to a session immediately after accept.
/// The trailing NUL is part of the frame.
pub const GREETING: &[u8] = b"HELLO\0";

/// Prompt frame written in reply to every command except `quit`.
pub const PROMPT: &[u8] = b"ENTERCMD\0";

/// Payload that closes the session without a reply.
pub const QUIT: &[u8] = b"quit";

/// Result of scanning a session buffer for the next frame.
#[derive(Debug)]
pub enum FrameResult {
    /// A complete frame; payload without the terminator.
    Complete(Bytes),
    /// No terminator yet, wait for more bytes.
    Incomplete,
    /// The buffer reached the frame limit without a terminator.
    Oversize,
}

/// Split the next NUL-terminated frame off the front of `buf`.
///
/// `max_frame` bounds the whole frame, terminator included. A buffer that
/// reaches the bound without a terminator can never complete, so the caller
/// must drop the session.
pub fn split_frame(buf: &mut BytesMut, max_frame: usize) -> FrameResult {
    match find_nul(buf) {
        Some(pos) if pos + 1 <= max_frame => {
            let mut frame = buf.split_to(pos + 1);
            frame.truncate(pos);
            FrameResult::Complete(frame.freeze())
        }
        Some(_) => FrameResult::Oversize,
        None if buf.len() >= max_frame => FrameResult::Oversize,
        None => FrameResult::Incomplete,
    }
}

/// Whether a frame payload is the quit command. Exact match, no
/// case folding and no whitespace trimming.
pub fn is_quit(payload: &[u8]) -> bool {
    payload == QUIT
}

/// Find the first NUL in the buffer.
fn find_nul(buffer: &[u8]) -> Option<usize> {
    buffer.iter().position(|&b| b == 0)
}

/// Read one frame from a blocking stream, payload only.
///
/// Reads a byte at a time so nothing past the terminator is consumed;
/// the next frame stays in the socket for the next call.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut payload = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if reader.read(&mut byte)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-frame",
            ));
        }
        if byte[0] == 0 {
            return Ok(payload);
        }
        payload.push(byte[0]);
    }
}

/// Write one frame to a blocking stream: the payload plus its terminator.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(payload)?;
    writer.write_all(&[0])
}
