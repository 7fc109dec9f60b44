//! Per-session command servicing.
//!
//! A session that polls readable is drained to `WouldBlock`, then every
//! complete frame in its buffer is answered in arrival order. The poller
//! is edge-triggered, so stopping short of `WouldBlock` could strand
//! buffered bytes until the client sends again.

use super::registry::ClientSession;
use crate::protocol::{self, FrameResult};
use std::io::{self, Read, Write};
use tracing::debug;

/// Why a session has to go.
#[derive(Debug)]
pub enum CloseReason {
    /// Client sent the quit command.
    Quit,
    /// Client closed its end.
    Eof,
    /// Frame grew past the configured bound with no terminator in sight.
    OversizeFrame,
    /// Read failed.
    Read(io::Error),
    /// Reply could not be written, including a client that has stopped
    /// draining its socket.
    Write(io::Error),
}

/// Write the greeting and mark the session active.
pub fn greet(session: &mut ClientSession) -> io::Result<()> {
    session.stream.write_all(protocol::GREETING)?;
    session.activate();
    Ok(())
}

/// Service a session that polled readable.
///
/// `scratch` is the caller-owned read buffer, shared across sessions
/// and cycles; its length sets the frame-size bound. Returns the reason
/// the session must close, or `None` while it stays active. The caller
/// owns marking and sweeping; nothing is removed here.
pub fn service_readable(session: &mut ClientSession, scratch: &mut [u8]) -> Option<CloseReason> {
    loop {
        match session.stream.read(scratch) {
            Ok(0) => return Some(CloseReason::Eof),
            Ok(n) => {
                session.buf.extend_from_slice(&scratch[..n]);
                if let Some(reason) = answer_frames(session, scratch.len()) {
                    return Some(reason);
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return None,
            Err(e) => return Some(CloseReason::Read(e)),
        }
    }
}

/// Answer every complete frame buffered on the session.
///
/// `quit` wins immediately: the session closes without a reply and any
/// bytes after it are discarded.
fn answer_frames(session: &mut ClientSession, frame_size: usize) -> Option<CloseReason> {
    loop {
        match protocol::split_frame(&mut session.buf, frame_size) {
            FrameResult::Complete(payload) => {
                if protocol::is_quit(&payload) {
                    return Some(CloseReason::Quit);
                }
                debug!(
                    session = session.id,
                    command = %String::from_utf8_lossy(&payload),
                    "Command received"
                );
                if let Err(e) = session.stream.write_all(protocol::PROMPT) {
                    return Some(CloseReason::Write(e));
                }
            }
            FrameResult::Incomplete => return None,
            FrameResult::Oversize => return Some(CloseReason::OversizeFrame),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::registry::{SessionRegistry, SessionState};
    use super::*;
    use mio::net::UnixStream;
    use socket2::SockAddr;

    fn session_pair(registry: &mut SessionRegistry) -> (u64, UnixStream) {
        let (server_end, client_end) = UnixStream::pair().unwrap();
        let id = registry.add(server_end, SockAddr::unix("").unwrap());
        (id, client_end)
    }

    fn read_available(stream: &mut UnixStream) -> Vec<u8> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => panic!("read failed: {}", e),
            }
        }
        out
    }

    #[test]
    fn test_greet_writes_hello() {
        let mut registry = SessionRegistry::new();
        let (id, mut client) = session_pair(&mut registry);
        let session = registry.get_mut(id).unwrap();

        greet(session).unwrap();
        assert!(matches!(session.state, SessionState::Active));
        assert_eq!(read_available(&mut client), b"HELLO\0");
    }

    #[test]
    fn test_command_answered_with_prompt() {
        let mut registry = SessionRegistry::new();
        let (id, mut client) = session_pair(&mut registry);
        let session = registry.get_mut(id).unwrap();
        session.activate();

        client.write_all(b"status\0").unwrap();
        let mut scratch = [0u8; 1024];
        assert!(service_readable(session, &mut scratch).is_none());
        assert_eq!(read_available(&mut client), b"ENTERCMD\0");
        assert!(session.buf.is_empty());
    }

    #[test]
    fn test_each_frame_gets_a_prompt() {
        let mut registry = SessionRegistry::new();
        let (id, mut client) = session_pair(&mut registry);
        let session = registry.get_mut(id).unwrap();
        session.activate();

        client.write_all(b"one\0two\0").unwrap();
        let mut scratch = [0u8; 1024];
        assert!(service_readable(session, &mut scratch).is_none());
        assert_eq!(read_available(&mut client), b"ENTERCMD\0ENTERCMD\0");
    }

    #[test]
    fn test_quit_closes_without_reply() {
        let mut registry = SessionRegistry::new();
        let (id, mut client) = session_pair(&mut registry);
        let session = registry.get_mut(id).unwrap();
        session.activate();

        client.write_all(b"quit\0").unwrap();
        let mut scratch = [0u8; 1024];
        match service_readable(session, &mut scratch) {
            Some(CloseReason::Quit) => {}
            other => panic!("unexpected: {:?}", other),
        }
        assert!(read_available(&mut client).is_empty());
    }

    #[test]
    fn test_quit_split_across_reads() {
        let mut registry = SessionRegistry::new();
        let (id, mut client) = session_pair(&mut registry);
        let session = registry.get_mut(id).unwrap();
        session.activate();

        // A partial frame draws no reply and stays buffered.
        let mut scratch = [0u8; 1024];
        client.write_all(b"qu").unwrap();
        assert!(service_readable(session, &mut scratch).is_none());
        assert_eq!(read_available(&mut client), b"");

        client.write_all(b"it\0").unwrap();
        match service_readable(session, &mut scratch) {
            Some(CloseReason::Quit) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_command_then_quit_in_one_read() {
        let mut registry = SessionRegistry::new();
        let (id, mut client) = session_pair(&mut registry);
        let session = registry.get_mut(id).unwrap();
        session.activate();

        client.write_all(b"hi\0quit\0trailing").unwrap();
        let mut scratch = [0u8; 1024];
        match service_readable(session, &mut scratch) {
            Some(CloseReason::Quit) => {}
            other => panic!("unexpected: {:?}", other),
        }
        // The command before quit was answered; quit itself was not.
        assert_eq!(read_available(&mut client), b"ENTERCMD\0");
    }

    #[test]
    fn test_eof_tears_down() {
        let mut registry = SessionRegistry::new();
        let (id, client) = session_pair(&mut registry);
        let session = registry.get_mut(id).unwrap();
        session.activate();

        drop(client);
        let mut scratch = [0u8; 1024];
        match service_readable(session, &mut scratch) {
            Some(CloseReason::Eof) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_oversize_frame_tears_down() {
        let mut registry = SessionRegistry::new();
        let (id, mut client) = session_pair(&mut registry);
        let session = registry.get_mut(id).unwrap();
        session.activate();

        client.write_all(&[b'a'; 16]).unwrap();
        let mut scratch = [0u8; 8];
        match service_readable(session, &mut scratch) {
            Some(CloseReason::OversizeFrame) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_scratch_reuse_does_not_leak() {
        let mut registry = SessionRegistry::new();
        let (first_id, mut first_client) = session_pair(&mut registry);
        let (second_id, mut second_client) = session_pair(&mut registry);
        registry.get_mut(first_id).unwrap().activate();
        registry.get_mut(second_id).unwrap().activate();

        // One buffer services both sessions, long command first.
        let mut scratch = [0u8; 64];

        first_client.write_all(b"a considerably longer command\0").unwrap();
        let first = registry.get_mut(first_id).unwrap();
        assert!(service_readable(first, &mut scratch).is_none());
        assert_eq!(read_available(&mut first_client), b"ENTERCMD\0");

        second_client.write_all(b"hi\0").unwrap();
        let second = registry.get_mut(second_id).unwrap();
        assert!(service_readable(second, &mut scratch).is_none());
        assert_eq!(read_available(&mut second_client), b"ENTERCMD\0");
        assert!(second.buf.is_empty());
    }
}
