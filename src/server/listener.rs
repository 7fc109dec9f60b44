//! Unix domain socket listener.
//!
//! Built on `socket2` rather than the std listener for two reasons: the
//! listen backlog is explicit, and `accept` reports EINTR instead of
//! retrying internally, so an interrupt can cancel a blocking accept.

use super::StartupError;
use socket2::{Domain, SockAddr, Socket, Type};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

/// Bound, listening server socket with a switchable accept mode.
///
/// The socket starts in blocking mode; the server flips it per cycle
/// according to whether any sessions are connected.
pub struct Listener {
    socket: Socket,
    path: PathBuf,
    nonblocking: bool,
}

impl Listener {
    /// Create, bind, and start listening on `path`.
    pub fn bind(path: &Path, backlog: i32) -> Result<Self, StartupError> {
        let socket =
            Socket::new(Domain::UNIX, Type::STREAM, None).map_err(StartupError::Create)?;

        let addr = SockAddr::unix(path).map_err(|e| StartupError::Bind(path.to_owned(), e))?;
        socket
            .bind(&addr)
            .map_err(|e| StartupError::Bind(path.to_owned(), e))?;
        socket
            .listen(backlog)
            .map_err(|e| StartupError::Listen(path.to_owned(), e))?;

        Ok(Self {
            socket,
            path: path.to_owned(),
            nonblocking: false,
        })
    }

    /// Switch the accept mode. No syscall when already in the requested mode.
    pub fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        if self.nonblocking != nonblocking {
            self.socket.set_nonblocking(nonblocking)?;
            self.nonblocking = nonblocking;
        }
        Ok(())
    }

    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking
    }

    /// Accept one pending connection.
    ///
    /// Returns `Ok(None)` when the socket is non-blocking and nothing is
    /// pending. EINTR is passed through to the caller, which is what lets a
    /// blocking accept notice an interrupt.
    pub fn accept_next(&self) -> io::Result<Option<(mio::net::UnixStream, SockAddr)>> {
        match self.socket.accept() {
            Ok((socket, peer)) => {
                // Accepted sockets do not inherit the listener's mode; mio
                // registration requires non-blocking.
                socket.set_nonblocking(true)?;
                let stream = mio::net::UnixStream::from_std(socket.into());
                Ok(Some((stream, peer)))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the socket and remove the socket file.
    pub fn close_and_unlink(self) -> io::Result<()> {
        let Listener { socket, path, .. } = self;
        drop(socket);
        std::fs::remove_file(path)
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}
