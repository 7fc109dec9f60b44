//! Interactive client for a muxd server.
//!
//! Connects, acknowledges the server's greeting, then forwards one line
//! of stdin per prompt. Typing `quit` ends the session; the server
//! closes it without a reply, so quit is also where this loop stops.

use clap::Parser;
use muxd::protocol::{self, QUIT};
use std::io::{self, BufRead, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "muxd_client")]
#[command(about = "Interactive client for a muxd server", long_about = None)]
struct Args {
    /// Path of the server socket
    socket: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut stream = UnixStream::connect(&args.socket)?;

    let greeting = protocol::read_frame(&mut stream)?;
    println!("Server says '{}'", String::from_utf8_lossy(&greeting));
    protocol::write_frame(&mut stream, b"THANKS")?;

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        // The server answers every frame with a prompt, the THANKS
        // acknowledgment included, so a prompt is always pending here.
        let prompt = match protocol::read_frame(&mut stream) {
            Ok(frame) => frame,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                println!("Server closed the connection");
                break;
            }
            Err(e) => return Err(e.into()),
        };
        print!("{}: ", String::from_utf8_lossy(&prompt));
        io::stdout().flush()?;

        let line = match lines.next() {
            Some(line) => line?,
            None => break,
        };

        protocol::write_frame(&mut stream, line.as_bytes())?;
        if line.as_bytes() == QUIT {
            break;
        }
    }

    Ok(())
}
