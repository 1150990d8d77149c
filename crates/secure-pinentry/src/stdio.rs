//! Unbuffered protocol output.
//!
//! `tokio::io::stdout` copies every write into an internal buffer for its
//! blocking-pool writer, and that buffer is never zeroed. Responses, secret
//! data lines included, go through [`UnbufferedStdout`] instead, which hands
//! each slice directly to `write(2)` on a duplicate of fd 1.
//!
//! Writes block the calling thread. The server handles one command at a
//! time on a single-threaded runtime, so there is nothing else to run while
//! the caller drains the pipe.

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::AsFd;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

/// Writer for the process's stdout without intermediate buffering.
#[derive(Debug)]
pub struct UnbufferedStdout {
    file: File,
}

impl UnbufferedStdout {
    /// Duplicate the process's stdout.
    pub fn new() -> io::Result<Self> {
        let fd = io::stdout().as_fd().try_clone_to_owned()?;
        Ok(Self::from_file(File::from(fd)))
    }

    /// Write to `file` instead of stdout.
    pub fn from_file(file: File) -> Self {
        Self { file }
    }
}

impl AsyncWrite for UnbufferedStdout {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let file = &mut self.get_mut().file;
        loop {
            match file.write(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => return Poll::Ready(result),
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Nothing is held back
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
