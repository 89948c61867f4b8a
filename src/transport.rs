//! Byte-stream transport for STOMP frames.
//!
//! A [`Transport`] opens a connection and hands back two halves: a
//! [`FrameWriter`] kept by the engine for requests, and a [`FrameReader`]
//! moved into the receive thread. Closing the writer must unblock a read in
//! progress on the reader so the receive thread can be joined promptly.
//!
//! [`TcpTransport`] is the production implementation: one `TcpStream`,
//! cloned for the reader, frames terminated by a NUL byte.

// Rust guideline compliant 2026-02

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::frame::{FrameSplitter, FRAME_TERMINATOR};

/// Opens connections to a broker.
pub trait Transport: Send + Sync {
    /// Open a fresh connection and split it into writer and reader halves.
    fn open(&self) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>)>;
}

/// Write half of an open connection.
pub trait FrameWriter: Send {
    /// Write one frame followed by the terminator.
    fn write_frame(&mut self, frame: &str) -> Result<()>;

    /// Close the connection. A blocked [`FrameReader::read_frame`] on the
    /// paired reader must return an error afterwards.
    fn close(&mut self);
}

/// Read half of an open connection.
pub trait FrameReader: Send {
    /// Block until one complete frame arrives and return it without its
    /// terminator.
    fn read_frame(&mut self) -> Result<String>;

    /// Bound (or unbound, with `None`) how long `read_frame` may block.
    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> Result<()> {
        Ok(())
    }
}

// ── TCP ─────────────────────────────────────────────────────────────────────

/// NUL-terminated frames over TCP.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    addr: String,
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Transport for a `host:port` broker address.
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
        }
    }

    /// Broker address this transport connects to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = self
            .addr
            .to_socket_addrs()
            .with_context(|| format!("resolve broker address {}", self.addr))?
            .collect();
        if addrs.is_empty() {
            bail!("broker address {} resolved to nothing", self.addr);
        }
        Ok(addrs)
    }
}

impl Transport for TcpTransport {
    fn open(&self) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>)> {
        let mut last_err = None;
        for addr in self.resolve()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    log::info!("[tcp] Connected to {addr}");
                    let reader = stream.try_clone().context("clone socket for reader")?;
                    return Ok((
                        Box::new(TcpFrameWriter { stream }),
                        Box::new(TcpFrameReader {
                            stream: reader,
                            splitter: FrameSplitter::new(),
                            pending: VecDeque::new(),
                        }),
                    ));
                }
                Err(e) => {
                    log::debug!("[tcp] Connect to {addr} failed: {e}");
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(e).with_context(|| format!("connect to broker {}", self.addr)),
            None => bail!("connect to broker {}", self.addr),
        }
    }
}

struct TcpFrameWriter {
    stream: TcpStream,
}

impl FrameWriter for TcpFrameWriter {
    fn write_frame(&mut self, frame: &str) -> Result<()> {
        let mut bytes = Vec::with_capacity(frame.len() + 1);
        bytes.extend_from_slice(frame.as_bytes());
        bytes.push(FRAME_TERMINATOR);
        self.stream.write_all(&bytes).context("write frame")?;
        self.stream.flush().context("flush frame")
    }

    fn close(&mut self) {
        // Shutdown reaches the cloned reader socket too; its blocked read
        // returns 0.
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            log::debug!("[tcp] Shutdown: {e}");
        }
    }
}

struct TcpFrameReader {
    stream: TcpStream,
    splitter: FrameSplitter,
    pending: VecDeque<String>,
}

impl FrameReader for TcpFrameReader {
    fn read_frame(&mut self) -> Result<String> {
        let mut buf = [0u8; 8192];
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(frame);
            }
            let n = self.stream.read(&mut buf).context("read from broker")?;
            if n == 0 {
                if self.splitter.has_partial() {
                    bail!("broker closed connection in the middle of a frame");
                }
                bail!("broker closed connection");
            }
            self.pending.extend(self.splitter.feed(&buf[..n])?);
        }
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.stream
            .set_read_timeout(timeout)
            .context("set broker socket read timeout")
    }
}
