//! In-memory broker for engine tests.
//!
//! `MemoryBroker` hands out a [`Transport`] whose writer records every frame
//! and answers like a broker would: CONNECTED (or ERROR) for CONNECT, RECEIPT
//! for any frame carrying a `receipt` header, and optionally a MESSAGE echo
//! for SEND. Tests can inject frames and cut the connection.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use stomp_client::frame::command;
use stomp_client::{Config, Frame, FrameReader, FrameWriter, Transport};

#[derive(Default)]
struct State {
    written: Mutex<Vec<String>>,
    inbox: Mutex<VecDeque<String>>,
    arrived: Condvar,
    closed: AtomicBool,
    opens: AtomicUsize,
    refuse_login: AtomicBool,
    silent: AtomicBool,
    no_receipts: AtomicBool,
    echo_sends: AtomicBool,
    fail_writes: AtomicBool,
    message_ids: AtomicUsize,
}

impl State {
    fn deliver(&self, frame: String) {
        self.inbox.lock().unwrap().push_back(frame);
        self.arrived.notify_all();
    }

    fn respond(&self, raw: &str) {
        let Ok(frame) = Frame::decode(raw) else {
            return;
        };
        if frame.command == command::CONNECT {
            if self.silent.load(Ordering::SeqCst) {
                return;
            }
            if self.refuse_login.load(Ordering::SeqCst) {
                self.deliver("ERROR\nmessage:Wrong password\n\n".to_string());
            } else {
                self.deliver("CONNECTED\nversion:1.2\n\n".to_string());
            }
            return;
        }
        if frame.command == command::SEND && self.echo_sends.load(Ordering::SeqCst) {
            let id = self.message_ids.fetch_add(1, Ordering::SeqCst);
            self.deliver(format!(
                "MESSAGE\ndestination:{}\nuser:{}\nmessage-id:{id}\nsubscription:1\n\n{}",
                frame.header("destination").unwrap_or_default(),
                frame.header("user").unwrap_or_default(),
                frame.body
            ));
        }
        if let Some(receipt) = frame.header("receipt") {
            if !self.no_receipts.load(Ordering::SeqCst) {
                self.deliver(format!("RECEIPT\nreceipt-id:{receipt}\n\n"));
            }
        }
    }
}

/// Test double for the broker side of a connection.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<State>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport connected to this broker.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            state: Arc::clone(&self.state),
        }
    }

    /// Answer CONNECT with ERROR.
    pub fn refuse_login(&self, refuse: bool) {
        self.state.refuse_login.store(refuse, Ordering::SeqCst);
    }

    /// Never answer CONNECT.
    pub fn silent(&self, silent: bool) {
        self.state.silent.store(silent, Ordering::SeqCst);
    }

    /// Stop sending RECEIPT frames.
    pub fn withhold_receipts(&self, withhold: bool) {
        self.state.no_receipts.store(withhold, Ordering::SeqCst);
    }

    /// Fan each SEND back to the client as a MESSAGE.
    pub fn echo_sends(&self, echo: bool) {
        self.state.echo_sends.store(echo, Ordering::SeqCst);
    }

    /// Make every subsequent client write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Push a raw frame to the client.
    pub fn inject(&self, frame: &str) {
        self.state.deliver(frame.to_string());
    }

    /// Drop the connection from the broker side.
    pub fn sever(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        self.state.arrived.notify_all();
    }

    /// How many times a connection was opened.
    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Every frame the client wrote, decoded, in order.
    pub fn frames(&self) -> Vec<Frame> {
        self.state
            .written
            .lock()
            .unwrap()
            .iter()
            .map(|raw| Frame::decode(raw).unwrap())
            .collect()
    }

    /// Frames the client wrote with the given command.
    pub fn frames_with(&self, command: &str) -> Vec<Frame> {
        self.frames()
            .into_iter()
            .filter(|frame| frame.command == command)
            .collect()
    }

    pub fn clear_frames(&self) {
        self.state.written.lock().unwrap().clear();
    }
}

pub struct MemoryTransport {
    state: Arc<State>,
}

impl Transport for MemoryTransport {
    fn open(&self) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>)> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        self.state.closed.store(false, Ordering::SeqCst);
        self.state.inbox.lock().unwrap().clear();
        Ok((
            Box::new(MemoryWriter {
                state: Arc::clone(&self.state),
            }),
            Box::new(MemoryReader {
                state: Arc::clone(&self.state),
                timeout: None,
            }),
        ))
    }
}

struct MemoryWriter {
    state: Arc<State>,
}

impl FrameWriter for MemoryWriter {
    fn write_frame(&mut self, frame: &str) -> Result<()> {
        if self.state.closed.load(Ordering::SeqCst) {
            bail!("connection closed");
        }
        if self.state.fail_writes.load(Ordering::SeqCst) {
            bail!("simulated write failure");
        }
        self.state.written.lock().unwrap().push(frame.to_string());
        self.state.respond(frame);
        Ok(())
    }

    fn close(&mut self) {
        self.state.closed.store(true, Ordering::SeqCst);
        self.state.arrived.notify_all();
    }
}

struct MemoryReader {
    state: Arc<State>,
    timeout: Option<Duration>,
}

impl FrameReader for MemoryReader {
    fn read_frame(&mut self) -> Result<String> {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        let mut inbox = self.state.inbox.lock().unwrap();
        loop {
            if let Some(frame) = inbox.pop_front() {
                return Ok(frame);
            }
            if self.state.closed.load(Ordering::SeqCst) {
                bail!("connection closed");
            }
            inbox = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        bail!("read timed out");
                    }
                    self.state.arrived.wait_timeout(inbox, deadline - now).unwrap().0
                }
                None => self.state.arrived.wait(inbox).unwrap(),
            };
        }
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }
}

/// Config with short timeouts for tests.
pub fn test_config() -> Config {
    Config {
        connect_timeout_secs: 1,
        disconnect_timeout_secs: 1,
        ..Config::default()
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
