//! Receive loop: the only reader of the broker connection.

use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc};
use std::thread;

use crate::event::Event;
use crate::frame::{command, Frame};
use crate::transport::FrameReader;

use super::{ReceiverHandle, Shared};

/// Whether the loop keeps reading after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Flow {
    Continue,
    Stop,
}

/// Start the `stomp-receiver` thread.
pub(super) fn spawn(
    shared: Arc<Shared>,
    reader: Box<dyn FrameReader>,
) -> std::io::Result<ReceiverHandle> {
    let (done_tx, done) = mpsc::channel();
    let join = thread::Builder::new()
        .name("stomp-receiver".to_string())
        .spawn(move || {
            let _done = scopeguard::guard(done_tx, |tx| {
                let _ = tx.send(());
            });
            run(&shared, reader);
        })?;
    Ok(ReceiverHandle { join, done })
}

fn run(shared: &Shared, mut reader: Box<dyn FrameReader>) {
    log::debug!("[receiver] Started");
    loop {
        if shared.stop_requested() && shared.disconnect_receipt.load(Ordering::SeqCst) == 0 {
            log::debug!("[receiver] Stop requested");
            break;
        }

        let raw = match reader.read_frame() {
            Ok(raw) => raw,
            Err(e) => {
                if shared.stop_requested() {
                    log::debug!("[receiver] Connection closed: {e:#}");
                } else {
                    log::error!("[receiver] Lost connection to server: {e:#}");
                    shared.mark_connection_lost();
                }
                break;
            }
        };

        if shared.handle_frame(&raw) == Flow::Stop {
            break;
        }
    }
    log::debug!("[receiver] Exiting");
}

impl Shared {
    /// Dispatch one raw frame from the broker.
    pub(super) fn handle_frame(&self, raw: &str) -> Flow {
        let frame = match Frame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("[receiver] Dropping undecodable frame: {e:#}");
                return Flow::Continue;
            }
        };

        if frame.command == command::ERROR {
            log::error!(
                "[receiver] Error response from server: {} {}",
                frame.header("message").unwrap_or_default(),
                frame.body.trim()
            );
            return Flow::Continue;
        }

        if let Some(receipt) = frame.header("receipt-id") {
            return self.acknowledge(receipt);
        }

        if frame.command == command::MESSAGE {
            self.ingest(&frame);
        } else {
            log::warn!("[receiver] Unexpected {} frame from server", frame.command);
        }
        Flow::Continue
    }

    fn acknowledge(&self, receipt: &str) -> Flow {
        let Ok(id) = receipt.trim().parse::<u64>() else {
            log::info!("[receiver] Receipt acknowledged: {receipt}");
            return Flow::Continue;
        };

        match self.lock_receipts().remove(&id) {
            Some(request) => log::info!("[receiver] Receipt acknowledged: {id} ({request})"),
            None => log::info!("[receiver] Receipt acknowledged: {id}"),
        }

        let disconnect = self.disconnect_receipt.load(Ordering::SeqCst);
        if disconnect != 0 && id == disconnect {
            log::debug!("[receiver] DISCONNECT receipt received");
            return Flow::Stop;
        }
        Flow::Continue
    }

    /// Store the event carried by a MESSAGE under its destination.
    fn ingest(&self, frame: &Frame) {
        let Some(destination) = frame.non_empty_header("destination") else {
            log::error!("[receiver] Missing 'destination' in MESSAGE frame.");
            return;
        };
        let Some(user) = frame.non_empty_header("user") else {
            log::error!("[receiver] Missing 'user' in MESSAGE frame.");
            return;
        };

        let mut event = Event::from_body(&frame.body);
        if event.channel().is_empty() {
            event.set_channel(destination);
        }
        event.set_owner(user);

        log::info!("[receiver] Event {} from {user} added to channel: {destination}", event.name());
        self.store.append(destination, event);
    }
}
