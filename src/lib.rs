//! STOMP client for reporting and summarising emergency events.
//!
//! Users log in to a STOMP broker, join channels, report events read from
//! JSON files and write per-user summaries of what each channel received.
//!
//! # Architecture
//!
//! - **Engine** - session state machine, request encoding, receive thread
//! - **Transport** - frame-level connection to the broker (TCP in production)
//! - **Store** - events received or reported, per channel
//!
//! # Modules
//!
//! - [`frame`] - frame codec and byte-stream reassembly
//! - [`event`] - event model, body format, event files
//! - [`engine`] - protocol engine
//! - [`summary`] - summary derivation and rendering
//! - [`config`] - configuration loading/saving

pub mod commands;
pub mod config;
pub mod engine;
pub mod event;
pub mod frame;
pub mod store;
pub mod subscriptions;
pub mod summary;
pub mod transport;

pub use config::Config;
pub use engine::{ConnectionStatus, Engine};
pub use event::{load_events_file, Event, EventBatch};
pub use frame::Frame;
pub use summary::Summary;
pub use transport::{FrameReader, FrameWriter, TcpTransport, Transport};
