//! Event domain model.
//!
//! An [`Event`] is one reported occurrence. Events travel inside SEND and
//! MESSAGE bodies using a line-oriented layout:
//!
//! ```text
//! user:alice
//! channel name:police
//! city:Liberty City
//! event name:Grand Theft Auto
//! date time:1687000000
//! description:Stolen vehicle
//! general information:
//! 	active:true
//! 	forces_arrival_at_scene:false
//! ```
//!
//! [`Event::to_body`] writes that layout and [`Event::from_body`] reads it
//! back with a line lexer and a small state-machine parser.
//! [`load_events_file`] reads the JSON event files a user reports from.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Attribute key flagging an ongoing event.
pub const ACTIVE: &str = "active";
/// Attribute key flagging that forces reached the scene.
pub const FORCES_ARRIVAL_AT_SCENE: &str = "forces_arrival_at_scene";

const KEY_USER: &str = "user";
const KEY_CHANNEL: &str = "channel name";
const KEY_CITY: &str = "city";
const KEY_NAME: &str = "event name";
const KEY_DATE_TIME: &str = "date time";
const KEY_DESCRIPTION: &str = "description";
const KEY_GENERAL_INFORMATION: &str = "general information";

/// One reported occurrence.
///
/// Immutable after construction apart from the owner, which the engine
/// stamps before an event is stored or sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Event {
    channel: String,
    city: String,
    name: String,
    timestamp: i64,
    description: String,
    attributes: BTreeMap<String, String>,
    owner: String,
}

impl Event {
    /// Create an event with no owner.
    pub fn new(
        channel: impl Into<String>,
        city: impl Into<String>,
        name: impl Into<String>,
        timestamp: i64,
        description: impl Into<String>,
        attributes: BTreeMap<String, String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            city: city.into(),
            name: name.into(),
            timestamp,
            description: description.into(),
            attributes,
            owner: String::new(),
        }
    }

    /// Channel the event belongs to.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// City where it happened.
    pub fn city(&self) -> &str {
        &self.city
    }

    /// Event name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Epoch seconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Free-text description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Free-form attributes (the "general information" block).
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Username that reported the event.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Stamp the reporting user.
    pub fn set_owner(&mut self, owner: impl Into<String>) {
        self.owner = owner.into();
    }

    /// Replace the channel. Used when a received body omits it.
    pub(crate) fn set_channel(&mut self, channel: impl Into<String>) {
        self.channel = channel.into();
    }

    /// `active` attribute is `"true"`.
    pub fn is_active(&self) -> bool {
        self.flag(ACTIVE)
    }

    /// `forces_arrival_at_scene` attribute is `"true"`.
    pub fn forces_arrival_at_scene(&self) -> bool {
        self.flag(FORCES_ARRIVAL_AT_SCENE)
    }

    fn flag(&self, key: &str) -> bool {
        self.attributes.get(key).is_some_and(|v| v == "true")
    }

    /// Serialize into a frame body.
    ///
    /// Attributes are listed under `general information:`, one per line,
    /// indented with a tab.
    pub fn to_body(&self) -> String {
        let mut body = String::new();
        let _ = writeln!(body, "{KEY_USER}:{}", self.owner);
        let _ = writeln!(body, "{KEY_CHANNEL}:{}", self.channel);
        let _ = writeln!(body, "{KEY_CITY}:{}", self.city);
        let _ = writeln!(body, "{KEY_NAME}:{}", self.name);
        let _ = writeln!(body, "{KEY_DATE_TIME}:{}", self.timestamp);
        let _ = writeln!(body, "{KEY_DESCRIPTION}:{}", self.description);
        let _ = writeln!(body, "{KEY_GENERAL_INFORMATION}:");
        for (key, value) in &self.attributes {
            let _ = writeln!(body, "\t{key}:{value}");
        }
        body
    }

    /// Parse a frame body written by [`Event::to_body`] (or a compatible
    /// peer).
    ///
    /// The `active` and `forces_arrival_at_scene` attributes are always
    /// present in the result, normalised to `"true"` or `"false"`. A missing
    /// `date time` yields timestamp 0, as does one that is not an integer
    /// (logged as a warning).
    pub fn from_body(body: &str) -> Self {
        let mut event = Self::default();
        let mut section = Section::Top;
        let mut description: Vec<&str> = Vec::new();

        for raw in body.lines() {
            match BodyLine::lex(raw) {
                BodyLine::Blank => {
                    if section == Section::Description {
                        description.push("");
                    }
                }
                BodyLine::Field { key, value } if is_top_level_key(key) => {
                    section = Section::Top;
                    match key {
                        KEY_USER => event.owner = value.to_string(),
                        KEY_CHANNEL => event.channel = value.to_string(),
                        KEY_CITY => event.city = value.to_string(),
                        KEY_NAME => event.name = value.to_string(),
                        KEY_DATE_TIME => match value.trim().parse() {
                            Ok(timestamp) => event.timestamp = timestamp,
                            Err(e) => {
                                log::warn!("[event] Invalid date time {value:?} ({e}), using 0");
                                event.timestamp = 0;
                            }
                        },
                        KEY_DESCRIPTION => {
                            description = vec![value];
                            section = Section::Description;
                        }
                        _ => section = Section::GeneralInformation,
                    }
                }
                BodyLine::Indented { key, value } if section == Section::GeneralInformation => {
                    event.attributes.insert(key.to_string(), value.to_string());
                }
                _ if section == Section::Description => description.push(raw),
                _ => log::debug!("[event] Ignoring body line: {raw:?}"),
            }
        }

        // Trailing blank lines belong to the frame layout, not the text.
        while description.last().is_some_and(|line| line.is_empty()) {
            description.pop();
        }
        event.description = description.join("\n");

        for key in [ACTIVE, FORCES_ARRIVAL_AT_SCENE] {
            let on = event.attributes.get(key).is_some_and(|v| v.trim() == "true");
            event
                .attributes
                .insert(key.to_string(), if on { "true" } else { "false" }.to_string());
        }

        event
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Top,
    Description,
    GeneralInformation,
}

fn is_top_level_key(key: &str) -> bool {
    matches!(
        key,
        KEY_USER
            | KEY_CHANNEL
            | KEY_CITY
            | KEY_NAME
            | KEY_DATE_TIME
            | KEY_DESCRIPTION
            | KEY_GENERAL_INFORMATION
    )
}

/// One lexed line of an event body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyLine<'a> {
    /// Empty or whitespace-only line.
    Blank,
    /// `key:value` starting at column 0.
    Field { key: &'a str, value: &'a str },
    /// `key:value` indented by tabs or spaces.
    Indented { key: &'a str, value: &'a str },
    /// Anything else.
    Text,
}

impl<'a> BodyLine<'a> {
    fn lex(line: &'a str) -> Self {
        if line.trim().is_empty() {
            return Self::Blank;
        }
        let content = line.trim_start_matches(['\t', ' ']);
        let indented = content.len() != line.len();
        match content.split_once(':') {
            Some((key, value)) if indented => Self::Indented { key: key.trim(), value },
            Some((key, value)) => Self::Field { key, value },
            None => Self::Text,
        }
    }
}

// ── Event files ────────────────────────────────────────────────────────────

/// Channel name plus the events read from one event file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBatch {
    /// Channel the events are reported to.
    pub channel_name: String,
    /// Events in file order.
    pub events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
struct EventFile {
    channel_name: String,
    events: Vec<EventRecord>,
}

#[derive(Debug, Deserialize)]
struct EventRecord {
    event_name: String,
    city: String,
    date_time: i64,
    description: String,
    #[serde(default)]
    general_information: serde_json::Map<String, serde_json::Value>,
}

impl EventBatch {
    /// Parse an event file document.
    ///
    /// Non-string attribute values keep their JSON text (`true`, `3`, ...).
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not match the event file shape.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: EventFile = serde_json::from_str(json).context("parse event file")?;
        let events = file
            .events
            .into_iter()
            .map(|record| {
                let attributes = record
                    .general_information
                    .into_iter()
                    .map(|(key, value)| match value {
                        serde_json::Value::String(s) => (key, s),
                        other => (key, other.to_string()),
                    })
                    .collect();
                Event::new(
                    file.channel_name.clone(),
                    record.city,
                    record.event_name,
                    record.date_time,
                    record.description,
                    attributes,
                )
            })
            .collect();
        Ok(Self {
            channel_name: file.channel_name,
            events,
        })
    }
}

/// Read and parse an event file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_events_file(path: &Path) -> Result<EventBatch> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("read event file: {}", path.display()))?;
    EventBatch::from_json(&content).with_context(|| format!("load {}", path.display()))
}
