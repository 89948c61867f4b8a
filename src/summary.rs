//! Per-user, per-channel summaries.
//!
//! Output layout:
//!
//! ```text
//! Channel: police
//! User: alice
//! Stats:
//! Total: 2
//! Active: 1
//! Forces arrival at scene: 0
//!
//! Event Reports:
//! 14/06/23 10:15 - fire - Haifa:
//! smoke on the second floor
//!
//! ```

use std::io::{self, Write};

use chrono::{Local, TimeZone};

use crate::event::Event;

/// Aggregated view of one user's events on one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    /// Channel name as requested by the caller.
    pub channel: String,
    /// User whose events are summarised.
    pub user: String,
    /// Number of events.
    pub total: usize,
    /// Events with `active=true`.
    pub active: usize,
    /// Events with `forces_arrival_at_scene=true`.
    pub forces_arrival: usize,
    /// Events ordered by timestamp, then name.
    pub events: Vec<Event>,
}

impl Summary {
    /// Build a summary from events already filtered to `user`.
    ///
    /// Returns `None` when there is nothing to report.
    pub fn build(channel: &str, user: &str, mut events: Vec<Event>) -> Option<Self> {
        if events.is_empty() {
            return None;
        }
        events.sort_by(|a, b| {
            a.timestamp()
                .cmp(&b.timestamp())
                .then_with(|| a.name().cmp(b.name()))
        });
        Some(Self {
            channel: channel.to_string(),
            user: user.to_string(),
            total: events.len(),
            active: events.iter().filter(|e| e.is_active()).count(),
            forces_arrival: events.iter().filter(|e| e.forces_arrival_at_scene()).count(),
            events,
        })
    }

    /// Write the report to `out`.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from `out`.
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "Channel: {}", self.channel)?;
        writeln!(out, "User: {}", self.user)?;
        writeln!(out, "Stats:")?;
        writeln!(out, "Total: {}", self.total)?;
        writeln!(out, "Active: {}", self.active)?;
        writeln!(out, "Forces arrival at scene: {}", self.forces_arrival)?;
        writeln!(out)?;
        writeln!(out, "Event Reports:")?;
        for event in &self.events {
            writeln!(
                out,
                "{} - {} - {}:",
                format_epoch(event.timestamp()),
                event.name(),
                event.city()
            )?;
            writeln!(out, "{}", event.description())?;
            writeln!(out)?;
        }
        out.flush()
    }
}

/// Render epoch seconds as `dd/mm/yy HH:MM` in local time.
pub fn format_epoch(seconds: i64) -> String {
    match Local.timestamp_opt(seconds, 0).single() {
        Some(time) => time.format("%d/%m/%y %H:%M").to_string(),
        None => seconds.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn event(name: &str, timestamp: i64, active: bool, forces: bool) -> Event {
        let mut attributes = BTreeMap::new();
        attributes.insert("active".to_string(), active.to_string());
        attributes.insert("forces_arrival_at_scene".to_string(), forces.to_string());
        let mut event = Event::new("room", "Haifa", name, timestamp, format!("{name} desc"), attributes);
        event.set_owner("alice");
        event
    }

    #[test]
    fn test_empty_builds_nothing() {
        assert!(Summary::build("room", "alice", Vec::new()).is_none());
    }

    #[test]
    fn test_stats_and_tie_break_order() {
        let summary = Summary::build(
            "room",
            "alice",
            vec![
                event("zeta", 100, true, false),
                event("alpha", 100, false, false),
                event("early", 10, false, true),
            ],
        )
        .unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.active, 1);
        assert_eq!(summary.forces_arrival, 1);
        let names: Vec<_> = summary.events.iter().map(Event::name).collect();
        assert_eq!(names, ["early", "alpha", "zeta"]);
    }

    #[test]
    fn test_write_layout() {
        let summary = Summary::build("room", "alice", vec![event("fire", 100, true, false)]).unwrap();
        let mut out = Vec::new();
        summary.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let expected = format!(
            "Channel: room\nUser: alice\nStats:\nTotal: 1\nActive: 1\nForces arrival at scene: 0\n\n\
             Event Reports:\n{} - fire - Haifa:\nfire desc\n\n",
            format_epoch(100)
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn test_format_epoch_shape() {
        let formatted = format_epoch(1_700_000_000);
        assert_eq!(formatted.len(), "14/11/23 22:13".len());
        assert_eq!(&formatted[2..3], "/");
        assert_eq!(&formatted[5..6], "/");
    }
}
