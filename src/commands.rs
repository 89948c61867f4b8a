//! Command grammar of the interactive front-end.
//!
//! One command per line, words separated by whitespace:
//!
//! | Command                              | Engine operation          |
//! |--------------------------------------|---------------------------|
//! | `login <host:port> <user> <pass>`    | `connect`                 |
//! | `join <channel>`                     | `subscribe`               |
//! | `exit <channel>`                     | `unsubscribe`             |
//! | `report <events-file.json>`          | `report_events`           |
//! | `summary <channel> <user> <file>`    | `generate_summary`        |
//! | `logout`                             | `disconnect`              |
//! | `quit`                               | `disconnect` if connected |

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

/// One parsed front-end command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Connect to a broker and log in.
    Login {
        /// Broker address as `host:port`.
        addr: String,
        /// Login name.
        username: String,
        /// Passcode.
        password: String,
    },
    /// Subscribe to a channel.
    Join {
        /// Channel name.
        channel: String,
    },
    /// Unsubscribe from a channel.
    Exit {
        /// Channel name.
        channel: String,
    },
    /// Report every event in a JSON events file.
    Report {
        /// Events file.
        file: PathBuf,
    },
    /// Write one user's summary for a channel to a file.
    Summary {
        /// Channel name.
        channel: String,
        /// User whose events are summarised.
        user: String,
        /// Output file.
        file: PathBuf,
    },
    /// End the session.
    Logout,
    /// End the session (if any) and leave the program.
    Quit,
}

impl Command {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&keyword, args)) = words.split_first() else {
            return Ok(None);
        };

        let command = match (keyword, args) {
            ("login", [addr, username, password]) => {
                check_addr(addr)?;
                Self::Login {
                    addr: (*addr).to_string(),
                    username: (*username).to_string(),
                    password: (*password).to_string(),
                }
            }
            ("join", [channel]) => Self::Join {
                channel: (*channel).to_string(),
            },
            ("exit", [channel]) => Self::Exit {
                channel: (*channel).to_string(),
            },
            ("report", [file]) => Self::Report {
                file: PathBuf::from(*file),
            },
            ("summary", [channel, user, file]) => Self::Summary {
                channel: (*channel).to_string(),
                user: (*user).to_string(),
                file: PathBuf::from(*file),
            },
            ("logout", []) => Self::Logout,
            ("quit", []) => Self::Quit,
            (keyword, _) => match usage(keyword) {
                Some(usage) => bail!("usage: {usage}"),
                None => bail!("unknown command: {keyword}"),
            },
        };
        Ok(Some(command))
    }

    /// True for commands that need a live session.
    pub fn needs_session(&self) -> bool {
        !matches!(self, Self::Login { .. } | Self::Quit)
    }
}

fn usage(keyword: &str) -> Option<&'static str> {
    Some(match keyword {
        "login" => "login <host:port> <username> <password>",
        "join" => "join <channel>",
        "exit" => "exit <channel>",
        "report" => "report <events-file.json>",
        "summary" => "summary <channel> <user> <file>",
        "logout" => "logout",
        "quit" => "quit",
        _ => return None,
    })
}

fn check_addr(addr: &str) -> Result<()> {
    let Some((host, port)) = addr.rsplit_once(':') else {
        bail!("broker address must be host:port, got {addr:?}");
    };
    if host.is_empty() {
        bail!("broker address {addr:?} has no host");
    }
    port.parse::<u16>()
        .with_context(|| format!("invalid port in broker address {addr:?}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_login() {
        let command = Command::parse("login 127.0.0.1:7777 alice secret").unwrap();
        assert_eq!(
            command,
            Some(Command::Login {
                addr: "127.0.0.1:7777".to_string(),
                username: "alice".to_string(),
                password: "secret".to_string(),
            })
        );
    }

    #[test]
    fn test_login_requires_port() {
        assert!(Command::parse("login localhost alice secret").is_err());
        assert!(Command::parse("login localhost:http alice secret").is_err());
        assert!(Command::parse("login :7777 alice secret").is_err());
    }

    #[test]
    fn test_parse_channel_commands() {
        assert_eq!(
            Command::parse("  join   police ").unwrap(),
            Some(Command::Join {
                channel: "police".to_string()
            })
        );
        assert_eq!(
            Command::parse("exit police").unwrap(),
            Some(Command::Exit {
                channel: "police".to_string()
            })
        );
    }

    #[test]
    fn test_parse_summary_and_report() {
        assert_eq!(
            Command::parse("summary police bob out.txt").unwrap(),
            Some(Command::Summary {
                channel: "police".to_string(),
                user: "bob".to_string(),
                file: PathBuf::from("out.txt"),
            })
        );
        assert_eq!(
            Command::parse("report data/events1.json").unwrap(),
            Some(Command::Report {
                file: PathBuf::from("data/events1.json"),
            })
        );
    }

    #[test]
    fn test_wrong_arity_reports_usage() {
        let err = Command::parse("join").unwrap_err().to_string();
        assert_eq!(err, "usage: join <channel>");
        let err = Command::parse("logout now").unwrap_err().to_string();
        assert_eq!(err, "usage: logout");
    }

    #[test]
    fn test_unknown_and_blank() {
        assert!(Command::parse("dance").is_err());
        assert_eq!(Command::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_needs_session() {
        assert!(!Command::Quit.needs_session());
        assert!(Command::Logout.needs_session());
        assert!(Command::parse("join x").unwrap().unwrap().needs_session());
    }
}
