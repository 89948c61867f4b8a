//! STOMP client front-end.
//!
//! Reads one command per line from stdin and drives the engine. See the
//! `stomp_client::commands` module for the grammar.

use std::io::{self, BufRead, Write};
use std::ops::ControlFlow;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;
use stomp_client::commands::Command;
use stomp_client::{load_events_file, Config, ConnectionStatus, Engine, TcpTransport};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "stomp-client")]
#[command(version)]
#[command(about = "Report and summarise emergency events over STOMP")]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    save_config: bool,
}

/// Interactive session state.
struct Repl {
    config: Config,
    engine: Option<Engine>,
}

impl Repl {
    fn connected_engine(&self) -> Option<&Engine> {
        self.engine
            .as_ref()
            .filter(|engine| engine.status() == ConnectionStatus::Connected)
    }

    fn dispatch(&mut self, command: Command) -> ControlFlow<()> {
        if command.needs_session() && self.connected_engine().is_none() {
            eprintln!("Please login first");
            return ControlFlow::Continue(());
        }

        match command {
            Command::Login {
                addr,
                username,
                password,
            } => self.login(addr, &username, &password),
            Command::Join { channel } => {
                if let Some(engine) = self.connected_engine() {
                    if engine.subscribe(&channel) {
                        println!("Joined channel {channel}");
                    }
                }
            }
            Command::Exit { channel } => {
                if let Some(engine) = self.connected_engine() {
                    if engine.unsubscribe(&channel) {
                        println!("Exited channel {channel}");
                    }
                }
            }
            Command::Report { file } => {
                if let Some(engine) = self.connected_engine() {
                    match load_events_file(&file) {
                        Ok(batch) => {
                            if engine.report_events(batch) {
                                println!("Reported events from {}", file.display());
                            }
                        }
                        Err(e) => eprintln!("Could not read events file: {e:#}"),
                    }
                }
            }
            Command::Summary {
                channel,
                user,
                file,
            } => {
                if let Some(engine) = self.connected_engine() {
                    if !engine.generate_summary(&channel, &user, &file) {
                        eprintln!("No summary written for {user} in {channel}");
                    }
                }
            }
            Command::Logout => {
                if let Some(engine) = self.connected_engine() {
                    if engine.disconnect() {
                        println!("Logged out");
                    }
                }
            }
            Command::Quit => {
                if let Some(engine) = self.connected_engine() {
                    engine.disconnect();
                }
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn login(&mut self, addr: String, username: &str, password: &str) {
        // The live engine rejects a second login itself.
        if let Some(engine) = self.connected_engine() {
            engine.connect(username, password);
            eprintln!("The client is already logged in, log out before trying again");
            return;
        }

        let transport = TcpTransport::new(addr, self.config.connect_timeout());
        log::info!("Logging in to {} as {username}", transport.addr());
        let engine = Engine::new(self.config.clone(), transport);
        if engine.connect(username, password) {
            println!("Login successful");
            self.engine = Some(engine);
        } else {
            eprintln!("Could not connect to server");
        }
    }

    fn run(&mut self, input: impl BufRead) -> Result<()> {
        let mut stdout = io::stdout();
        for line in input.lines() {
            let line = line.context("read command")?;
            let command = match Command::parse(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(e) => {
                    eprintln!("{e:#}");
                    continue;
                }
            };
            if self.dispatch(command).is_break() {
                return Ok(());
            }
            stdout.flush()?;
        }

        // End of input behaves like `quit`.
        let _ = self.dispatch(Command::Quit);
        Ok(())
    }
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();

    // Keep the log out of the prompt when asked to.
    if let Ok(path) = std::env::var("STOMP_CLIENT_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        log::error!("PANIC: {:?}", panic_info);
        default_hook(panic_info);
    }));

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if cli.save_config {
        let path = match cli.config {
            Some(path) => path,
            None => Config::default_path()?,
        };
        config.save_to(&path)?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    log::info!("stomp-client v{} started", env!("CARGO_PKG_VERSION"));

    let mut repl = Repl {
        config,
        engine: None,
    };
    repl.run(io::stdin().lock())
}
