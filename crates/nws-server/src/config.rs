//! Command-line configuration (SPEC_FULL.md section A: replaces the
//! original's excluded startup-script option parsing with a minimal
//! `clap::Parser` front-end).

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "NetWorkSpaces-compatible coordination server", long_about = None)]
pub struct ServerConfig {
    /// Address to bind and accept client connections on.
    #[arg(long, default_value = "0.0.0.0:8765")]
    pub bind: SocketAddr,

    /// Minimum payload length, in bytes, above which an incoming argument
    /// is spilled to a temp file instead of being buffered in memory.
    /// Clamped up to a 64-byte floor regardless of what is passed here.
    #[arg(long, default_value_t = 4096)]
    pub long_value_threshold: u64,

    /// Directory used for spilled long-value files.
    #[arg(long, default_value_os_t = std::env::temp_dir())]
    pub temp_dir: PathBuf,

    /// Increases log verbosity; repeatable (`-v` = debug, `-vv` = trace).
    /// Maps onto `RUST_LOG` the same way `env_logger`'s default filter
    /// does, so an explicit `RUST_LOG` still takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl ServerConfig {
    /// The default log level this verbosity count selects, used to seed
    /// `env_logger::Builder::filter_level` when `RUST_LOG` isn't set.
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}
