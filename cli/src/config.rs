//! Receiver configuration. Every option can also be set through an environment variable.

use clap::Args;
use log::{info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use upmu_core::aliases::AliasTable;
use upmu_core::framing::{
    FrameLimits, DEFAULT_MAX_PATH_LEN, DEFAULT_MAX_PAYLOAD_LEN, DEFAULT_MAX_SERIAL_LEN,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid listen address {0}")]
    Address(String),
    #[error("cycle duration must be greater than 0 seconds")]
    ZeroCycle,
    #[error("framing limit {name} must be greater than 0")]
    ZeroLimit { name: &'static str },
    #[error("could not read alias file {path}: {source}")]
    Aliases {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Args)]
pub struct ReceiverConfig {
    /// Port to listen on
    #[arg(short, long, env = "UPMU_PORT", default_value_t = 1883)]
    pub port: u16,

    /// Address to bind to
    #[arg(short, long, env = "UPMU_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Number of seconds per output CSV file; omit to only store and acknowledge frames
    #[arg(short, long, env = "UPMU_CYCLE_SECONDS")]
    pub seconds: Option<u32>,

    /// Depth of the files in the directory structure being sent (top level is at depth 0)
    #[arg(short, long, env = "UPMU_DIR_DEPTH", default_value_t = 4)]
    pub depth: usize,

    /// Directory in which to store the CSV files
    #[arg(short, long, env = "UPMU_OUTPUT_DIR", default_value = "output/")]
    pub output: PathBuf,

    /// File mapping serial numbers to aliases (`serial=alias` per line)
    #[arg(long, env = "UPMU_ALIASES", default_value = "serial_aliases.ini")]
    pub aliases: PathBuf,

    /// SQLite database holding raw frames, last seen times and anomalies
    #[arg(long, env = "UPMU_DATABASE", default_value = "upmu.db")]
    pub database: PathBuf,

    /// Directory for payloads that could not be stored
    #[arg(long, env = "UPMU_BACKUP_DIR", default_value = "backup/")]
    pub backup_dir: PathBuf,

    #[arg(long, env = "UPMU_MAX_PATH_LEN", default_value_t = DEFAULT_MAX_PATH_LEN)]
    pub max_path_len: u32,

    #[arg(long, env = "UPMU_MAX_SERIAL_LEN", default_value_t = DEFAULT_MAX_SERIAL_LEN)]
    pub max_serial_len: u32,

    #[arg(long, env = "UPMU_MAX_PAYLOAD_LEN", default_value_t = DEFAULT_MAX_PAYLOAD_LEN)]
    pub max_payload_len: u32,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            port: 1883,
            bind: "0.0.0.0".to_string(),
            seconds: None,
            depth: 4,
            output: PathBuf::from("output/"),
            aliases: PathBuf::from("serial_aliases.ini"),
            database: PathBuf::from("upmu.db"),
            backup_dir: PathBuf::from("backup/"),
            max_path_len: DEFAULT_MAX_PATH_LEN,
            max_serial_len: DEFAULT_MAX_SERIAL_LEN,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

impl ReceiverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        if self.seconds == Some(0) {
            return Err(ConfigError::ZeroCycle);
        }
        for (name, value) in [
            ("max-path-len", self.max_path_len),
            ("max-serial-len", self.max_serial_len),
            ("max-payload-len", self.max_payload_len),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroLimit { name });
            }
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let address = format!("{}:{}", self.bind, self.port);
        address
            .parse()
            .map_err(|_| ConfigError::Address(address))
    }

    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_path_len: self.max_path_len,
            max_serial_len: self.max_serial_len,
            max_payload_len: self.max_payload_len,
        }
    }

    /// Loads the alias file. A missing file is not an error: the receiver runs without
    /// aliases.
    pub fn load_aliases(&self) -> Result<Arc<AliasTable>, ConfigError> {
        match AliasTable::load(&self.aliases) {
            Ok(table) => {
                info!("Loaded {} serial aliases from {}", table.len(), self.aliases.display());
                Ok(Arc::new(table))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Could not read {}", self.aliases.display());
                Ok(Arc::new(AliasTable::new()))
            }
            Err(source) => Err(ConfigError::Aliases {
                path: self.aliases.clone(),
                source,
            }),
        }
    }
}
