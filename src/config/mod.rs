pub mod constants;
pub(crate) mod defaults;
pub mod models;

pub use models::*;

use chrono::Local;
use eyre::{Context, Result};
use log::LevelFilter;
use std::{io::Write, str::FromStr};

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn user_agent() -> String {
    format!("{}/{}", APP_NAME, VERSION)
}

pub fn load_configuration(config_path: &str) -> Result<Configuration> {
    let config =
        std::fs::read_to_string(config_path).wrap_err(format!("reading {}", config_path))?;
    let config: Configuration = toml::from_str(&config).wrap_err("parsing configuration")?;
    Ok(config)
}

pub fn init_logger(config: &LogConfig) -> Result<()> {
    let log_file: Box<dyn std::io::Write + Send + 'static> = if let Some(file) = &config.file {
        Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(file.append)
                .open(&file.path)
                .wrap_err(format!("opening log file {}", file.path))?,
        )
    } else {
        Box::new(std::io::stderr())
    };

    let log_level = LevelFilter::from_str(config.level.as_deref().unwrap_or("info"))?;

    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {} [{}] - {}",
                record.module_path().unwrap_or("unknown"),
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(log_file))
        .filter(None, log_level)
        .try_init()?;

    Ok(())
}
