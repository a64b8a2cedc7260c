//! Installing the global tracing subscriber.
//!
//! `RUST_LOG` overrides the default `info` level.  With `journald` the
//! records go to the systemd journal socket, fields and all.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::LogFormat;

pub const DEFAULT_LOG_LEVEL: &str = "info";

pub fn init(format: LogFormat) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter());
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(false))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).try_init(),
        LogFormat::Journald => {
            let journald = tracing_journald::layer()
                .map_err(|err| anyhow!("failed to connect to journald: {err}"))?
                .with_syslog_identifier("podwatch".to_owned());
            registry.with(journald).try_init()
        }
    }
    .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
}
