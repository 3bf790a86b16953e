//! Tracing subscriber init, delegating to `orchestration_core`'s shared,
//! idempotent initializer so the control plane, gateway and interpreter
//! all configure logging identically.

use anyhow::Result;
use orchestration_core::{TelemetryOptions, init_telemetry};

use crate::config::AppConfig;

pub fn init_tracing(config: &AppConfig) -> Result<()> {
    init_telemetry(TelemetryOptions {
        env_filter: Some(config.log.level.clone()),
        with_ansi: true,
    })?;
    Ok(())
}
