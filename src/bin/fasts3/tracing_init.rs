// Tracing subscriber setup for the CLI binary. Diagnostics go to stderr;
// stdout is reserved for listing output and streamed object bytes.

use std::env;
use std::io::IsTerminal;

use fasts3::config::TracingConfig;

const EVENT_FILTER_ENV_VAR: &str = "RUST_LOG";

pub fn init_tracing(config: &TracingConfig) {
    let tracing_level = config.tracing_level;
    let event_filter = env::var(EVENT_FILTER_ENV_VAR)
        .unwrap_or_else(|_| format!("fasts3={tracing_level}"));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .compact()
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_env_filter(event_filter)
        .init();
}
