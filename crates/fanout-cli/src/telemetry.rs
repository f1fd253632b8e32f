//! Console logging for the `fanout` binary.
//!
//! Events go to stderr through `tracing_subscriber::fmt` so that stdout only
//! carries command output (message IDs, dumped rows). The filter comes from
//! `RUST_LOG` and defaults to `info`; the library's send and commit spans
//! show up at `debug`.
//!
//! ```bash
//! RUST_LOG=fanout=debug fanout send --sender 1 --receiver 2
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true),
        )
        .try_init()?;
    Ok(())
}
