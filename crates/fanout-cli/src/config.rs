use std::{path::PathBuf, time::Duration};

use anyhow::bail;
use clap::{Args, Parser, Subcommand, ValueEnum};
use fanout::MessageId;

/// Command-line configuration for the `fanout` binary.
///
/// Global options can also be set through the environment (or a `.env`
/// file), which makes it easy to point repeated invocations at the same log.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "fanout",
    version,
    about = "Atomically fan one message out to an explicit list of receivers"
)]
pub struct CliArgs {
    /// Node discriminator embedded in every message ID.
    ///
    /// Must be unique among processes writing to the same store.
    ///
    /// Environment variable: `FANOUT_NODE_ID`
    #[arg(long, env = "FANOUT_NODE_ID", default_value_t = 0, global = true)]
    pub node_id: u64,

    /// Where committed rows go.
    ///
    /// `memory` disappears when the process exits; `log` appends to
    /// `--log-path` and replays it on start.
    ///
    /// Environment variable: `FANOUT_STORE`
    #[arg(long, env = "FANOUT_STORE", value_enum, default_value_t = StoreKind::Memory, global = true)]
    pub store: StoreKind,

    /// Path of the durable log used by `--store log`.
    ///
    /// Environment variable: `FANOUT_LOG_PATH`
    #[arg(long, env = "FANOUT_LOG_PATH", default_value = "fanout.log", global = true)]
    pub log_path: PathBuf,

    /// How long a send may wait for a message ID, in milliseconds.
    ///
    /// Environment variable: `FANOUT_MAX_ID_WAIT_MS`
    #[arg(long, env = "FANOUT_MAX_ID_WAIT_MS", default_value_t = 100, global = true)]
    pub max_id_wait_ms: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Log,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Send one message to every listed receiver and print its ID.
    Send(SendArgs),
    /// Print every queued row and cancellable ID as JSON lines.
    Dump,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct SendArgs {
    #[arg(long, allow_negative_numbers = true)]
    pub sender: i32,

    /// Receiver ID; repeat the flag or separate with commas. Duplicates are
    /// kept, and no receivers at all is allowed.
    #[arg(long = "receiver", value_delimiter = ',', allow_negative_numbers = true)]
    pub receivers: Vec<i32>,

    /// Microseconds since the Unix epoch. Defaults to now.
    #[arg(long, allow_negative_numbers = true)]
    pub send_time: Option<i64>,

    /// Microseconds since the Unix epoch. Omit for "never expires".
    #[arg(long, allow_negative_numbers = true)]
    pub expires_at: Option<i64>,

    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub priority: i16,

    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub type_id: i32,

    /// Payload given inline as UTF-8 text.
    #[arg(long, conflicts_with = "payload_file")]
    pub payload: Option<String>,

    /// Payload read verbatim from a file.
    #[arg(long)]
    pub payload_file: Option<PathBuf>,

    /// Also register the message for a later cancel-by-id.
    #[arg(long, default_value_t = false)]
    pub cancellable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Memory,
    Log { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub node_id: u64,
    pub store: StoreConfig,
    pub max_id_wait: Duration,
    pub command: Command,
}

impl TryFrom<CliArgs> for CliConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let max_node_id = MessageId::max_node_id();
        if args.node_id > max_node_id {
            bail!(
                "FANOUT_NODE_ID ({}) exceeds the message ID node space (max = {})",
                args.node_id,
                max_node_id
            );
        }

        if args.max_id_wait_ms == 0 {
            bail!("FANOUT_MAX_ID_WAIT_MS must be greater than 0");
        }

        let store = match args.store {
            StoreKind::Memory => StoreConfig::Memory,
            StoreKind::Log => {
                if args.log_path.as_os_str().is_empty() {
                    bail!("FANOUT_LOG_PATH must be set when FANOUT_STORE=log");
                }
                StoreConfig::Log {
                    path: args.log_path,
                }
            }
        };

        Ok(Self {
            node_id: args.node_id,
            store,
            max_id_wait: Duration::from_millis(args.max_id_wait_ms),
            command: args.command,
        })
    }
}
