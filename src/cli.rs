use clap::{Parser, Subcommand};

/// PrintSentry - acoustic defect monitor and motion telemetry relay
#[derive(Parser)]
#[command(name = "printsentry")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the monitor (default)
    Serve {
        /// Telemetry listening address, overrides TELEMETRY_BIND_ADDR
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Connect to a running broadcaster and log decoded frames
    Watch {
        /// Broadcaster address (host:port)
        #[arg(default_value = "127.0.0.1:50003")]
        addr: String,
    },
}
