use clap::{Parser, Subcommand};

/// Agent run streaming API.
///
/// Serves live agent run output over SSE and handles stop requests.
#[derive(Parser, Debug)]
#[command(name = "agentrun-server", version, about = "Agent run streaming API")]
pub struct Cli {
    /// Configuration profile (overrides AGENTRUN_PROFILE)
    #[arg(long, global = true, env = "AGENTRUN_PROFILE")]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the HTTP server (default)
    Serve,

    /// Stop a run: record it, signal relays and workers, expire its responses
    Stop {
        run_id: String,

        /// Mark the run failed with this message instead of stopped
        #[arg(long)]
        error: Option<String>,
    },

    /// List configuration profiles found in the environment
    Profiles,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}
