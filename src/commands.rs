//! Command-line interface, parsed with `clap`.
//!
//! ```no_run
//! use clap::Parser;
//! use tagvault::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! if let Commands::Classify { text, top_k } = cli.command {
//!     println!("classifying {text:?} (top {top_k})");
//! }
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Config file to use instead of `<config_dir>/config.yaml`.
    #[arg(long, short = 'c', global = true, env = "TAGVAULT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a default config file.
    Init,

    /// Print the topic of a text and the most likely alternatives.
    ///
    /// Needs neither the embedding model nor the vector store.
    #[clap(name = "classify", alias = "cl")]
    Classify {
        text: String,

        #[arg(short = 'k', long, default_value_t = 3)]
        top_k: usize,
    },

    /// Find stored messages similar to a text.
    #[clap(name = "search", alias = "s")]
    Search {
        text: String,

        /// Defaults to `search_limit` from the config.
        #[arg(short = 'l', long)]
        limit: Option<usize>,
    },

    /// Print the number of stored messages.
    Stats,

    /// Talk to the bot locally, one message per line.
    #[clap(name = "chat", alias = "i")]
    Chat {
        #[arg(short = 'u', long, default_value_t = 0)]
        user_id: i64,
    },

    /// Run the Telegram bot (requires API_TOKEN).
    Bot,
}

impl Commands {
    /// `init` and `classify` run without reading the config file or the
    /// environment, so a broken config cannot stop them.
    pub fn needs_config(&self) -> bool {
        !matches!(self, Commands::Init | Commands::Classify { .. })
    }
}
