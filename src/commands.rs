//! Command-line interface definition (`clap`).
//!
//! `Cli` carries the parsed arguments; `Commands` lists the subcommands
//! the `guichet` binary exposes. Everything here is thin plumbing over
//! [`crate::chat::ChatEngine`].

use clap::{Parser, Subcommand};

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Ask a single question inside a conversation.
    #[clap(name = "ask", alias = "a")]
    Ask {
        /// The question to send.
        question: String,

        /// Continue an existing conversation instead of starting one.
        #[arg(name = "conversation", short = 'c', long)]
        conversation: Option<i32>,

        /// Template name under `<config_dir>/templates/`.
        #[arg(name = "template", short = 't', long)]
        template: Option<String>,

        /// Client display name for a new conversation.
        #[arg(name = "client", short = 'n', long)]
        client: Option<String>,
    },

    /// Chat in a loop; type "exit" to leave.
    #[clap(name = "interactive", alias = "i")]
    Interactive {
        #[arg(name = "conversation", short = 'c', long)]
        conversation: Option<i32>,

        #[arg(name = "template", short = 't', long)]
        template: Option<String>,

        #[arg(name = "client", short = 'n', long)]
        client: Option<String>,
    },

    /// Rebuild and persist the catalog index.
    Reindex,

    /// Close a conversation, generating a hand-off summary.
    Close {
        conversation: i32,

        /// Fallback summary when the provider cannot produce one.
        #[arg(name = "summary", short = 's', long)]
        summary: Option<String>,
    },

    /// Rename the client on a conversation.
    Rename {
        conversation: i32,
        name: String,
    },

    /// Create the configuration directory, a default config, and the
    /// default support template.
    Init,
}
