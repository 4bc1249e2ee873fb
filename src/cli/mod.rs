pub mod commands;
pub mod i18n;
pub mod output;
pub mod state_file;

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::auth::{Credential, CredentialPrompt, DialogPrompt, StaticCredential, TerminalPrompt};
use output::Output;

pub use commands::Runner;
pub use i18n::{Lang, Strings};

/// rm01 - share this computer's internet connection with an RM-01
#[derive(Parser, Debug)]
#[command(name = "rm01", version, about, long_about = None)]
pub struct Cli {
    #[arg(value_enum, default_value_t = Command::Help)]
    pub command: Command,

    /// Administrator password (prompted for when omitted)
    #[arg(short, long)]
    pub password: Option<String>,

    /// Output language (defaults to LANG / LC_ALL)
    #[arg(short, long, value_enum)]
    pub lang: Option<Lang>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Config file (defaults to ~/.config/rm01/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the built-in configuration and exit
    #[arg(long, default_value_t = false)]
    pub print_default_config: bool,

    /// Machine-readable output for `status` and `detect`
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Debug logging (overrides general.log_level)
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Command {
    Status,
    Detect,
    Connect,
    Disconnect,
    Help,
}

// ── Password source ───────────────────────────────────────────────────

/// How the CLI obtains an administrator password.
pub enum CliPrompt {
    /// `--password` on the command line
    Static(StaticCredential),
    /// Hidden terminal input
    Terminal {
        inner: TerminalPrompt,
        out: Output,
        notice: &'static str,
    },
    /// Desktop dialog when stdin is not a terminal
    Dialog(DialogPrompt),
}

impl CliPrompt {
    pub fn select(password: Option<String>, strings: &'static Strings, out: Output, timeout: Duration) -> Self {
        if let Some(pw) = password {
            return Self::Static(StaticCredential::new(pw));
        }
        if io::stdin().is_terminal() {
            Self::Terminal {
                inner: TerminalPrompt::new(strings.password_prompt, timeout),
                out,
                notice: strings.password_required,
            }
        } else {
            Self::Dialog(DialogPrompt::new("RM-01", strings.password_required, timeout))
        }
    }
}

impl CredentialPrompt for CliPrompt {
    async fn request(&self) -> Option<Credential> {
        match self {
            Self::Static(s) => s.request().await,
            Self::Terminal { inner, out, notice } => {
                out.info(notice);
                inner.request().await
            }
            Self::Dialog(d) => d.request().await,
        }
    }
}
