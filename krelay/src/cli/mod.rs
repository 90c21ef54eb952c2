/*
 * krelay - manage licenses and users, back up and restore license keys
 *
 * SPDX-FileCopyrightText: 2025-2026 Steve Schoettler
 * SPDX-License-Identifier: Apache-2.0
 */
use std::{net::SocketAddr, path::PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use keyrelay::prelude::*;
use tracing::{debug, warn};

use crate::output::{Output, OutputFormat};

pub mod backup;
pub mod license;
pub mod restore;
pub mod serve;
pub mod user;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8787";

#[derive(Parser, Debug)]
#[command(name = "krelay")]
#[command(author, version, about = "krelay: manage licenses and users, back up and restore license keys", long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Seller API endpoint URL. Default: environment `KEYRELAY_URL` or the public seller api
    #[arg(short = 'u', long, env = "KEYRELAY_URL")]
    pub url: Option<String>,

    /// Seller key
    #[arg(long, env = "KEYRELAY_SELLER_KEY", hide_env_values = true)]
    pub seller_key: Option<String>,

    /// Prefix of product license keys, used when parsing text backups. Default "Soryn-"
    #[arg(long, env = "KEYRELAY_KEY_PREFIX", global = true)]
    pub key_prefix: Option<String>,

    /// Write output to file (default: stdout)
    #[arg(short = 'o', long, value_name = "FILE", global = true)]
    pub output: Option<PathBuf>,

    /// JSON output (default)
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Table output format
    #[arg(short, long, global = true)]
    pub table: bool,

    /// Quiet mode - suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (repeat for more: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global=true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// License list and management
    #[command(alias = "licenses")]
    License(LicenseArgs),

    /// User list and management
    #[command(alias = "users")]
    User(UserArgs),

    /// Export or inspect backups
    Backup(BackupArgs),

    /// Restore licenses from a backup file
    Restore(RestoreArgs),

    /// Run the HTTP control server for admin UIs
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
pub struct LicenseArgs {
    #[command(subcommand)]
    pub command: LicenseCommands,
}

#[derive(Subcommand, Debug)]
pub enum LicenseCommands {
    /// List all licenses
    List,

    /// Generate new license keys
    Create {
        /// key mask, e.g. "Soryn-****-1m"
        #[arg(long)]
        mask: Option<String>,

        /// number of keys to generate
        #[arg(long, default_value_t = 1)]
        amount: u32,

        /// lifetime in seconds, or "unlimited"
        #[arg(long, default_value = "unlimited")]
        expiry: LicenseDuration,

        #[arg(long, default_value_t = 1)]
        level: u32,

        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        note: Option<String>,
    },

    /// Show license details
    #[command(alias = "get")]
    Info {
        /// license key
        key: String,
    },

    Ban {
        /// license key
        key: String,

        /// ban reason
        #[arg(long, default_value = "banned by admin")]
        reason: String,
    },

    Unban {
        /// license key
        key: String,
    },

    Delete {
        /// license key
        key: String,
    },

    /// Delete every license
    DeleteAll {
        /// skip confirmation
        #[arg(long)]
        confirm: bool,
    },
}

#[derive(Args, Debug)]
pub struct UserArgs {
    #[command(subcommand)]
    pub command: UserCommands,
}

#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// List all users
    List,

    Ban {
        /// username
        name: String,

        /// ban reason
        #[arg(long, default_value = "banned by admin")]
        reason: String,
    },

    Unban {
        /// username
        name: String,
    },

    Delete {
        /// username
        name: String,
    },

    /// Delete every user
    DeleteAll {
        /// skip confirmation
        #[arg(long)]
        confirm: bool,
    },
}

#[derive(Args, Debug)]
pub struct BackupArgs {
    #[command(subcommand)]
    pub command: BackupCommands,
}

#[derive(Subcommand, Debug)]
pub enum BackupCommands {
    /// Export all licenses as a json backup document
    Export,

    /// Parse a backup file (json or text dump) and print the records found
    Parse {
        /// backup file
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// backup file (json or text dump)
    pub file: PathBuf,

    /// delete all licenses and users before restoring
    #[arg(long)]
    pub wipe: bool,

    /// with --wipe: skip confirmation
    #[arg(long)]
    pub confirm: bool,

    /// pause after each license, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 1500)]
    pub item_delay: u64,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// address to listen on
    #[arg(long, default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: SocketAddr,
}

pub struct AppContext {
    pub client: KeyRelayClient,
    pub output: Output,
}

pub async fn run(cli: Cli) -> Result<()> {
    let output = Output::new(resolve_output_format(&cli), cli.output.clone());
    let client = build_client(&cli)?;

    let ctx = AppContext { client, output };

    let result = match cli.command {
        Commands::License(args) => license::handle(&ctx, args).await,
        Commands::User(args) => user::handle(&ctx, args).await,
        Commands::Backup(args) => backup::handle(&ctx, args).await,
        Commands::Restore(args) => restore::handle(&ctx, args).await,
        Commands::Serve(args) => serve::handle(&ctx, args).await,
    };
    debug!(metrics = %ctx.client.http_metrics(), "upstream calls");
    result
}

fn resolve_output_format(cli: &Cli) -> OutputFormat {
    if cli.quiet {
        OutputFormat::Quiet
    } else if cli.pretty {
        if cli.table {
            warn!("--pretty conflicts with --table. Using json pretty format");
        }
        OutputFormat::Pretty
    } else if cli.json {
        if cli.table {
            warn!("--json conflicts with --table. Using json format");
        }
        OutputFormat::Json
    } else if cli.table {
        OutputFormat::Table
    } else {
        OutputFormat::Json
    }
}

fn build_client(cli: &Cli) -> Result<KeyRelayClient> {
    let mut config = ClientConfig::default();
    if let Some(url) = &cli.url {
        config = config.base_url(url);
    }
    if let Some(seller_key) = &cli.seller_key {
        config = config.seller_key(seller_key.as_str());
    }
    if let Some(prefix) = &cli.key_prefix {
        config = config.key_prefix(prefix);
    }
    let client = KeyRelayClient::with_config(config)?;
    Ok(client)
}

/// Fails unless a destructive bulk operation was confirmed.
pub(crate) fn require_confirm(confirm: bool, what: &str) -> Result<()> {
    if !confirm {
        anyhow::bail!("refusing to {what} without --confirm");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("krelay").chain(args.iter().copied()))
            .expect("valid args")
    }

    #[test]
    fn output_format_precedence() {
        assert_eq!(
            resolve_output_format(&parse(&["-q", "--table", "license", "list"])),
            OutputFormat::Quiet
        );
        assert_eq!(
            resolve_output_format(&parse(&["--table", "license", "list"])),
            OutputFormat::Table
        );
        assert_eq!(
            resolve_output_format(&parse(&["license", "list", "--pretty"])),
            OutputFormat::Pretty
        );
        assert_eq!(
            resolve_output_format(&parse(&["user", "list"])),
            OutputFormat::Json
        );
    }

    #[test]
    fn parses_restore_and_create() {
        let cli = parse(&["restore", "dump.txt", "--wipe", "--confirm"]);
        let Commands::Restore(args) = cli.command else {
            panic!("expected restore");
        };
        assert!(args.wipe && args.confirm);
        assert_eq!(args.item_delay, 1500);

        let cli = parse(&[
            "license", "create", "--mask", "Soryn-****-1w", "--expiry", "604800", "--amount", "5",
        ]);
        let Commands::License(LicenseArgs {
            command: LicenseCommands::Create { expiry, amount, .. },
        }) = cli.command
        else {
            panic!("expected license create");
        };
        assert_eq!(expiry, LicenseDuration::from_secs(604_800));
        assert_eq!(amount, 5);
    }

    #[test]
    fn confirm_guard() {
        assert!(require_confirm(false, "delete all licenses").is_err());
        assert!(require_confirm(true, "delete all licenses").is_ok());
    }
}
