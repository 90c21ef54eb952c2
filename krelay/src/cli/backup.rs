use std::path::Path;

use anyhow::{Context, Result};
use keyrelay::prelude::*;
use tracing::info;

use crate::{
    cli::{AppContext, BackupArgs, BackupCommands},
    output::OutputFormat,
};

pub async fn handle(ctx: &AppContext, args: BackupArgs) -> Result<()> {
    match args.command {
        BackupCommands::Export => {
            let document = ctx.client.export_backup().await?;
            info!(count = document.licenses.len(), "exported licenses");
            if ctx.output.format() == OutputFormat::Table {
                return ctx.output.emit_table(&document.licenses);
            }
            ctx.output.emit_json(&document)
        }
        BackupCommands::Parse { file } => {
            let (records, format) = read_backup(ctx, &file)?;
            info!(%format, count = records.len(), "parsed {}", file.display());
            ctx.output.emit_table(&records)
        }
    }
}

/// Reads and parses a backup file with the configured key prefix.
pub(crate) fn read_backup(
    ctx: &AppContext,
    path: &Path,
) -> Result<(Vec<LicenseRecord>, BackupFormat)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading backup {}", path.display()))?;
    Ok(ctx.client.backup_parser().parse(&content))
}
