use anyhow::Result;
use serde_json::json;

use crate::cli::{AppContext, LicenseArgs, LicenseCommands, require_confirm};

pub async fn handle(ctx: &AppContext, args: LicenseArgs) -> Result<()> {
    match args.command {
        LicenseCommands::List => {
            let items = ctx.client.licenses().list().await?;
            ctx.output.emit_table(&items)
        }
        LicenseCommands::Create {
            mask,
            amount,
            expiry,
            level,
            owner,
            note,
        } => {
            let mut request = ctx
                .client
                .new_licenses()
                .amount(amount)
                .expiry(expiry)
                .level(level);
            if let Some(mask) = mask {
                request = request.mask(mask);
            }
            if let Some(owner) = owner {
                request = request.owner(owner);
            }
            if let Some(note) = note {
                request = request.note(note);
            }
            let keys = request.create().await?;
            ctx.output.emit_json(&keys)
        }
        LicenseCommands::Info { key } => {
            let item = ctx.client.license(key).get().await?;
            ctx.output.emit_json(&item)
        }
        LicenseCommands::Ban { key, reason } => {
            ctx.client.license(&key).ban(reason).await?;
            ctx.output.emit_json(&json!({"key": key, "banned": true}))
        }
        LicenseCommands::Unban { key } => {
            ctx.client.license(&key).unban().await?;
            ctx.output.emit_json(&json!({"key": key, "banned": false}))
        }
        LicenseCommands::Delete { key } => {
            ctx.client.license(&key).delete().await?;
            ctx.output.emit_json(&json!({"key": key, "deleted": true}))
        }
        LicenseCommands::DeleteAll { confirm } => {
            require_confirm(confirm, "delete all licenses")?;
            ctx.client.licenses().delete_all().await?;
            ctx.output.emit_json(&json!({"deleted": "all"}))
        }
    }
}
