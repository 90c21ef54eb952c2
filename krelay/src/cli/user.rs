use anyhow::Result;
use serde_json::json;

use crate::cli::{AppContext, UserArgs, UserCommands, require_confirm};

pub async fn handle(ctx: &AppContext, args: UserArgs) -> Result<()> {
    match args.command {
        UserCommands::List => {
            let items = ctx.client.users().list().await?;
            ctx.output.emit_table(&items)
        }
        UserCommands::Ban { name, reason } => {
            ctx.client.user(&name).ban(reason).await?;
            ctx.output.emit_json(&json!({"user": name, "banned": true}))
        }
        UserCommands::Unban { name } => {
            ctx.client.user(&name).unban().await?;
            ctx.output.emit_json(&json!({"user": name, "banned": false}))
        }
        UserCommands::Delete { name } => {
            ctx.client.user(&name).delete().await?;
            ctx.output.emit_json(&json!({"user": name, "deleted": true}))
        }
        UserCommands::DeleteAll { confirm } => {
            require_confirm(confirm, "delete all users")?;
            ctx.client.users().delete_all().await?;
            ctx.output.emit_json(&json!({"deleted": "all"}))
        }
    }
}
