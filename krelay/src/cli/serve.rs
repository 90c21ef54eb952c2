use anyhow::{Context, Result};
use keyrelay::{
    prelude::*,
    server::{AppState, build_router},
};
use tracing::info;

use crate::cli::{AppContext, ServeArgs};

pub async fn handle(ctx: &AppContext, args: ServeArgs) -> Result<()> {
    let state = AppState::new(ctx.client.clone(), RestoreConfig::default());
    let reporter = state.engine.reporter();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!("control server listening on http://{}", listener.local_addr()?);
    ctx.output
        .emit_text(&format!("listening on http://{}", args.listen))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
            reporter.request_stop();
        })
        .await
        .context("control server")?;
    Ok(())
}
