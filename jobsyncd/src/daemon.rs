use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::info;

use crate::bridge::handle_line;
use crate::config::EngineConfig;
use crate::sync::SyncEngine;

pub struct DaemonRuntime {
    config: EngineConfig,
    engine: Arc<SyncEngine>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: EngineConfig) -> anyhow::Result<Self> {
        let engine = Arc::new(SyncEngine::from_config(&config));
        let report = engine
            .startup()
            .await
            .into_result()
            .context("failed to start sync engine")?;
        info!(
            database = %report.database,
            pending_tasks = report.pending_tasks.len(),
            "sync engine ready"
        );
        Ok(Self { config, engine })
    }

    pub fn engine(&self) -> Arc<SyncEngine> {
        Arc::clone(&self.engine)
    }

    /// Serves stdin requests until EOF or Ctrl-C.
    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            database = %self.config.database.describe(),
            notifications = self.config.notifications,
            "jobsyncd serving on stdio"
        );
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        tokio::select! {
            res = serve(&self.engine, stdin, stdout) => {
                let handled = res?;
                info!(handled, "input closed");
            }
            res = tokio::signal::ctrl_c() => {
                res.context("failed waiting for shutdown signal")?;
                info!("shutdown requested");
            }
        }
        Ok(())
    }
}

/// Answers each non-blank request line with one reply line. Returns the
/// number of requests handled.
pub async fn serve<R, W>(engine: &SyncEngine, reader: R, mut writer: W) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut handled = 0;
    while let Some(line) = lines
        .next_line()
        .await
        .context("failed to read request")?
    {
        if line.trim().is_empty() {
            continue;
        }
        let mut reply = handle_line(engine, &line).await;
        reply.push('\n');
        writer
            .write_all(reply.as_bytes())
            .await
            .context("failed to write reply")?;
        writer.flush().await.context("failed to flush reply")?;
        handled += 1;
    }
    Ok(handled)
}
