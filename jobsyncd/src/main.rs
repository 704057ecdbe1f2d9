use jobsyncd::config::EngineConfig;
use jobsyncd::daemon::DaemonRuntime;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Serve,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Serve;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    if parse_cli_mode(std::env::args())? == CliMode::Help {
        println!("Usage: jobsyncd [--help]");
        println!("  Reads one JSON request per line on stdin, writes one reply per line on stdout.");
        println!("  JOBSYNC_DB_PATH        database file (default: <data dir>/jobsync/jobsync.db)");
        println!("  JOBSYNC_QUEUE_IDLE_MS  idle queue worker lifetime (default: 30000)");
        println!("  JOBSYNC_NOTIFY         log finished jobs (default: true)");
        println!("  RUST_LOG               log filter (default: info)");
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = EngineConfig::from_env()?;
    let daemon = DaemonRuntime::bootstrap(config).await?;
    daemon.run().await
}
