use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use stream_batch_trigger::{telemetry, StreamTrigger, TracingSink, TriggerManifest};

/// Polls the streams named in a trigger manifest and logs the first message
/// of every delivered batch.
#[derive(Parser, Debug)]
#[clap(name = "stream-trigger", version)]
struct Cli {
    /// Path to the TOML trigger manifest.
    #[clap(long, env = "STREAM_TRIGGER_MANIFEST", default_value = "trigger.toml")]
    manifest: PathBuf,

    /// Emit logs as JSON lines.
    #[clap(long, env = "STREAM_TRIGGER_JSON_LOGS")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.json_logs);

    let manifest = TriggerManifest::load(&cli.manifest)?;
    let trigger = StreamTrigger::new(manifest, Arc::new(TracingSink::new("stream-trigger")))?;

    trigger.run().await
}
