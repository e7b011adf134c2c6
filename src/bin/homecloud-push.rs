use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;

use homecloud::cli::PushOpts;
use homecloud::client::{PushClient, PushItem};
use homecloud::logging::init_logging;

fn main() -> Result<()> {
    let opts = PushOpts::parse();
    init_logging(opts.verbose);

    let mut items = Vec::with_capacity(opts.files.len());
    for path in &opts.files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("{} has no usable file name", path.display()))?;
        items.push(PushItem::file(name, path));
    }
    let deadline = match opts.io_timeout_secs {
        0 => None,
        s => Some(Duration::from_secs(s)),
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    rt.block_on(async {
        let client = PushClient::connect(&opts.addr(), &opts.client_id, deadline).await?;
        let hs = client.handshake().clone();
        tracing::info!(
            client = %opts.client_id,
            last_sync = %hs.last_sync,
            buffer_size = hs.buffer_size,
            files = items.len(),
            "connected"
        );
        client.push(&items).await?;
        println!("pushed {} file(s); previous sync {}", items.len(), hs.last_sync);
        Ok(())
    })
}
