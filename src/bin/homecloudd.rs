use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use homecloud::cli::DaemonOpts;
use homecloud::config::ConfigLayer;
use homecloud::logger::{FanoutLogger, SessionLogger, TextLogger, TracingLogger};
use homecloud::logging::init_logging;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    init_logging(opts.verbose);

    let file_layer = match &opts.config {
        Some(path) => ConfigLayer::load(path)?,
        None => ConfigLayer::default(),
    };
    let layer = file_layer.merge(opts.to_layer());
    let config = layer.resolve()?;

    let logger: Arc<dyn SessionLogger> = match &layer.log_file {
        Some(path) => {
            let text = TextLogger::new(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            let sinks: Vec<Arc<dyn SessionLogger>> = vec![Arc::new(TracingLogger), Arc::new(text)];
            Arc::new(FanoutLogger::new(sinks))
        }
        None => Arc::new(TracingLogger),
    };

    tracing::info!(
        bind = %config.bind_addr(),
        root = %config.storage_root.display(),
        buffer_size = config.buffer_size,
        max_sessions = config.max_sessions,
        "starting homecloudd"
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    rt.block_on(homecloud::serve(config, logger))?;
    Ok(())
}
