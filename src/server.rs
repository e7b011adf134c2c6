//! Session listener: accepts connections and runs one session per task.

use crate::config::SessionConfig;
use crate::error::StartupError;
use crate::logger::SessionLogger;
use crate::metadata::MetadataStore;
use crate::session::Session;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration};

// Back-off after a failed accept (e.g. EMFILE) so the loop does not spin
const ACCEPT_RETRY_MS: u64 = 100;

pub struct Server {
    listener: TcpListener,
    config: Arc<SessionConfig>,
    store: Arc<MetadataStore>,
    logger: Arc<dyn SessionLogger>,
}

impl Server {
    /// Validate the configuration, prepare the storage root and bind.
    /// Any failure here is fatal; nothing has been served yet.
    pub async fn bind(
        config: SessionConfig,
        logger: Arc<dyn SessionLogger>,
    ) -> Result<Self, StartupError> {
        config.validate()?;

        let root = &config.storage_root;
        let storage_err = |source: std::io::Error| StartupError::StorageRoot {
            path: root.clone(),
            source,
        };
        tokio::fs::create_dir_all(root).await.map_err(storage_err)?;
        let canonical_root = tokio::fs::canonicalize(root).await.map_err(storage_err)?;
        let md = tokio::fs::metadata(&canonical_root)
            .await
            .map_err(storage_err)?;
        if !md.is_dir() {
            return Err(storage_err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "not a directory",
            )));
        }

        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| StartupError::Bind { addr, source })?;

        let config = SessionConfig {
            storage_root: canonical_root.clone(),
            ..config
        };
        Ok(Self {
            listener,
            config: Arc::new(config),
            store: Arc::new(MetadataStore::new(canonical_root)),
            logger,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<MetadataStore> {
        self.store.clone()
    }

    /// Accept forever. Session errors are reported and swallowed; they
    /// never end the loop.
    pub async fn run(self) {
        if let Ok(addr) = self.listener.local_addr() {
            self.logger.listening(&addr, self.store.root());
        }
        let slots = Arc::new(Semaphore::new(self.config.max_sessions));
        loop {
            let permit = match slots.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    self.logger.accept_error(&e.to_string());
                    sleep(Duration::from_millis(ACCEPT_RETRY_MS)).await;
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);
            let peer = peer.to_string();
            self.logger.connected(&peer);

            let session = Session::new(
                stream,
                peer,
                self.config.clone(),
                self.store.clone(),
                self.logger.clone(),
            );
            tokio::spawn(async move {
                let _permit = permit;
                // Outcome already went to the logger
                let _ = session.run().await;
            });
        }
    }
}

/// Bind and serve until the process is stopped.
pub async fn serve(
    config: SessionConfig,
    logger: Arc<dyn SessionLogger>,
) -> Result<(), StartupError> {
    let server = Server::bind(config, logger).await?;
    server.run().await;
    Ok(())
}
