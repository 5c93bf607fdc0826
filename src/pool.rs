use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::traits::{Connection, ConnectionFactory};

/// Keeps open connections around for reuse.
///
/// Checked-out connections are handed back with [`release`](ConnectionPool::release);
/// anything beyond `max_idle` is closed instead of kept.
pub struct ConnectionPool {
    factory: Arc<dyn ConnectionFactory>,
    idle: Mutex<Vec<Box<dyn Connection>>>,
    max_idle: usize,
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn ConnectionFactory>, max_idle: usize) -> Self {
        Self {
            factory,
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Take an idle connection, or a new one from the factory when none is left.
    /// Connections that were closed while idle are discarded.
    pub async fn acquire(&self) -> Result<Box<dyn Connection>> {
        {
            let mut idle = self.idle.lock().await;
            while let Some(conn) = idle.pop() {
                if conn.is_open() {
                    debug!(idle = idle.len(), "reusing pooled connection");
                    return Ok(conn);
                }
            }
        }
        self.factory.connect().await
    }

    /// Return a connection to the pool.
    pub async fn release(&self, mut conn: Box<dyn Connection>) {
        if conn.is_open() {
            let mut idle = self.idle.lock().await;
            if idle.len() < self.max_idle {
                idle.push(conn);
                return;
            }
        }
        if let Err(e) = conn.close().await {
            warn!(error = %e, "failed to close surplus pooled connection");
        }
    }

    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    /// Close every idle connection.
    pub async fn clear(&self) -> Result<()> {
        let drained: Vec<_> = self.idle.lock().await.drain(..).collect();
        for mut conn in drained {
            conn.close().await?;
        }
        Ok(())
    }
}
