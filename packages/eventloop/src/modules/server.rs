//! Pieces shared by the HTTP and websocket modules.
//!
//! Both modules keep a path → handler table that can change while the server
//! is running, and both serve an axum router on an optional listen address.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::RwLock;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{EventLoopError, Result};

/// Path-keyed handler table guarded for concurrent register/lookup.
pub(crate) struct RouteTable<H> {
    routes: RwLock<HashMap<String, H>>,
}

impl<H: Clone> RouteTable<H> {
    pub(crate) fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, path: &str, handler: H) -> Result<()> {
        validate_path(path)?;
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        if routes.contains_key(path) {
            return Err(EventLoopError::RouteAlreadyRegistered {
                path: path.to_string(),
            });
        }
        routes.insert(path.to_string(), handler);
        Ok(())
    }

    pub(crate) fn get(&self, path: &str) -> Option<H> {
        self.routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    pub(crate) fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        paths.sort_unstable();
        paths
    }
}

fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(EventLoopError::InvalidPath {
            path: path.to_string(),
        });
    }
    Ok(())
}

/// The address a server actually bound, published once known.
pub(crate) struct BoundAddr {
    tx: watch::Sender<Option<SocketAddr>>,
}

impl BoundAddr {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub(crate) fn set(&self, addr: SocketAddr) {
        self.tx.send_replace(Some(addr));
    }

    /// Wait until the server has bound its listener.
    pub(crate) async fn wait(&self) -> Option<SocketAddr> {
        let mut rx = self.tx.subscribe();
        let bound = rx.wait_for(Option::is_some).await.ok()?;
        *bound
    }
}

/// Bind `addr` and serve `router` until `shutdown` is cancelled.
pub(crate) async fn serve(
    module: &'static str,
    addr: SocketAddr,
    router: Router,
    bound: &BoundAddr,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| EventLoopError::module(module, e))?;
    let local = listener
        .local_addr()
        .map_err(|e| EventLoopError::module(module, e))?;
    bound.set(local);
    info!(module, addr = %local, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| EventLoopError::module(module, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_table_rejects_bad_and_duplicate_paths() {
        let table: RouteTable<u8> = RouteTable::new();
        table.insert("/a", 1).unwrap();

        assert!(matches!(
            table.insert("a", 2),
            Err(EventLoopError::InvalidPath { .. })
        ));
        assert!(matches!(
            table.insert("", 2),
            Err(EventLoopError::InvalidPath { .. })
        ));
        assert!(matches!(
            table.insert("/a", 3),
            Err(EventLoopError::RouteAlreadyRegistered { .. })
        ));
        assert_eq!(table.get("/a"), Some(1));
        assert_eq!(table.get("/b"), None);
    }

    #[test]
    fn test_paths_sorted() {
        let table: RouteTable<()> = RouteTable::new();
        table.insert("/z", ()).unwrap();
        table.insert("/a", ()).unwrap();
        assert_eq!(table.paths(), vec!["/a".to_string(), "/z".to_string()]);
    }

    #[tokio::test]
    async fn test_bound_addr_wait_sees_earlier_set() {
        let bound = BoundAddr::new();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        bound.set(addr);
        assert_eq!(bound.wait().await, Some(addr));
    }
}
