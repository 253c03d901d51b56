//! Running-app harness for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use eventloop::{App, AppConfig};
use test_context::AsyncTestContext;
use tokio::task::JoinHandle;

const BIND_TIMEOUT: Duration = Duration::from_secs(5);

/// An [`App`] running on the test runtime with both servers on ephemeral
/// loopback ports.
///
/// # Example using test-context
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(TestApp)]
/// #[tokio::test]
/// async fn my_test(ctx: &TestApp) {
///     ctx.app.make_api_handler("/ping", |w, _| w.write_str("pong")).unwrap();
///     let body = reqwest::get(ctx.http_url("/ping")).await.unwrap();
/// }
/// ```
pub struct TestApp {
    pub app: Arc<App>,
    pub http_addr: SocketAddr,
    pub ws_addr: SocketAddr,
    runner: JoinHandle<eventloop::Result<()>>,
}

impl AsyncTestContext for TestApp {
    async fn setup() -> Self {
        Self::start(AppConfig::new(64, 2))
            .await
            .expect("Failed to start test app")
    }

    async fn teardown(self) {
        self.stop().await;
    }
}

impl TestApp {
    pub async fn start(config: AppConfig) -> anyhow::Result<Self> {
        let loopback: SocketAddr = "127.0.0.1:0".parse()?;
        let app = Arc::new(App::new(
            config.with_http_addr(loopback).with_ws_addr(loopback),
        )?);

        let runner = tokio::spawn({
            let app = app.clone();
            async move { app.run().await }
        });

        let http_addr = tokio::time::timeout(BIND_TIMEOUT, app.http().local_addr())
            .await?
            .ok_or_else(|| anyhow::anyhow!("http server has no address"))?;
        let ws_addr = tokio::time::timeout(BIND_TIMEOUT, app.ws().local_addr())
            .await?
            .ok_or_else(|| anyhow::anyhow!("websocket server has no address"))?;

        Ok(Self {
            app,
            http_addr,
            ws_addr,
            runner,
        })
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.http_addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.ws_addr, path)
    }

    /// Cancel the app and wait for `run` to return.
    pub async fn stop(self) {
        self.app.shutdown_token().cancel();
        let result = tokio::time::timeout(BIND_TIMEOUT, self.runner)
            .await
            .expect("app did not stop in time")
            .expect("app task panicked");
        result.expect("app run failed");
    }
}
