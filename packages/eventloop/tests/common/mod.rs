// Common test utilities

#[allow(dead_code)]
pub mod harness;

#[allow(unused_imports)]
pub use harness::*;

/// Poll `cond` every few milliseconds until it holds or `secs` elapse.
#[allow(dead_code)]
pub async fn wait_until(secs: u64, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(secs);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    cond()
}
