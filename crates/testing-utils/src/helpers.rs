//! 异步测试辅助

use std::time::Duration;

use tokio::time::sleep;

pub struct TestEnv;

impl TestEnv {
    /// 轮询直到条件成立或超时，返回条件是否成立
    pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        Self::wait_for_with_interval(condition, timeout, Duration::from_millis(10)).await
    }

    pub async fn wait_for_with_interval<F, Fut>(
        mut condition: F,
        timeout: Duration,
        poll_interval: Duration,
    ) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = tokio::time::Instant::now();
        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(poll_interval).await;
        }
        condition().await
    }
}
