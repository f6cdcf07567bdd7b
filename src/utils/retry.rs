use std::future::Future;
use std::time::Duration;

use anyhow::bail;
use tracing::{error, info, warn};

use crate::platform::ClientError;

const MAX_LOGIN_RETRY_SECONDS: u64 = 300;

/// Runs `op` under `timeout`, retrying once when the first attempt fails transiently.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    timeout: Duration,
    mut op: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    match attempt(timeout, op()).await {
        Err(err) if err.is_transient() => {
            warn!("retrying after transient failure operation={operation} error={err}");
            attempt(timeout, op()).await
        }
        other => other,
    }
}

/// Calls `login` up to `attempts` times, doubling the pause between failures.
pub async fn login_with_backoff<F, Fut>(
    client: &str,
    attempts: u32,
    initial_delay: Duration,
    mut login: F,
) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let attempts = attempts.max(1);
    let mut delay = initial_delay;
    for attempt in 1..=attempts {
        match login().await {
            Ok(()) => {
                info!("{client} login succeeded attempt={attempt}");
                return Ok(());
            }
            Err(err) if attempt < attempts => {
                error!(
                    "{client} login failed attempt={attempt} retry_in={}s error={err:#}",
                    delay.as_secs()
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(MAX_LOGIN_RETRY_SECONDS));
            }
            Err(err) => {
                return Err(err.context(format!("{client} login failed after {attempts} attempts")));
            }
        }
    }
    bail!("{client} login was never attempted")
}

async fn attempt<T, Fut>(timeout: Duration, fut: Fut) -> Result<T, ClientError>
where
    Fut: Future<Output = Result<T, ClientError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Transient(format!(
            "timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}
