use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix_web::rt::task::JoinHandle;
use log::{error, info, warn};
use reqwest::StatusCode;

const PING_TIMEOUT: Duration = Duration::from_secs(30);
const WARMUP_TIMEOUT: Duration = Duration::from_secs(60);
const ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// What a /health probe told us about the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutcome {
    /// 200: nothing to do until the next interval.
    Healthy,
    /// 502: the platform is cold-starting the app; kick /warmup.
    Starting,
    /// 503 or a connect/timeout failure: wait for the next interval.
    Unavailable,
    Other(u16),
}

impl PingOutcome {
    pub fn classify(status: StatusCode) -> Self {
        match status {
            StatusCode::OK => PingOutcome::Healthy,
            StatusCode::BAD_GATEWAY => PingOutcome::Starting,
            StatusCode::SERVICE_UNAVAILABLE => PingOutcome::Unavailable,
            other => PingOutcome::Other(other.as_u16()),
        }
    }
}

/// Periodically pings the service's own public URL so free-tier hosts
/// don't idle it out. Runs alongside the HTTP server and stops when asked.
#[derive(Clone)]
pub struct KeepAliveService {
    client: reqwest::Client,
    base_url: String,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl KeepAliveService {
    pub fn new(base_url: String, interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn start(&self) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let service = self.clone();
        info!(
            "Keep-alive prober started for {} (interval: {}s)",
            service.base_url,
            service.interval.as_secs()
        );
        actix_web::rt::spawn(async move { service.run().await })
    }

    pub async fn stop(&self, handle: JoinHandle<()>) {
        self.running.store(false, Ordering::SeqCst);
        if tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .is_err()
        {
            warn!("Keep-alive prober did not stop within 5s");
        } else {
            info!("Keep-alive prober stopped");
        }
    }

    async fn run(&self) {
        while self.running.load(Ordering::SeqCst) {
            self.sleep_interval(self.interval).await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            match self.ping_server().await {
                Ok(PingOutcome::Healthy) => {}
                Ok(PingOutcome::Starting) => {
                    info!("Server is cold-starting, requesting warmup");
                    self.try_warmup().await;
                }
                Ok(PingOutcome::Unavailable) => {
                    warn!("Server temporarily unavailable, will retry on next interval");
                }
                Ok(PingOutcome::Other(code)) => {
                    warn!("Unexpected keep-alive status: {}", code);
                }
                Err(e) => {
                    error!("Keep-alive ping failed unexpectedly: {:?}", e);
                    self.sleep_interval(ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Sleeps in one-second steps so a stop request is observed promptly.
    async fn sleep_interval(&self, total: Duration) {
        let mut remaining = total;
        while !remaining.is_zero() && self.running.load(Ordering::SeqCst) {
            let step = remaining.min(Duration::from_secs(1));
            tokio::time::sleep(step).await;
            remaining -= step;
        }
    }

    /// Connection refusals and timeouts are routine while the host spins
    /// the app down, so they classify as Unavailable rather than errors.
    async fn ping_server(&self) -> Result<PingOutcome, reqwest::Error> {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).timeout(PING_TIMEOUT).send().await {
            Ok(response) => {
                let outcome = PingOutcome::classify(response.status());
                if outcome == PingOutcome::Healthy {
                    info!("Keep-alive ping OK");
                }
                Ok(outcome)
            }
            Err(e) if e.is_timeout() || e.is_connect() => {
                warn!("Keep-alive ping could not reach server: {}", e);
                Ok(PingOutcome::Unavailable)
            }
            Err(e) => Err(e),
        }
    }

    async fn try_warmup(&self) {
        let url = format!("{}/warmup", self.base_url);
        match self.client.get(&url).timeout(WARMUP_TIMEOUT).send().await {
            Ok(response) => info!("Warmup request returned {}", response.status()),
            Err(e) => warn!("Warmup request failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_statuses() {
        assert_eq!(PingOutcome::classify(StatusCode::OK), PingOutcome::Healthy);
        assert_eq!(
            PingOutcome::classify(StatusCode::BAD_GATEWAY),
            PingOutcome::Starting
        );
        assert_eq!(
            PingOutcome::classify(StatusCode::SERVICE_UNAVAILABLE),
            PingOutcome::Unavailable
        );
        assert_eq!(
            PingOutcome::classify(StatusCode::IM_A_TEAPOT),
            PingOutcome::Other(418)
        );
    }

    #[test]
    fn base_url_is_normalized() {
        let service = KeepAliveService::new(
            "https://example.com/".to_string(),
            Duration::from_secs(300),
        );
        assert_eq!(service.base_url, "https://example.com");
    }
}
