// libs/call-session-cell/src/services/network.rs
use parking_lot::RwLock;
use reqwest::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::models::NetworkQuality;
use crate::services::listeners::{Listener, ListenerRegistry, Subscription};

/// Source of network quality readings.
/// The call manager listens to it but never owns its lifecycle.
pub trait NetworkMonitor: Send + Sync {
    fn current_quality(&self) -> NetworkQuality;

    fn add_listener(&self, listener: Listener<NetworkQuality>) -> Subscription;
}

const EXCELLENT_LATENCY: Duration = Duration::from_millis(150);
const GOOD_LATENCY: Duration = Duration::from_millis(400);

/// Grade a probe round trip
pub fn grade_latency(latency: Duration) -> NetworkQuality {
    if latency < EXCELLENT_LATENCY {
        NetworkQuality::Excellent
    } else if latency < GOOD_LATENCY {
        NetworkQuality::Good
    } else {
        NetworkQuality::Poor
    }
}

pub struct NetworkQualityMonitor {
    current: RwLock<NetworkQuality>,
    listeners: ListenerRegistry<NetworkQuality>,
}

impl NetworkQualityMonitor {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(NetworkQuality::Unknown),
            listeners: ListenerRegistry::new(),
        }
    }

    /// Record a reading; listeners only hear about changes
    pub fn report(&self, quality: NetworkQuality) {
        let previous = {
            let mut current = self.current.write();
            std::mem::replace(&mut *current, quality)
        };
        if previous == quality {
            return;
        }

        if quality == NetworkQuality::Poor {
            warn!(?previous, "Network quality degraded to poor");
        } else {
            info!(?previous, current = ?quality, "Network quality changed");
        }
        self.listeners.emit(&quality);
    }

    /// Probe `url` every `period` and report the graded round trip.
    /// Dropping the handle stops the probe.
    pub fn spawn_probe(self: &Arc<Self>, url: String, period: Duration) -> ProbeHandle {
        let monitor = Arc::clone(self);
        let client = Client::builder()
            .timeout(GOOD_LATENCY.saturating_mul(5))
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client for network probe: {}", e);
                Client::new()
            });

        info!(%url, period_secs = period.as_secs(), "Starting network quality probe");

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let started = Instant::now();
                let quality = match client.head(&url).send().await {
                    Ok(_) => grade_latency(started.elapsed()),
                    Err(e) => {
                        debug!("Network probe failed: {}", e);
                        NetworkQuality::Unknown
                    }
                };
                monitor.report(quality);
            }
        });

        ProbeHandle { task }
    }
}

impl Default for NetworkQualityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkMonitor for NetworkQualityMonitor {
    fn current_quality(&self) -> NetworkQuality {
        *self.current.read()
    }

    fn add_listener(&self, listener: Listener<NetworkQuality>) -> Subscription {
        self.listeners.add(move |quality| listener(quality))
    }
}

/// Owner of a running probe task
#[derive(Debug)]
pub struct ProbeHandle {
    task: JoinHandle<()>,
}

impl ProbeHandle {
    pub fn stop(self) {}

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for ProbeHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_grade_latency_thresholds() {
        assert_eq!(grade_latency(Duration::from_millis(20)), NetworkQuality::Excellent);
        assert_eq!(grade_latency(Duration::from_millis(150)), NetworkQuality::Good);
        assert_eq!(grade_latency(Duration::from_millis(399)), NetworkQuality::Good);
        assert_eq!(grade_latency(Duration::from_millis(400)), NetworkQuality::Poor);
    }

    #[test]
    fn test_report_only_broadcasts_changes() {
        let monitor = NetworkQualityMonitor::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _subscription = monitor.add_listener(Arc::new(move |q: &NetworkQuality| {
            sink.lock().push(*q)
        }));

        monitor.report(NetworkQuality::Good);
        monitor.report(NetworkQuality::Good);
        monitor.report(NetworkQuality::Poor);

        assert_eq!(*seen.lock(), vec![NetworkQuality::Good, NetworkQuality::Poor]);
        assert_eq!(monitor.current_quality(), NetworkQuality::Poor);
    }

    #[tokio::test]
    async fn test_probe_reports_quality() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let monitor = Arc::new(NetworkQualityMonitor::new());
        let probe = monitor.spawn_probe(server.uri(), Duration::from_millis(50));

        for _ in 0..40 {
            if monitor.current_quality() != NetworkQuality::Unknown {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        assert!(probe.is_running());
        assert_ne!(monitor.current_quality(), NetworkQuality::Unknown);
        probe.stop();
    }
}
