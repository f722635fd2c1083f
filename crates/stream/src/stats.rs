//! Host resource and connectivity statistics served on `/stats`.
//!
//! Read-only and independent of the store.

use std::{net::SocketAddr, time::Duration};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::System;
use tokio::{net::TcpStream, time::timeout};
use tracing::debug;

/// Snapshot returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    /// Used memory as a percentage, e.g. "41.20%"
    pub memory: String,
    /// Global CPU usage as a percentage
    pub cpu: String,
    pub internet: Connectivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    Connected,
    Disconnected,
}

/// Samples memory and CPU usage and probes connectivity.
pub struct StatsCollector {
    /// Kept between samples so CPU usage is measured over an interval
    system: Mutex<System>,
    probe_addr: SocketAddr,
    probe_timeout: Duration,
}

impl StatsCollector {
    pub fn new(probe_addr: SocketAddr, probe_timeout: Duration) -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();

        Self {
            system: Mutex::new(system),
            probe_addr,
            probe_timeout,
        }
    }

    /// Memory and CPU usage percentages.
    pub fn usage(&self) -> (f64, f64) {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.refresh_cpu_usage();

        let total = system.total_memory();
        let memory = if total == 0 {
            0.0
        } else {
            system.used_memory() as f64 / total as f64 * 100.0
        };

        (memory, f64::from(system.global_cpu_usage()))
    }

    /// Whether a TCP connection to the probe address succeeds in time.
    pub async fn probe(&self) -> Connectivity {
        match timeout(self.probe_timeout, TcpStream::connect(self.probe_addr)).await {
            Ok(Ok(_)) => Connectivity::Connected,
            Ok(Err(e)) => {
                debug!(addr = %self.probe_addr, error = %e, "Connectivity probe failed");
                Connectivity::Disconnected
            }
            Err(_) => {
                debug!(addr = %self.probe_addr, "Connectivity probe timed out");
                Connectivity::Disconnected
            }
        }
    }

    pub async fn collect(&self) -> SystemStats {
        let (memory, cpu) = self.usage();
        let internet = self.probe().await;

        SystemStats {
            memory: format_percent(memory),
            cpu: format_percent(cpu),
            internet,
        }
    }
}

fn format_percent(value: f64) -> String {
    format!("{value:.2}%")
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(41.2), "41.20%");
        assert_eq!(format_percent(0.0), "0.00%");
        assert_eq!(format_percent(99.999), "100.00%");
    }

    #[test]
    fn test_stats_json_shape() {
        let stats = SystemStats {
            memory: "12.50%".to_string(),
            cpu: "3.00%".to_string(),
            internet: Connectivity::Disconnected,
        };

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "memory": "12.50%",
                "cpu": "3.00%",
                "internet": "Disconnected"
            })
        );
    }

    #[test]
    fn test_usage_is_a_percentage() {
        let collector = StatsCollector::new(
            SocketAddr::from(([127, 0, 0, 1], 9)),
            Duration::from_millis(10),
        );
        let (memory, cpu) = collector.usage();
        assert!((0.0..=100.0).contains(&memory));
        assert!(cpu >= 0.0);
    }

    #[tokio::test]
    async fn test_probe_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let collector = StatsCollector::new(addr, Duration::from_secs(1));
        assert_eq!(collector.probe().await, Connectivity::Connected);
    }

    #[tokio::test]
    async fn test_probe_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let collector = StatsCollector::new(addr, Duration::from_secs(1));
        assert_eq!(collector.probe().await, Connectivity::Disconnected);
    }
}
