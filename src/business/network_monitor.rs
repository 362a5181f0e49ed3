//! Host reachability
//!
//! A periodic TCP connect probe on the background runtime. Only changes are
//! reported, over a plain channel the main thread drains on its tick.

use std::net::SocketAddr;
use std::sync::mpsc::Sender;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub targets: Vec<SocketAddr>,
    pub interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            targets: vec![
                SocketAddr::from(([1, 1, 1, 1], 443)),
                SocketAddr::from(([8, 8, 8, 8], 53)),
            ],
            interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(3),
        }
    }
}

/// Reachable when any target accepts a connection in time
pub async fn probe(targets: &[SocketAddr], connect_timeout: Duration) -> bool {
    for target in targets {
        match tokio::time::timeout(connect_timeout, TcpStream::connect(target)).await {
            Ok(Ok(_)) => return true,
            Ok(Err(e)) => tracing::trace!("Probe {} failed: {}", target, e),
            Err(_) => tracing::trace!("Probe {} timed out", target),
        }
    }
    false
}

/// Last known state; the host starts out assumed online
#[derive(Debug)]
struct Reachability {
    online: bool,
}

impl Reachability {
    fn new() -> Self {
        Self { online: true }
    }

    fn observe(&mut self, online: bool) -> Option<bool> {
        if online == self.online {
            return None;
        }
        self.online = online;
        Some(online)
    }
}

pub struct NetworkMonitor {
    task: JoinHandle<()>,
}

impl NetworkMonitor {
    pub fn spawn(runtime: &Handle, config: ProbeConfig, updates: Sender<bool>) -> Self {
        let task = runtime.spawn(async move {
            let mut state = Reachability::new();
            let mut ticker = tokio::time::interval(config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let online = probe(&config.targets, config.connect_timeout).await;
                if let Some(changed) = state.observe(online) {
                    tracing::info!("Network {}", if changed { "reachable" } else { "unreachable" });
                    if updates.send(changed).is_err() {
                        break;
                    }
                }
            }
        });
        Self { task }
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
