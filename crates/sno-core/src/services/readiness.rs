use std::time::Duration;

use tokio::time::Instant;

use super::remote::RemoteClient;
use crate::models::{Node, ReadinessConfig, ReadinessStrategy};

/// How to tell that a freshly started service accepts work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// `mysqladmin ping` against the instance.
    Mysql { address: String, port: u16 },
    /// A TCP connect to the port.
    Tcp { address: String, port: u16 },
}

impl Probe {
    pub fn for_engine(engine: &str, address: &str, port: u16) -> Self {
        let address = address.to_string();
        match engine {
            "mysql" => Probe::Mysql { address, port },
            _ => Probe::Tcp { address, port },
        }
    }

    pub fn command(&self) -> String {
        match self {
            Probe::Mysql { address, port } => {
                format!("mysqladmin ping -h {address} -P {port} -u root --silent")
            }
            Probe::Tcp { address, port } => {
                format!("bash -c 'exec 3<>/dev/tcp/{address}/{port}'")
            }
        }
    }
}

/// Wait until the service is ready. With the fixed strategy this is a plain
/// delay; with probing, `probe` is retried on `node` until it succeeds or the
/// timeout elapses. Returns false on timeout, which callers log and move past.
pub async fn settle(
    client: &RemoteClient,
    config: &ReadinessConfig,
    what: &str,
    fixed_delay_ms: u64,
    probe: Option<(&Node, Probe)>,
) -> bool {
    match (config.strategy, probe) {
        (ReadinessStrategy::Probe, Some((node, probe))) => {
            poll(client, config, what, node, &probe).await
        }
        _ => {
            if fixed_delay_ms > 0 {
                tracing::debug!(what, delay_ms = fixed_delay_ms, "waiting");
                tokio::time::sleep(Duration::from_millis(fixed_delay_ms)).await;
            }
            true
        }
    }
}

async fn poll(
    client: &RemoteClient,
    config: &ReadinessConfig,
    what: &str,
    node: &Node,
    probe: &Probe,
) -> bool {
    let deadline = Instant::now() + Duration::from_millis(config.probe_timeout_ms);
    let interval = Duration::from_millis(config.probe_interval_ms.max(1));
    let command = probe.command();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        if client.launch_and_wait(&[node], &command, None).await.is_ok() {
            tracing::info!(what, attempts, "ready");
            return true;
        }
        if Instant::now() + interval > deadline {
            tracing::warn!(
                what,
                attempts,
                timeout_ms = config.probe_timeout_ms,
                "not ready before timeout, continuing"
            );
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;
    use std::sync::Arc;

    fn probing(timeout_ms: u64) -> ReadinessConfig {
        ReadinessConfig {
            strategy: ReadinessStrategy::Probe,
            probe_timeout_ms: timeout_ms,
            probe_interval_ms: 10,
            ..ReadinessConfig::immediate()
        }
    }

    #[test]
    fn probe_commands_per_engine() {
        assert_eq!(
            Probe::for_engine("mysql", "10.0.0.2", 3306).command(),
            "mysqladmin ping -h 10.0.0.2 -P 3306 -u root --silent"
        );
        assert_eq!(
            Probe::for_engine("redis", "10.0.0.2", 6379).command(),
            "bash -c 'exec 3<>/dev/tcp/10.0.0.2/6379'"
        );
    }

    #[tokio::test]
    async fn fixed_strategy_never_probes() {
        let recorder = Arc::new(RecordingTransport::new());
        let client = RemoteClient::new(recorder.clone());
        let node = Node::new("n1", "10.0.0.1", "root");
        let probe = Probe::for_engine("mysql", "10.0.0.1", 3306);

        let ready = settle(&client, &ReadinessConfig::immediate(), "db1", 0, Some((&node, probe))).await;
        assert!(ready);
        assert!(recorder.events().is_empty());
    }

    #[tokio::test]
    async fn successful_probe_returns_on_first_attempt() {
        let recorder = Arc::new(RecordingTransport::new());
        let client = RemoteClient::new(recorder.clone());
        let node = Node::new("n1", "10.0.0.1", "root");
        let probe = Probe::for_engine("mysql", "10.0.0.1", 3306);

        assert!(settle(&client, &probing(1_000), "db1", 0, Some((&node, probe))).await);
        assert_eq!(recorder.execs().len(), 1);
    }

    #[tokio::test]
    async fn failing_probe_gives_up_after_the_timeout() {
        let recorder = Arc::new(RecordingTransport::new().failing("mysqladmin"));
        let client = RemoteClient::new(recorder.clone());
        let node = Node::new("n1", "10.0.0.1", "root");
        let probe = Probe::for_engine("mysql", "10.0.0.1", 3306);

        assert!(!settle(&client, &probing(100), "db1", 0, Some((&node, probe))).await);
        assert!(recorder.execs().len() > 1);
    }
}
