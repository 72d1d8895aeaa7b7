//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Mutex;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use service_balancer::config::{BalancerConfig, InstanceConfig};
use service_balancer::health::{Probe, ProbeOutcome};
use service_balancer::registry::ServiceInstance;
use service_balancer::Upstream;

/// Start a programmable mock backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = std::sync::Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;

                let (status, body) = f().await;
                let status_text = match status {
                    200 => "200 OK",
                    302 => "302 Found",
                    404 => "404 Not Found",
                    500 => "500 Internal Server Error",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Start a mock backend that always answers with `status`.
pub async fn start_mock_backend(status: u16) -> SocketAddr {
    start_programmable_backend(move || async move { (status, "ok".to_string()) }).await
}

/// Probe whose outcome per instance is set by the test; unset instances pass.
#[derive(Default)]
pub struct ScriptedProbe {
    outcomes: Mutex<HashMap<String, ProbeOutcome>>,
}

impl ScriptedProbe {
    pub fn fail(&self, name: &str) {
        self.set(name, ProbeOutcome::failure(1.0));
    }

    pub fn pass(&self, name: &str) {
        self.set(name, ProbeOutcome::success(1.0));
    }

    pub fn set(&self, name: &str, outcome: ProbeOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(name.to_string(), outcome);
    }
}

impl Probe for ScriptedProbe {
    fn probe<'a>(&'a self, instance: &'a ServiceInstance) -> BoxFuture<'a, ProbeOutcome> {
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .get(instance.name())
            .copied()
            .unwrap_or(ProbeOutcome::success(1.0));
        Box::pin(async move { outcome })
    }
}

/// Upstream that fails for the named instances and logs every call.
#[derive(Default)]
pub struct ScriptedUpstream {
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedUpstream {
    pub fn fail(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn recover(&self, name: &str) {
        self.failing.lock().unwrap().remove(name);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
    }
}

impl Upstream for ScriptedUpstream {
    fn call<'a>(&'a self, instance: &'a ServiceInstance) -> BoxFuture<'a, Result<(), String>> {
        self.calls.lock().unwrap().push(instance.name().to_string());
        let fail = self.failing.lock().unwrap().contains(instance.name());
        Box::pin(async move {
            if fail {
                Err("injected failure".to_string())
            } else {
                Ok(())
            }
        })
    }
}

/// Config with one weight-1 instance per name and fast retries.
pub fn config_with(names: &[&str]) -> BalancerConfig {
    let mut config = BalancerConfig::default();
    config.instances = names
        .iter()
        .enumerate()
        .map(|(i, name)| InstanceConfig {
            name: name.to_string(),
            address: format!("http://127.0.0.1:{}", 9101 + i),
            weight: 1,
        })
        .collect();
    config.retries.base_delay_ms = 1;
    config.retries.max_delay_ms = 5;
    config.health_check.interval_ms = 10;
    config.health_check.timeout_ms = 100;
    config
}
