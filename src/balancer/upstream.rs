//! Upstream call seam.

use futures_util::future::BoxFuture;

use crate::config::RequestConfig;
use crate::error::{BalancerError, BalancerResult};
use crate::registry::ServiceInstance;

/// The call dispatched to a selected instance. `Err` carries a failure
/// message; the balancer applies its own timeout around every call.
pub trait Upstream: Send + Sync {
    fn call<'a>(&'a self, instance: &'a ServiceInstance) -> BoxFuture<'a, Result<(), String>>;
}

/// GET `{address}{path}`; any status below 400 succeeds.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    path: String,
}

impl HttpUpstream {
    pub fn new(config: &RequestConfig) -> BalancerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| BalancerError::InvalidConfiguration(format!("upstream client: {}", e)))?;
        Ok(Self {
            client,
            path: config.path.clone(),
        })
    }
}

impl Upstream for HttpUpstream {
    fn call<'a>(&'a self, instance: &'a ServiceInstance) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            let url = instance.url_for(&self.path).map_err(|e| e.to_string())?;
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| e.to_string())?;
            let status = response.status();
            if status.as_u16() < 400 {
                Ok(())
            } else {
                Err(format!("status {}", status))
            }
        })
    }
}
