//! Route validation
//!
//! Before a proxied route may carry sessions it must answer one GET to the
//! IP-metadata endpoint. There is no retry; a failing route is simply left
//! out of the run.

use async_trait::async_trait;
use reqwest::{Client, Proxy};
use std::time::Duration;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{CoreError, Result};
use crate::route::{Route, RouteMetadata};

/// Screens routes before use
#[async_trait]
pub trait RouteValidator: Send + Sync + 'static {
    /// Egress metadata of `route`, or [`CoreError::RouteUnreachable`]
    async fn validate(&self, route: &Route) -> Result<RouteMetadata>;
}

/// Validator that queries an ipinfo-style JSON endpoint through the route
#[derive(Debug, Clone)]
pub struct HttpRouteValidator {
    ip_check_url: String,
    connect_timeout: Duration,
}

impl HttpRouteValidator {
    pub fn new(ip_check_url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            ip_check_url: ip_check_url.into(),
            connect_timeout,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.ip_check_url.clone(), config.validation_timeout)
    }

    fn client_for(&self, route: &Route) -> reqwest::Result<Client> {
        let builder = Client::builder().connect_timeout(self.connect_timeout);
        let builder = match route.proxy() {
            Some(proxy) => builder.proxy(Proxy::all(proxy.url())?),
            None => builder.no_proxy(),
        };
        builder.build()
    }

    async fn fetch(&self, route: &Route) -> reqwest::Result<RouteMetadata> {
        self.client_for(route)?
            .get(&self.ip_check_url)
            .send()
            .await?
            .error_for_status()?
            .json::<RouteMetadata>()
            .await
    }
}

#[async_trait]
impl RouteValidator for HttpRouteValidator {
    async fn validate(&self, route: &Route) -> Result<RouteMetadata> {
        debug!(%route, url = %self.ip_check_url, "Validating route");
        self.fetch(route)
            .await
            .map_err(|e| CoreError::RouteUnreachable {
                route: route.to_string(),
                reason: e.to_string(),
            })
    }
}
