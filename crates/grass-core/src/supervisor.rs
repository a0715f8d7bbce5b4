//! Session supervisor
//!
//! Turns the identity list and the optional proxy list into sessions:
//! proxies are normalized, deduplicated and validated concurrently, then one
//! session is started for every (identity, usable route) pair. Pre-flight
//! failures are returned before any session starts; afterwards nothing is
//! ever reported back to the caller except through the event sink.

use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::{CoreError, Result};
use crate::events::{EventSink, StatusEvent, StatusKind};
use crate::identity::Identity;
use crate::route::{Route, RouteMetadata};
use crate::session::{Session, SessionContext, SessionHandle, SessionSettings};
use crate::transport::Connector;
use crate::usage::UsageTable;
use crate::validator::RouteValidator;

/// How sessions reach the endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// One direct session per identity, no validation
    Direct,
    /// Raw proxy addresses; each identity gets a session per usable proxy
    Proxy(Vec<String>),
}

/// A session that will be started
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPlan {
    pub identity: Identity,
    pub route: Route,
    pub metadata: Option<RouteMetadata>,
}

pub struct Supervisor<C, V, E> {
    config: ClientConfig,
    connector: Arc<C>,
    validator: Arc<V>,
    sink: Arc<E>,
    usage: UsageTable,
}

impl<C, V, E> Supervisor<C, V, E>
where
    C: Connector,
    V: RouteValidator,
    E: EventSink,
{
    pub fn new(config: ClientConfig, connector: Arc<C>, validator: Arc<V>, sink: Arc<E>) -> Self {
        Self {
            config,
            connector,
            validator,
            sink,
            usage: UsageTable::new(),
        }
    }

    /// Identity usage aggregated over all sessions
    pub fn usage(&self) -> &UsageTable {
        &self.usage
    }

    /// Work out every session to start
    pub async fn plan(&self, identities: &[Identity], mode: &Mode) -> Result<Vec<SessionPlan>> {
        let identities = dedup(identities.iter().cloned());
        if identities.is_empty() {
            return Err(CoreError::Configuration("no identities supplied".to_string()));
        }

        let addresses = match mode {
            Mode::Direct => {
                return Ok(identities
                    .into_iter()
                    .map(|identity| SessionPlan {
                        identity,
                        route: Route::Direct,
                        metadata: None,
                    })
                    .collect());
            }
            Mode::Proxy(addresses) => addresses,
        };

        let mut routes = Vec::new();
        for raw in addresses {
            match Route::proxied(raw) {
                Ok(route) => routes.push(route),
                Err(e) => {
                    warn!("Skipping proxy '{}': {}", raw.trim(), e);
                    let kind = StatusKind::RouteRejected {
                        reason: e.to_string(),
                    };
                    self.emit_route(raw.trim(), kind).await;
                }
            }
        }
        let routes = dedup(routes);

        let validated = self.validate_all(routes).await;
        if validated.is_empty() {
            return Err(CoreError::Configuration(
                "proxy mode selected but no proxy is usable".to_string(),
            ));
        }

        let mut plans = Vec::with_capacity(validated.len() * identities.len());
        for (route, metadata) in validated {
            for identity in &identities {
                plans.push(SessionPlan {
                    identity: identity.clone(),
                    route: route.clone(),
                    metadata: Some(metadata.clone()),
                });
            }
        }
        Ok(plans)
    }

    async fn validate_all(&self, routes: Vec<Route>) -> Vec<(Route, RouteMetadata)> {
        let checks = routes.into_iter().map(|route| async move {
            let result = self.validator.validate(&route).await;
            (route, result)
        });

        let mut usable = Vec::new();
        for (route, result) in join_all(checks).await {
            match result {
                Ok(metadata) => {
                    info!(%route, ip = %metadata.ip, "Proxy validated");
                    let kind = StatusKind::RouteValidated {
                        ip: metadata.ip.clone(),
                        region: metadata.region.clone(),
                        country: metadata.country.clone(),
                    };
                    self.emit_route(route.to_string(), kind).await;
                    usable.push((route, metadata));
                }
                Err(e) => {
                    warn!(%route, "Proxy rejected: {}", e);
                    let reason = match e {
                        CoreError::RouteUnreachable { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    self.emit_route(route.to_string(), StatusKind::RouteRejected { reason })
                        .await;
                }
            }
        }
        usable
    }

    /// Plan and start every session
    pub async fn start(&self, identities: &[Identity], mode: &Mode) -> Result<SupervisorHandle> {
        let plans = self.plan(identities, mode).await?;
        Ok(self.launch(plans))
    }

    /// Start one session per plan. Every session is running when this returns.
    pub fn launch(&self, plans: Vec<SessionPlan>) -> SupervisorHandle {
        let ctx = SessionContext {
            connector: self.connector.clone(),
            sink: self.sink.clone(),
            usage: self.usage.clone(),
            settings: SessionSettings::from(&self.config),
        };

        let sessions: Vec<SessionHandle> = plans
            .into_iter()
            .map(|plan| {
                Session::new(plan.identity, plan.route, plan.metadata.as_ref(), ctx.clone())
                    .spawn()
            })
            .collect();

        info!(sessions = sessions.len(), "All sessions started");
        SupervisorHandle {
            sessions,
            usage: self.usage.clone(),
        }
    }

    async fn emit_route(&self, route: impl Into<String>, kind: StatusKind) {
        if let Err(e) = self.sink.emit(&StatusEvent::for_route(route, kind)).await {
            warn!("Failed to emit status event: {}", e);
        }
    }
}

fn dedup<T: PartialEq>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut unique: Vec<T> = Vec::new();
    for item in items {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    unique
}

/// The running sessions of a supervisor
pub struct SupervisorHandle {
    sessions: Vec<SessionHandle>,
    usage: UsageTable,
}

impl SupervisorHandle {
    pub fn sessions(&self) -> &[SessionHandle] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn usage(&self) -> &UsageTable {
        &self.usage
    }

    /// Wait for every session task. Sessions only end when aborted.
    pub async fn join(self) {
        let tasks = self.sessions.into_iter().map(SessionHandle::into_task);
        for result in join_all(tasks).await {
            if let Err(e) = result {
                if e.is_panic() {
                    warn!("Session task panicked: {}", e);
                }
            }
        }
    }

    /// Abort every session and wait for the tasks to wind down
    pub async fn shutdown(self) {
        for session in &self.sessions {
            session.abort();
        }
        self.join().await;
    }
}
