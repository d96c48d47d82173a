//! Per-call connector session.
//!
//! A session opens at most one connector per exchange, caches precision
//! tables per exchange, and closes every connector it opened exactly once
//! when [`ConnectorSession::close_all`] consumes it. A session dropped
//! before `close_all` (for example a cancelled plan) hands its open
//! connectors to a background task that closes them.

use sigq_core::Price;
use sigq_telemetry::Metrics;
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, warn};

use crate::connector::{ConnectorFactory, ExchangeConnector};
use crate::credentials::CredentialMaterial;
use crate::error::{OffsetError, OffsetResult};
use crate::precision::{PrecisionRules, PrecisionTable};

pub struct ConnectorSession<'a> {
    factory: &'a dyn ConnectorFactory,
    credentials: OffsetResult<CredentialMaterial>,
    defaults: PrecisionRules,
    metrics: &'a Metrics,
    connectors: HashMap<String, Box<dyn ExchangeConnector>>,
    /// Exchanges whose connector could not be opened in this session.
    failed: HashSet<String>,
    /// `None` records a failed fetch so it is not retried.
    precision: HashMap<String, Option<PrecisionTable>>,
}

impl<'a> ConnectorSession<'a> {
    pub fn new(
        factory: &'a dyn ConnectorFactory,
        credentials: OffsetResult<CredentialMaterial>,
        defaults: PrecisionRules,
        metrics: &'a Metrics,
    ) -> Self {
        Self {
            factory,
            credentials,
            defaults,
            metrics,
            connectors: HashMap::new(),
            failed: HashSet::new(),
            precision: HashMap::new(),
        }
    }

    /// Number of connectors currently open.
    pub fn open_count(&self) -> usize {
        self.connectors.len()
    }

    /// Connector for `exchange`, opening it on first use.
    pub async fn connector(&mut self, exchange: &str) -> OffsetResult<&dyn ExchangeConnector> {
        let key = exchange.to_ascii_lowercase();
        if self.failed.contains(&key) {
            return Err(OffsetError::Connector {
                exchange: exchange.to_string(),
                reason: "connector failed earlier in this session".to_string(),
            });
        }

        if !self.connectors.contains_key(&key) {
            let credentials = match &self.credentials {
                Ok(material) => material.for_exchange(exchange),
                Err(e) => Err(OffsetError::MalformedCredentials(e.to_string())),
            };
            let opened = match credentials {
                Ok(creds) => self.factory.connect(exchange, creds).await,
                Err(e) => Err(e),
            };
            match opened {
                Ok(connector) => {
                    self.metrics.connector_opened();
                    debug!(exchange, "Opened exchange connector");
                    self.connectors.insert(key.clone(), connector);
                }
                Err(e) => {
                    self.failed.insert(key);
                    return Err(e);
                }
            }
        }

        self.connectors
            .get(&key)
            .map(|c| c.as_ref())
            .ok_or_else(|| OffsetError::Connector {
                exchange: exchange.to_string(),
                reason: "connector missing from session".to_string(),
            })
    }

    /// Current price of `symbol` on `exchange`.
    pub async fn current_price(&mut self, exchange: &str, symbol: &str) -> OffsetResult<Price> {
        let connector = self.connector(exchange).await?;
        connector.current_price(symbol).await
    }

    /// Precision rules for `symbol`, fetching the exchange table once.
    pub async fn precision_rules(
        &mut self,
        exchange: &str,
        symbol: &str,
    ) -> OffsetResult<PrecisionRules> {
        let key = exchange.to_ascii_lowercase();
        if !self.precision.contains_key(&key) {
            let defaults = self.defaults;
            let fetched = match self.connector(exchange).await {
                Ok(connector) => connector.precision_rules().await,
                Err(e) => Err(e),
            };
            let table = match fetched {
                Ok(raw) => Some(PrecisionTable::from_raw(&raw, defaults)),
                Err(e) => {
                    warn!(exchange, error = %e, "Failed to fetch precision rules");
                    None
                }
            };
            self.precision.insert(key.clone(), table);
        }

        match self.precision.get(&key) {
            Some(Some(table)) => Ok(table.rules_for(symbol)),
            _ => Err(OffsetError::PrecisionUnavailable {
                exchange: exchange.to_string(),
                reason: "precision fetch failed".to_string(),
            }),
        }
    }

    /// Close every opened connector once. Returns how many were closed.
    ///
    /// Close failures are logged; the connector still counts as released.
    pub async fn close_all(mut self) -> usize {
        let connectors = std::mem::take(&mut self.connectors);
        close_connectors(connectors, self.metrics).await
    }
}

impl Drop for ConnectorSession<'_> {
    fn drop(&mut self) {
        if self.connectors.is_empty() {
            return;
        }
        let connectors = std::mem::take(&mut self.connectors);
        let count = connectors.len();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(count, "Connector session dropped before close, releasing in background");
                let metrics = self.metrics.clone();
                handle.spawn(async move {
                    close_connectors(connectors, &metrics).await;
                });
            }
            Err(_) => {
                error!(count, "Connector session dropped outside a runtime, connectors leaked");
            }
        }
    }
}

async fn close_connectors(
    connectors: HashMap<String, Box<dyn ExchangeConnector>>,
    metrics: &Metrics,
) -> usize {
    let count = connectors.len();
    for (exchange, connector) in connectors {
        if let Err(e) = connector.close().await {
            warn!(exchange = %exchange, error = %e, "Failed to close exchange connector");
        }
        metrics.connector_closed();
        debug!(exchange = %exchange, "Closed exchange connector");
    }
    count
}
