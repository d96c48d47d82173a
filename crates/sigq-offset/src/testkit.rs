//! Mock exchange connectors for offset planner tests.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use sigq_core::{BoxFuture, Price};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::connector::{ConnectorFactory, ExchangeConnector};
use crate::credentials::ExchangeCredentials;
use crate::error::{OffsetError, OffsetResult};
use crate::precision::RawPrecisionRules;

/// Scripted behaviour of one mock exchange.
#[derive(Debug, Clone, Default)]
pub struct MockExchange {
    prices: HashMap<String, Price>,
    rules: HashMap<String, RawPrecisionRules>,
    failing_prices: HashSet<String>,
    stalled_prices: HashSet<String>,
    fail_rules: bool,
    fail_close: bool,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, symbol: &str, price: Decimal) -> Self {
        self.prices.insert(symbol.to_string(), Price::new(price));
        self
    }

    pub fn with_rules(mut self, symbol: &str, step_size: Decimal, min_notional: Decimal) -> Self {
        self.rules.insert(
            symbol.to_string(),
            RawPrecisionRules {
                step_size: Some(step_size),
                quantity_decimals: None,
                min_notional: Some(min_notional),
            },
        );
        self
    }

    pub fn failing_price(mut self, symbol: &str) -> Self {
        self.failing_prices.insert(symbol.to_string());
        self
    }

    /// Price requests for `symbol` never complete.
    pub fn stalled_price(mut self, symbol: &str) -> Self {
        self.stalled_prices.insert(symbol.to_string());
        self
    }

    pub fn failing_rules(mut self) -> Self {
        self.fail_rules = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }
}

/// Shared record of connector activity.
#[derive(Debug, Default)]
pub struct ConnectorLedger {
    connect_attempts: AtomicUsize,
    opened: Mutex<Vec<String>>,
    closed: Mutex<Vec<String>>,
    precision_fetches: AtomicUsize,
    price_fetches: Mutex<Vec<String>>,
    api_keys: Mutex<Vec<String>>,
}

impl ConnectorLedger {
    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().clone()
    }

    pub fn precision_fetches(&self) -> usize {
        self.precision_fetches.load(Ordering::SeqCst)
    }

    /// Symbols whose price was requested, in request order.
    pub fn price_fetches(&self) -> Vec<String> {
        self.price_fetches.lock().clone()
    }

    /// API keys presented to the factory, in connect order.
    pub fn api_keys(&self) -> Vec<String> {
        self.api_keys.lock().clone()
    }

    /// True when every opened connector was closed exactly once.
    pub fn balanced(&self) -> bool {
        let mut opened = self.opened();
        let mut closed = self.closed();
        opened.sort();
        closed.sort();
        opened == closed
    }
}

pub struct MockConnector {
    exchange: String,
    script: MockExchange,
    ledger: Arc<ConnectorLedger>,
}

impl ExchangeConnector for MockConnector {
    fn exchange(&self) -> &str {
        &self.exchange
    }

    fn current_price<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, OffsetResult<Price>> {
        self.ledger.price_fetches.lock().push(symbol.to_string());
        if self.script.stalled_prices.contains(symbol) {
            return Box::pin(std::future::pending());
        }
        let result = if self.script.failing_prices.contains(symbol) {
            Err(OffsetError::PriceUnavailable {
                exchange: self.exchange.clone(),
                symbol: symbol.to_string(),
                reason: "ticker timeout".to_string(),
            })
        } else {
            self.script
                .prices
                .get(symbol)
                .copied()
                .ok_or_else(|| OffsetError::PriceUnavailable {
                    exchange: self.exchange.clone(),
                    symbol: symbol.to_string(),
                    reason: "unknown symbol".to_string(),
                })
        };
        Box::pin(std::future::ready(result))
    }

    fn precision_rules(&self) -> BoxFuture<'_, OffsetResult<HashMap<String, RawPrecisionRules>>> {
        self.ledger.precision_fetches.fetch_add(1, Ordering::SeqCst);
        let result = if self.script.fail_rules {
            Err(OffsetError::PrecisionUnavailable {
                exchange: self.exchange.clone(),
                reason: "markets endpoint down".to_string(),
            })
        } else {
            Ok(self.script.rules.clone())
        };
        Box::pin(std::future::ready(result))
    }

    fn close(&self) -> BoxFuture<'_, OffsetResult<()>> {
        self.ledger.closed.lock().push(self.exchange.clone());
        let result = if self.script.fail_close {
            Err(OffsetError::Connector {
                exchange: self.exchange.clone(),
                reason: "socket already gone".to_string(),
            })
        } else {
            Ok(())
        };
        Box::pin(std::future::ready(result))
    }
}

/// Factory handing out [`MockConnector`]s for registered exchanges.
#[derive(Default)]
pub struct MockConnectorFactory {
    exchanges: Mutex<HashMap<String, MockExchange>>,
    failing: Mutex<HashSet<String>>,
    ledger: Arc<ConnectorLedger>,
}

impl MockConnectorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_exchange(&self, exchange: &str, script: MockExchange) {
        self.exchanges.lock().insert(exchange.to_string(), script);
    }

    /// Make connecting to `exchange` fail.
    pub fn fail_connect(&self, exchange: &str) {
        self.failing.lock().insert(exchange.to_string());
    }

    pub fn ledger(&self) -> &ConnectorLedger {
        &self.ledger
    }
}

impl ConnectorFactory for MockConnectorFactory {
    fn connect<'a>(
        &'a self,
        exchange: &'a str,
        credentials: &'a ExchangeCredentials,
    ) -> BoxFuture<'a, OffsetResult<Box<dyn ExchangeConnector>>> {
        self.ledger.connect_attempts.fetch_add(1, Ordering::SeqCst);
        self.ledger.api_keys.lock().push(credentials.api_key.clone());

        let result = if self.failing.lock().contains(exchange) {
            Err(OffsetError::Connector {
                exchange: exchange.to_string(),
                reason: "authentication rejected".to_string(),
            })
        } else {
            match self.exchanges.lock().get(exchange).cloned() {
                Some(script) => {
                    self.ledger.opened.lock().push(exchange.to_string());
                    Ok(Box::new(MockConnector {
                        exchange: exchange.to_string(),
                        script,
                        ledger: Arc::clone(&self.ledger),
                    }) as Box<dyn ExchangeConnector>)
                }
                None => Err(OffsetError::Connector {
                    exchange: exchange.to_string(),
                    reason: "unsupported exchange".to_string(),
                }),
            }
        };
        Box::pin(std::future::ready(result))
    }
}
