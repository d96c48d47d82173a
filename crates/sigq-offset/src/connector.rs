//! Exchange connector ports.

use sigq_core::{BoxFuture, Price};
use std::collections::HashMap;

use crate::credentials::ExchangeCredentials;
use crate::error::OffsetResult;
use crate::precision::RawPrecisionRules;

/// Authenticated connection to one exchange.
///
/// Holds network resources; every connector must be closed exactly once.
pub trait ExchangeConnector: Send + Sync {
    fn exchange(&self) -> &str;

    /// Last traded price of `symbol`.
    fn current_price<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, OffsetResult<Price>>;

    /// Published precision rules, keyed by symbol.
    fn precision_rules(&self) -> BoxFuture<'_, OffsetResult<HashMap<String, RawPrecisionRules>>>;

    /// Release the connection.
    fn close(&self) -> BoxFuture<'_, OffsetResult<()>>;
}

/// Builds connectors from credentials.
pub trait ConnectorFactory: Send + Sync {
    fn connect<'a>(
        &'a self,
        exchange: &'a str,
        credentials: &'a ExchangeCredentials,
    ) -> BoxFuture<'a, OffsetResult<Box<dyn ExchangeConnector>>>;
}
