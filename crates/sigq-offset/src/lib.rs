//! Risk offset planning.
//!
//! Components:
//! - `planner`: partial-close plan over winning positions
//! - `session`: per-call connector reuse and exactly-once release
//! - `precision`: per-symbol step size and minimum notional
//! - `credentials`: per-exchange or legacy credential material
//! - `connector`: exchange connector ports

pub mod connector;
pub mod credentials;
pub mod error;
pub mod planner;
pub mod precision;
pub mod session;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use connector::{ConnectorFactory, ExchangeConnector};
pub use credentials::{CredentialMaterial, ExchangeCredentials};
pub use error::{OffsetError, OffsetResult};
pub use planner::{OffsetPlan, OffsetPlanEntry, RiskOffsetPlanner, UserAccount};
pub use precision::{
    normalize_symbol, PrecisionRules, PrecisionTable, RawPrecisionRules, DEFAULT_MIN_NOTIONAL,
    DEFAULT_STEP_SIZE,
};
pub use session::ConnectorSession;
