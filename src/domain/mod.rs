//! Tagged records for every entity the engine passes between components.
//!
//! Design note: the source this system was distilled from passed duck-typed
//! objects across boundaries; here every entity is an explicit struct/enum
//! with `serde` derives, and the one place that needs schema-free access
//! (alert rule evaluation) goes through [`path`], a single dotted-path
//! utility rather than ad-hoc field poking.

pub mod account;
pub mod path;
pub mod proxy;
pub mod rule;
pub mod sample;

pub use account::{Account, AccountChanged, AccountError, AccountFilter, ChangeKind, Priority};
pub use proxy::{ProxyAuth, ProxyProtocol, ProxyRecord};
pub use rule::{AlertRule, Channel, Op, TriggeredAlert, Window};
pub use sample::{Engagement, Sample};
