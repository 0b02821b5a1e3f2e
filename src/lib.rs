//! session-guard - opaque server-side sessions and login throttling on a
//! TTL key-value engine
//!
//! This crate provides:
//! - Random opaque session tokens resolved against server-side records
//! - Sliding expiry with renewal inside a configurable threshold
//! - A per-user session index with lazy reconciliation of stale entries
//! - Per-identity exponential backoff on failed logins
//! - Redis (production) and redb (embedded, single-node) engines

pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod expiration;
pub mod lifecycle;
pub mod limiter;
pub mod session;
pub mod storage;
pub mod telemetry;
#[cfg(test)]
pub mod testutil;
pub mod tokens;
pub mod users;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::AuthError;
pub use lifecycle::{CookiePolicy, IssuedSession, LoginRequest, ResolvedSession, SessionLifecycle};
pub use limiter::LoginAttemptLimiter;
pub use session::{ActiveSession, ClientInfo, SessionIdentity, SessionRecord};
pub use storage::{Engine, KeyValueEngine, RedbEngine, RedisEngine};
