//! Shared test helpers, available to all `#[cfg(test)]` modules in the crate.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use crate::clock::{Clock, ManualClock};
use crate::config::Config;
use crate::lifecycle::SessionLifecycle;
use crate::session::{ClientInfo, SessionIdentity};
use crate::storage::{Batch, Command, EngineError, KeyValueEngine, RedbEngine, Reply};
use crate::users::{Argon2Hasher, MemoryUserDirectory};

/// Open a fresh embedded engine in a temporary directory, driven by a manual
/// clock starting at 2024-01-01T00:00:00Z.
///
/// The caller must keep the `TempDir` alive for the duration of the test.
pub fn setup_engine() -> (RedbEngine, Arc<ManualClock>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let engine = RedbEngine::open(temp_dir.path(), clock.clone() as Arc<dyn Clock>).unwrap();
    (engine, clock, temp_dir)
}

/// Wraps an engine and fails every batch holding a command `fails_on` picks,
/// before any of it runs.
#[derive(Clone)]
pub struct FailingEngine {
    fails_on: fn(&Command) -> bool,
    inner: RedbEngine,
}

impl FailingEngine {
    pub fn new(inner: RedbEngine, fails_on: fn(&Command) -> bool) -> Self {
        Self { fails_on, inner }
    }

    /// An engine where every batch fails
    pub fn always(inner: RedbEngine) -> Self {
        Self::new(inner, |_| true)
    }
}

#[async_trait]
impl KeyValueEngine for FailingEngine {
    async fn execute(&self, batch: Batch) -> Result<Vec<Reply>, EngineError> {
        if batch.commands().iter().any(|c| (self.fails_on)(c)) {
            return Err(EngineError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "engine unreachable",
            )));
        }
        self.inner.execute(batch).await
    }
}

pub struct TestLifecycle {
    pub clock: Arc<ManualClock>,
    pub engine: RedbEngine,
    pub lifecycle: SessionLifecycle,
    pub users: Arc<MemoryUserDirectory>,
    pub _temp: TempDir,
}

/// A facade over a fresh engine with default config, an in-memory user
/// directory and the cheapest argon2 parameters.
pub fn setup_lifecycle() -> TestLifecycle {
    let (engine, clock, temp) = setup_engine();
    let users = Arc::new(MemoryUserDirectory::new());
    let lifecycle = SessionLifecycle::new(
        Arc::new(engine.clone()),
        clock.clone(),
        users.clone(),
        Arc::new(Argon2Hasher::insecure_fast()),
        &Config::default(),
    );
    TestLifecycle {
        clock,
        engine,
        lifecycle,
        users,
        _temp: temp,
    }
}

/// An identity of a local, unverified user
pub fn make_identity(user_id: &str, email: &str) -> SessionIdentity {
    SessionIdentity {
        display_name: "Test User".to_string(),
        email: email.to_string(),
        image_url: None,
        phone: None,
        provider: "local".to_string(),
        provider_id: email.to_string(),
        role: "user".to_string(),
        user_id: user_id.to_string(),
        verified: false,
    }
}

pub fn make_client() -> ClientInfo {
    ClientInfo::new("Chrome on Linux", "Mozilla/5.0 (X11; Linux x86_64)", "10.0.0.1")
}
