//! End-to-end integration tests

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use session_guard::config::{Config, EngineConfig, EngineKind};
use session_guard::expiration::run_cleanup;
use session_guard::users::{Argon2Hasher, MemoryUserDirectory};
use session_guard::{
    AuthError, ClientInfo, Clock, Engine, KeyValueEngine, LoginRequest, ManualClock,
    SessionLifecycle,
};
use tempfile::TempDir;

struct Harness {
    clock: Arc<ManualClock>,
    engine: Engine,
    lifecycle: SessionLifecycle,
    _temp: TempDir,
}

async fn setup() -> Harness {
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    ));
    let engine_config = EngineConfig {
        data_dir: temp.path().to_string_lossy().into_owned(),
        kind: EngineKind::Embedded,
        ..EngineConfig::default()
    };
    let engine = Engine::open(&engine_config, clock.clone() as Arc<dyn Clock>)
        .await
        .unwrap();

    let lifecycle = SessionLifecycle::new(
        engine.shared(),
        clock.clone(),
        Arc::new(MemoryUserDirectory::new()),
        Arc::new(Argon2Hasher::insecure_fast()),
        &Config::default(),
    );

    Harness {
        clock,
        engine,
        lifecycle,
        _temp: temp,
    }
}

fn login(email: &str, password: &str) -> LoginRequest {
    LoginRequest {
        client: ClientInfo::from_user_agent(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            "203.0.113.7",
        ),
        email: email.to_string(),
        password: password.to_string(),
    }
}

#[tokio::test]
async fn test_ban_then_recovery() {
    let h = setup().await;
    let account = h
        .lifecycle
        .register("Ada", "ada@example.com", "correct-password")
        .await
        .unwrap();

    for _ in 0..3 {
        assert_eq!(
            h.lifecycle
                .authenticate(login("ada@example.com", "wrong"))
                .await
                .unwrap_err(),
            AuthError::InvalidCredentials
        );
    }
    // Fourth failure applies a 10 second ban
    assert_eq!(
        h.lifecycle
            .authenticate(login("ada@example.com", "wrong"))
            .await
            .unwrap_err(),
        AuthError::BanActive {
            remaining: Duration::from_secs(10)
        }
    );

    // The right password does not get through while banned
    h.clock.advance(Duration::from_secs(3));
    assert_eq!(
        h.lifecycle
            .authenticate(login("ada@example.com", "correct-password"))
            .await
            .unwrap_err(),
        AuthError::BanActive {
            remaining: Duration::from_secs(7)
        }
    );

    h.clock.advance(Duration::from_secs(7));
    let issued = h
        .lifecycle
        .authenticate(login("ada@example.com", "correct-password"))
        .await
        .unwrap();
    assert_eq!(issued.token.len(), 43);

    let resolved = h.lifecycle.resolve(&issued.token).await.unwrap();
    assert_eq!(resolved.record.identity.email, "ada@example.com");
    assert_eq!(resolved.record.client.device, "Chrome on Windows 10");
    assert_eq!(resolved.record.client.ip_address, "203.0.113.7");

    let sessions = h.lifecycle.list_sessions(&account.user_id).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].token, issued.token);
    assert_eq!(sessions[0].record.client, resolved.record.client);

    // Success cleared the counter: three free attempts again
    for _ in 0..3 {
        assert_eq!(
            h.lifecycle
                .authenticate(login("ada@example.com", "wrong"))
                .await
                .unwrap_err(),
            AuthError::InvalidCredentials
        );
    }
}

#[tokio::test]
async fn test_sliding_expiry_and_listing() {
    let h = setup().await;
    let account = h
        .lifecycle
        .register("Ada", "ada@example.com", "pw")
        .await
        .unwrap();
    let laptop = h
        .lifecycle
        .authenticate(login("ada@example.com", "pw"))
        .await
        .unwrap()
        .token;
    let phone = h
        .lifecycle
        .authenticate(login("ada@example.com", "pw"))
        .await
        .unwrap()
        .token;

    // Only the laptop stays in use
    for _ in 0..4 {
        h.clock.advance(Duration::from_secs(12 * 60));
        h.lifecycle.resolve(&laptop).await.unwrap();
    }

    assert_eq!(
        h.lifecycle.resolve(&phone).await.unwrap_err(),
        AuthError::SessionNotFound
    );
    let sessions = h.lifecycle.list_sessions(&account.user_id).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].token, laptop);
    assert!(sessions[0].expires_at > h.clock.now());
}

#[tokio::test]
async fn test_logout_everywhere() {
    let h = setup().await;
    let account = h
        .lifecycle
        .register("Ada", "ada@example.com", "pw")
        .await
        .unwrap();

    let mut tokens = Vec::new();
    for _ in 0..3 {
        tokens.push(
            h.lifecycle
                .authenticate(login("ada@example.com", "pw"))
                .await
                .unwrap()
                .token,
        );
    }

    assert_eq!(h.lifecycle.logout_all(&account.user_id).await.unwrap(), 3);
    for token in &tokens {
        assert_eq!(
            h.lifecycle.resolve(token).await.unwrap_err(),
            AuthError::SessionNotFound
        );
    }
}

#[tokio::test]
async fn test_reaper_clears_expired_state() {
    let h = setup().await;
    h.lifecycle
        .register("Ada", "ada@example.com", "pw")
        .await
        .unwrap();
    h.lifecycle
        .authenticate(login("ada@example.com", "pw"))
        .await
        .unwrap();
    let _ = h
        .lifecycle
        .authenticate(login("ghost@example.com", "pw"))
        .await;

    let embedded = h.engine.embedded().unwrap();
    assert!(embedded.stored_key_count().unwrap() > 0);

    // Past every TTL: session, index, and the ghost's attempt counter
    h.clock.advance(Duration::from_secs(8 * 24 * 60 * 60));
    run_cleanup(embedded).await;
    assert_eq!(embedded.stored_key_count().unwrap(), 0);

    // The engine is usable through the trait object as well
    let shared: Arc<dyn KeyValueEngine> = h.engine.shared();
    assert!(shared
        .query(session_guard::storage::Command::ZRangeAll {
            key: "user_sessions:nobody".to_string(),
        })
        .await
        .unwrap()
        .into_members()
        .unwrap()
        .is_empty());
}
