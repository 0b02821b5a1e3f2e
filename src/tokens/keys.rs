//! Key layout in the key-value engine. Must stay byte-compatible with
//! existing deployments.

pub fn session_key(token: &str) -> String {
    format!("session:{token}")
}

pub fn user_index_key(user_id: &str) -> String {
    format!("user_sessions:{user_id}")
}

pub fn login_attempts_key(email: &str) -> String {
    format!("login_attempts:{email}")
}

pub fn login_ban_key(email: &str) -> String {
    format!("login_ban:{email}")
}
