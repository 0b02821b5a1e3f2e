pub mod generator;
pub mod keys;

pub use generator::{generate_token, token_hint};
pub use keys::{login_attempts_key, login_ban_key, session_key, user_index_key};
