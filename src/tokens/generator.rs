use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

/// Raw entropy per session token
pub const TOKEN_BYTES: usize = 32;

/// Generate an opaque session token: 32 bytes from the OS CSPRNG, URL-safe
/// base64 without padding (43 characters).
///
/// Fails rather than falling back to a weaker source.
pub fn generate_token() -> Result<String, rand::Error> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// First characters of a token, safe to put in logs
pub fn token_hint(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    &token[..end]
}
