//! Detection and answering of the web layer's proof-of-work page
//!
//! A challenged request gets an HTML page instead of JSON. The page names
//! the answer cookie in `id="wci"` and carries a base64 JSON payload in
//! `id="cs"`. The payload's `v.a` is the base64 hash prefix and `v.c` the
//! target digest. The answer is the same payload with `d` set to the
//! base64 nonce, base64-encoded again as the cookie value.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tikdog_domain::{ChallengeDescriptor, FeedError};

static RE_COOKIE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"id="wci"\s+class="([^"]+)""#).expect("valid challenge name pattern")
});
static RE_PAYLOAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"id="cs"\s+class="([^"]+)""#).expect("valid challenge payload pattern")
});

/// A challenge found in a response body, ready to be solved
#[derive(Debug, Clone)]
pub struct PendingChallenge {
    pub descriptor: ChallengeDescriptor,
    payload: Value,
}

impl PendingChallenge {
    /// Solve and build the `(cookie name, cookie value)` answer
    pub fn answer(mut self) -> Result<(String, String), FeedError> {
        let nonce = self.descriptor.solve()?;
        tracing::info!(nonce, cookie = %self.descriptor.cookie_name, "Solved challenge");

        self.payload["d"] = Value::String(STANDARD.encode(nonce.to_string()));
        let value = STANDARD.encode(self.payload.to_string());
        Ok((self.descriptor.cookie_name, value))
    }

    /// [`Self::answer`] on the blocking pool, keeping the runtime free
    pub async fn answer_in_background(self) -> Result<(String, String), FeedError> {
        tokio::task::spawn_blocking(move || self.answer())
            .await
            .map_err(|e| FeedError::Api(format!("Challenge solver task failed: {}", e)))?
    }
}

/// `Ok(None)` when the body is not a challenge page
pub fn detect(body: &str) -> Result<Option<PendingChallenge>, FeedError> {
    let (Some(name), Some(payload)) = (
        RE_COOKIE_NAME.captures(body).and_then(|c| c.get(1)),
        RE_PAYLOAD.captures(body).and_then(|c| c.get(1)),
    ) else {
        return Ok(None);
    };

    let payload: Value = STANDARD
        .decode(payload.as_str())
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .ok_or_else(|| malformed("payload is not base64 JSON"))?;

    let prefix = payload["v"]["a"]
        .as_str()
        .and_then(|a| STANDARD.decode(a).ok())
        .ok_or_else(|| malformed("missing prefix"))?;

    let target = payload["v"]["c"]
        .as_str()
        .and_then(target_hex)
        .ok_or_else(|| malformed("missing target"))?;

    Ok(Some(PendingChallenge {
        descriptor: ChallengeDescriptor {
            cookie_name: name.as_str().to_string(),
            prefix,
            target_hash_hex: target,
        },
        payload,
    }))
}

/// The target arrives either as hex or as base64 of the raw digest
fn target_hex(raw: &str) -> Option<String> {
    if raw.len() == 64 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
        return Some(raw.to_ascii_lowercase());
    }
    STANDARD
        .decode(raw)
        .ok()
        .filter(|bytes| bytes.len() == 32)
        .map(hex::encode)
}

fn malformed(reason: &str) -> FeedError {
    FeedError::Api(format!("Malformed challenge page: {}", reason))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use sha2::{Digest, Sha256};

    /// Build a challenge page whose answer is `nonce`
    pub(crate) fn challenge_page(cookie_name: &str, prefix: &[u8], nonce: u64) -> String {
        let digest = Sha256::new()
            .chain_update(prefix)
            .chain_update(nonce.to_string().as_bytes())
            .finalize();
        let payload = json!({
            "v": { "a": STANDARD.encode(prefix), "b": "x", "c": STANDARD.encode(digest) },
            "s": "sig",
        });
        format!(
            r#"<html><head></head><body><p id="wci" class="{}"></p><p id="cs" class="{}"></p></body></html>"#,
            cookie_name,
            STANDARD.encode(payload.to_string())
        )
    }

    #[tokio::test]
    async fn test_solving_leaves_runtime_responsive() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let challenge = detect(&challenge_page("c", b"p", 200_000)).unwrap().unwrap();

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = tokio::spawn({
            let ticks = Arc::clone(&ticks);
            async move {
                loop {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            }
        });

        let (name, _) = challenge.answer_in_background().await.unwrap();
        ticker.abort();

        assert_eq!(name, "c");
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_detect_ignores_json() {
        assert!(detect(r#"{"itemList":[],"hasMore":false}"#).unwrap().is_none());
        assert!(detect("<html>maintenance</html>").unwrap().is_none());
    }

    #[test]
    fn test_detect_and_answer() {
        let page = challenge_page("_wafchallengeid", b"prefix-bytes", 4321);

        let challenge = detect(&page).unwrap().unwrap();
        assert_eq!(challenge.descriptor.cookie_name, "_wafchallengeid");
        assert_eq!(challenge.descriptor.prefix, b"prefix-bytes");

        let (name, value) = challenge.answer().unwrap();
        assert_eq!(name, "_wafchallengeid");

        let decoded: Value = serde_json::from_slice(&STANDARD.decode(value).unwrap()).unwrap();
        assert_eq!(decoded["d"], json!(STANDARD.encode("4321")));
        assert_eq!(decoded["s"], json!("sig"));
    }

    #[test]
    fn test_hex_target_accepted() {
        let digest = Sha256::new()
            .chain_update(b"p")
            .chain_update(b"7")
            .finalize();
        let hex_target = hex::encode(digest);
        let payload = json!({ "v": { "a": STANDARD.encode(b"p"), "c": hex_target } });
        let page = format!(
            r#"<div id="wci" class="cookie"></div><div id="cs" class="{}"></div>"#,
            STANDARD.encode(payload.to_string())
        );

        let challenge = detect(&page).unwrap().unwrap();
        assert_eq!(challenge.descriptor.solve().unwrap(), 7);
    }

    #[test]
    fn test_malformed_payload() {
        let page = r#"<div id="wci" class="cookie"></div><div id="cs" class="%%%"></div>"#;
        assert!(matches!(detect(page), Err(FeedError::Api(_))));
    }
}
