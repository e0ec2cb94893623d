// src/lat.rs
//! Line Access Tokens: issue and validate signed proofs that a client has
//! observed a specific byte-range of a file before editing it. (spec
//! component D)

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::ioutil;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_PREFIX: &str = "LAT:";
/// A hunk whose start is `usize::MAX` is addressed relative to a file created
/// in the current transaction; it authorizes edits without a bounds check
/// because there is no prior state to race against.
pub const INFINITY_RANGE_END: usize = usize::MAX;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatPayload {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub crc32c: u32,
    pub total_lines: usize,
    pub session_id: String,
    pub issued_at: i64,
    /// True for files created inside the issuing transaction: validation
    /// skips the CRC/bounds check entirely.
    pub infinity_range: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Ok,
    Stale { expected: u32, actual: u32 },
    Malformed(String),
    WrongSession,
    OutOfBounds,
}

/// Issues and validates LATs for one session, keyed by a per-session secret
/// so a token minted by another session's issuer fails signature
/// verification rather than merely a session-id string comparison.
#[derive(Debug, Clone)]
pub struct LatIssuer {
    session_id: String,
    secret: [u8; 32],
}

impl LatIssuer {
    pub fn new(session_id: impl Into<String>, secret: [u8; 32]) -> Self {
        Self {
            session_id: session_id.into(),
            secret,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Issue a LAT for `[start_line, end_line]` of `path`, given its current
    /// full text (used to compute the range CRC) and total line count.
    pub fn issue(
        &self,
        path: &str,
        start_line: usize,
        end_line: usize,
        content: &str,
        total_lines: usize,
        issued_at: i64,
    ) -> String {
        let crc = ioutil::crc32c_of_lines(content, start_line, end_line);
        self.issue_with_crc(path, start_line, end_line, crc, total_lines, issued_at, false)
    }

    /// Issue a LAT for a file created in the current transaction: no prior
    /// content exists, so the CRC field is nominal and validation always
    /// succeeds regardless of current bytes.
    pub fn issue_infinity_range(&self, path: &str, total_lines: usize, issued_at: i64) -> String {
        self.issue_with_crc(path, 1, INFINITY_RANGE_END, 0, total_lines, issued_at, true)
    }

    fn issue_with_crc(
        &self,
        path: &str,
        start_line: usize,
        end_line: usize,
        crc32c: u32,
        total_lines: usize,
        issued_at: i64,
        infinity_range: bool,
    ) -> String {
        let payload = LatPayload {
            path: path.to_string(),
            start_line,
            end_line,
            crc32c,
            total_lines,
            session_id: self.session_id.clone(),
            issued_at,
            infinity_range,
        };
        self.encode(&payload)
    }

    fn encode(&self, payload: &LatPayload) -> String {
        let json = serde_json::to_vec(payload).expect("LatPayload is always serializable");
        let payload_b64 = URL_SAFE_NO_PAD.encode(&json);
        let signature = self.sign(payload_b64.as_bytes());
        format!("{TOKEN_PREFIX}{payload_b64}:{signature}")
    }

    fn sign(&self, payload_b64: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(payload_b64);
        let tag = mac.finalize().into_bytes();
        URL_SAFE_NO_PAD.encode(tag)
    }

    /// Validate a token against the current file text. The caller passes the
    /// file's full current content and line count; this function recomputes
    /// the range CRC and compares.
    pub fn validate(&self, token: &str, current_content: &str, current_lines: usize) -> Validation {
        let payload = match self.decode_and_verify(token) {
            Ok(p) => p,
            Err(msg) => return Validation::Malformed(msg),
        };

        if payload.session_id != self.session_id {
            return Validation::WrongSession;
        }

        if payload.infinity_range {
            return Validation::Ok;
        }

        if payload.start_line == 0
            || payload.start_line > current_lines + 1
            || payload.end_line > current_lines
        {
            return Validation::OutOfBounds;
        }

        let actual = ioutil::crc32c_of_lines(current_content, payload.start_line, payload.end_line);
        if actual != payload.crc32c {
            return Validation::Stale {
                expected: payload.crc32c,
                actual,
            };
        }

        Validation::Ok
    }

    /// Decode and verify signature without checking session/content, for
    /// callers that just need the addressed range (e.g. batch interpolation
    /// extracting `tokens`).
    pub fn decode_and_verify(&self, token: &str) -> std::result::Result<LatPayload, String> {
        let body = token
            .strip_prefix(TOKEN_PREFIX)
            .ok_or_else(|| "missing LAT: prefix".to_string())?;
        let (payload_b64, signature) = body
            .rsplit_once(':')
            .ok_or_else(|| "malformed token: missing signature segment".to_string())?;

        let expected_signature = self.sign(payload_b64.as_bytes());
        if !constant_time_eq(expected_signature.as_bytes(), signature.as_bytes()) {
            return Err("signature verification failed".to_string());
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|e| format!("base64 decode error: {e}"))?;
        serde_json::from_slice(&bytes).map_err(|e| format!("payload decode error: {e}"))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

impl From<Validation> for Result<()> {
    fn from(validation: Validation) -> Self {
        match validation {
            Validation::Ok => Ok(()),
            Validation::Stale { expected, actual } => Err(Error::OptimisticLockFailure {
                path: Default::default(),
                expected,
                actual,
            }),
            Validation::Malformed(msg) => Err(Error::InvalidToken(msg)),
            Validation::WrongSession => {
                Err(Error::InvalidToken("token issued by a different session".into()))
            }
            Validation::OutOfBounds => {
                Err(Error::InvalidToken("token addresses a range outside the file".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> LatIssuer {
        LatIssuer::new("sess-abc123", [7u8; 32])
    }

    #[test]
    fn issued_token_validates_against_unchanged_content() {
        let issuer = issuer();
        let content = "a\nb\nc\n";
        let token = issuer.issue("f.txt", 1, 3, content, 3, 1000);
        assert!(token.starts_with("LAT:"));
        let result = issuer.validate(&token, content, 3);
        assert_eq!(result, Validation::Ok);
    }

    #[test]
    fn modified_range_yields_stale() {
        let issuer = issuer();
        let original = "a\nb\nc\n";
        let token = issuer.issue("f.txt", 1, 3, original, 3, 1000);
        let modified = "a\nB\nc\n";
        let result = issuer.validate(&token, modified, 3);
        assert!(matches!(result, Validation::Stale { .. }));
    }

    #[test]
    fn token_from_other_session_is_rejected() {
        let issuer_a = LatIssuer::new("sess-a", [1u8; 32]);
        let issuer_b = LatIssuer::new("sess-b", [2u8; 32]);
        let content = "a\nb\n";
        let token = issuer_a.issue("f.txt", 1, 2, content, 2, 1000);
        // Different secret: signature fails before session is even compared.
        let result = issuer_b.validate(&token, content, 2);
        assert!(matches!(result, Validation::Malformed(_)));
    }

    #[test]
    fn forged_session_id_with_wrong_secret_fails_signature() {
        let issuer = issuer();
        let mut forged = issuer.issue("f.txt", 1, 1, "a\n", 1, 1000);
        forged.push('x');
        let result = issuer.validate(&forged, "a\n", 1);
        assert!(matches!(result, Validation::Malformed(_)));
    }

    #[test]
    fn infinity_range_skips_crc_check() {
        let issuer = issuer();
        let token = issuer.issue_infinity_range("new.txt", 1, 1000);
        let result = issuer.validate(&token, "anything at all\n", 1);
        assert_eq!(result, Validation::Ok);
    }

    #[test]
    fn out_of_bounds_range_is_rejected() {
        let issuer = issuer();
        let content = "a\nb\n";
        let token = issuer.issue("f.txt", 1, 5, content, 2, 1000);
        let result = issuer.validate(&token, content, 2);
        assert_eq!(result, Validation::OutOfBounds);
    }
}
