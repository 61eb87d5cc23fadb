//! HTTP authentication challenges (RFC 7617 Basic, RFC 7616 Digest).
//!
//! A 401 response carries one or more `WWW-Authenticate` challenges; the
//! strongest supported one (Digest over Basic) is answered exactly once per
//! job. Basic is applied through the HTTP client's own encoder; Digest
//! responses are computed here.

use std::collections::HashMap;

use md5::Md5;
use rand::Rng;
use sha2::{Digest as _, Sha256};

/// Digest hash algorithm from the challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgo {
    #[default]
    Md5,
    Sha256,
}

/// One parsed challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Basic {
        realm: String,
    },
    Digest {
        realm: String,
        nonce: String,
        opaque: Option<String>,
        qop_auth: bool,
        algorithm: DigestAlgo,
    },
}

/// How the retried request should authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthAnswer {
    /// Use the client's Basic encoder with the configured credentials.
    Basic,
    /// Send this exact `Authorization` header value.
    Header(String),
}

/// Parses every `WWW-Authenticate` header value into challenges.
#[must_use]
pub fn parse_challenges(headers: &[String]) -> Vec<Challenge> {
    let mut out = Vec::new();
    for header in headers {
        let trimmed = header.trim();
        let (scheme, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((s, r)) => (s, r),
            None => (trimmed, ""),
        };
        let params = parse_params(rest);
        if scheme.eq_ignore_ascii_case("basic") {
            out.push(Challenge::Basic {
                realm: params.get("realm").cloned().unwrap_or_default(),
            });
        } else if scheme.eq_ignore_ascii_case("digest") {
            let Some(nonce) = params.get("nonce") else {
                continue;
            };
            let algorithm = match params.get("algorithm").map(String::as_str) {
                Some(a) if a.eq_ignore_ascii_case("sha-256") => DigestAlgo::Sha256,
                Some(a) if a.eq_ignore_ascii_case("md5") => DigestAlgo::Md5,
                // Session variants and unknown algorithms are unsupported.
                Some(_) => continue,
                None => DigestAlgo::Md5,
            };
            out.push(Challenge::Digest {
                realm: params.get("realm").cloned().unwrap_or_default(),
                nonce: nonce.clone(),
                opaque: params.get("opaque").cloned(),
                qop_auth: params
                    .get("qop")
                    .is_some_and(|q| q.split(',').any(|t| t.trim() == "auth")),
                algorithm,
            });
        }
    }
    out
}

/// Picks the strongest challenge and computes the answer for it.
///
/// Returns `None` when no supported challenge is present.
#[must_use]
pub fn answer_challenge(
    challenges: &[Challenge],
    method: &str,
    uri: &str,
    user: &str,
    password: &str,
) -> Option<AuthAnswer> {
    let digest = challenges
        .iter()
        .find(|c| matches!(c, Challenge::Digest { .. }));
    let basic = challenges
        .iter()
        .find(|c| matches!(c, Challenge::Basic { .. }));

    match digest.or(basic)? {
        Challenge::Basic { .. } => Some(AuthAnswer::Basic),
        Challenge::Digest {
            realm,
            nonce,
            opaque,
            qop_auth,
            algorithm,
        } => Some(AuthAnswer::Header(digest_authorization(
            realm, nonce, opaque.as_deref(), *qop_auth, *algorithm, method, uri, user, password,
        ))),
    }
}

#[allow(clippy::too_many_arguments)]
fn digest_authorization(
    realm: &str,
    nonce: &str,
    opaque: Option<&str>,
    qop_auth: bool,
    algorithm: DigestAlgo,
    method: &str,
    uri: &str,
    user: &str,
    password: &str,
) -> String {
    let h = |input: &str| digest_hex(algorithm, input.as_bytes());
    let ha1 = h(&format!("{user}:{realm}:{password}"));
    let ha2 = h(&format!("{method}:{uri}"));

    let algo_label = match algorithm {
        DigestAlgo::Md5 => "MD5",
        DigestAlgo::Sha256 => "SHA-256",
    };

    let mut header;
    if qop_auth {
        let cnonce = make_cnonce();
        let nc = "00000001";
        let response = h(&format!("{ha1}:{nonce}:{nc}:{cnonce}:auth:{ha2}"));
        header = format!(
            "Digest username=\"{user}\", realm=\"{realm}\", nonce=\"{nonce}\", uri=\"{uri}\", \
             qop=auth, nc={nc}, cnonce=\"{cnonce}\", response=\"{response}\", algorithm={algo_label}"
        );
    } else {
        let response = h(&format!("{ha1}:{nonce}:{ha2}"));
        header = format!(
            "Digest username=\"{user}\", realm=\"{realm}\", nonce=\"{nonce}\", uri=\"{uri}\", \
             response=\"{response}\", algorithm={algo_label}"
        );
    }
    if let Some(opaque) = opaque {
        header.push_str(&format!(", opaque=\"{opaque}\""));
    }
    header
}

fn digest_hex(algorithm: DigestAlgo, data: &[u8]) -> String {
    match algorithm {
        DigestAlgo::Md5 => hex::encode(Md5::digest(data)),
        DigestAlgo::Sha256 => hex::encode(Sha256::digest(data)),
    }
}

fn make_cnonce() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Parses `key=value` (optionally quoted) parameter lists.
fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut rest = input.trim();
    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim().trim_start_matches(',').trim().to_ascii_lowercase();
        rest = rest[eq + 1..].trim_start();
        let value;
        if let Some(stripped) = rest.strip_prefix('"') {
            match stripped.find('"') {
                Some(end) => {
                    value = stripped[..end].to_string();
                    rest = stripped[end + 1..].trim_start().trim_start_matches(',');
                }
                None => {
                    value = stripped.to_string();
                    rest = "";
                }
            }
        } else {
            match rest.find(',') {
                Some(end) => {
                    value = rest[..end].trim().to_string();
                    rest = rest[end + 1..].trim_start();
                }
                None => {
                    value = rest.trim().to_string();
                    rest = "";
                }
            }
        }
        if !key.is_empty() {
            params.insert(key, value);
        }
    }
    params
}
