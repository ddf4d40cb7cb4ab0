#![forbid(unsafe_code)]

use anyhow::{Context, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rondo_domain::IdentityId;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// Token shape, detected from its dot count. Legacy tokens are
/// `<24 hex>.<uuid v4>`; signed tokens are `v1.<payload>.<signature>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScheme {
	Legacy,
	Signed,
}

impl TokenScheme {
	pub fn detect(token: &str) -> Option<Self> {
		match token.matches('.').count() {
			1 => Some(Self::Legacy),
			2 => Some(Self::Signed),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
	pub sub: String,
	pub iat: u64,
}

/// Check a legacy token and return the identity it encodes.
pub fn validate_legacy(token: &str) -> anyhow::Result<IdentityId> {
	let (id_part, tail) = token.split_once('.').ok_or_else(|| anyhow!("invalid token format"))?;
	let id = IdentityId::new(id_part).context("invalid token identity")?;
	uuid::Uuid::try_parse(tail).context("invalid token suffix")?;
	Ok(id)
}

/// Mint a signed token binding `identity` as the subject.
pub fn mint_signed(identity: &IdentityId, issued_at_secs: u64, secret: &str) -> anyhow::Result<String> {
	let claims = AuthClaims {
		sub: identity.to_string(),
		iat: issued_at_secs,
	};
	let payload = serde_json::to_vec(&claims).context("encode token claims")?;
	let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
	let sig = sign(payload_b64.as_bytes(), secret.as_bytes());
	Ok(format!("v1.{payload_b64}.{}", URL_SAFE_NO_PAD.encode(sig)))
}

/// Verify a signed token's signature and return its claims.
pub fn verify_signed(token: &str, secret: &str) -> anyhow::Result<AuthClaims> {
	let parts = token.split('.').collect::<Vec<_>>();
	if parts.len() != 3 || parts[0] != "v1" {
		return Err(anyhow!("invalid token format"));
	}

	let payload_b64 = parts[1];
	let sig_b64 = parts[2];

	let payload = URL_SAFE_NO_PAD.decode(payload_b64).context("decode token payload")?;
	let expected_sig = sign(payload_b64.as_bytes(), secret.as_bytes());
	let provided_sig = URL_SAFE_NO_PAD.decode(sig_b64).context("decode token signature")?;

	if !constant_time_eq(&expected_sig, &provided_sig) {
		return Err(anyhow!("invalid token signature"));
	}

	let claims: AuthClaims = serde_json::from_slice(&payload).context("parse token claims")?;
	Ok(claims)
}

fn sign(payload_b64: &[u8], secret: &[u8]) -> Vec<u8> {
	let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("hmac key");
	mac.update(payload_b64);
	mac.finalize().into_bytes().to_vec()
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

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn scheme_detection_by_dot_count() {
		assert_eq!(TokenScheme::detect("abc.def"), Some(TokenScheme::Legacy));
		assert_eq!(TokenScheme::detect("v1.abc.def"), Some(TokenScheme::Signed));
		assert_eq!(TokenScheme::detect("plain"), None);
		assert_eq!(TokenScheme::detect("a.b.c.d"), None);
	}

	#[test]
	fn legacy_validation() {
		let id = IdentityId::random();
		let token = format!("{id}.{}", uuid::Uuid::new_v4());
		assert_eq!(validate_legacy(&token).unwrap(), id);

		assert!(validate_legacy("notahexid.not-a-uuid").is_err());
		assert!(validate_legacy(&format!("{id}.not-a-uuid")).is_err());
	}

	#[test]
	fn signed_round_trip_and_tamper_detection() {
		let id = IdentityId::random();
		let token = mint_signed(&id, 1_700_000_000, "secret").unwrap();
		assert_eq!(TokenScheme::detect(&token), Some(TokenScheme::Signed));

		let claims = verify_signed(&token, "secret").unwrap();
		assert_eq!(claims.sub, id.to_string());
		assert_eq!(claims.iat, 1_700_000_000);

		assert!(verify_signed(&token, "other-secret").is_err());

		let mut forged = token.clone();
		forged.push('A');
		assert!(verify_signed(&forged, "secret").is_err());
	}
}
