//! Signed join handshake.
//!
//! A joining node signs its claims with its ed25519 key; the leader admits it
//! only if that key is in its trust set, the signature verifies, and the
//! protocol and schema versions match. The leader answers with claims signed
//! by its own key, which the joiner checks against its own trust set before
//! accepting any replicated state. Neither side changes membership or trust
//! on a failed check.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::JoinError;
use crate::identity::{public_key_b64, TrustedKeys};

/// Wire format of consensus messages and join claims.
pub const PROTOCOL_VERSION: u32 = 1;
/// Layout of replicated commands and snapshots.
pub const SCHEMA_VERSION: u32 = 1;
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinClaims {
    pub node_id: String,
    pub bind_addr: String,
    pub advertise_addr: String,
    pub public_key: String,
    #[serde(default)]
    pub non_voter: bool,
    pub app_version: String,
    pub protocol_version: u32,
    pub schema_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(flatten)]
    pub claims: JoinClaims,
    /// Base64 signature over the canonical JSON of `claims`.
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptClaims {
    pub leader_id: String,
    pub leader_addr: String,
    pub leader_public_key: String,
    /// Echo of the admitted node, binding the answer to one request.
    pub node_id: String,
    pub node_public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    #[serde(flatten)]
    pub claims: AcceptClaims,
    pub signature: String,
}

fn sign_json<T: Serialize>(value: &T, key: &SigningKey) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    BASE64.encode(key.sign(&bytes).to_bytes())
}

fn verify_json<T: Serialize>(
    value: &T,
    signature: &str,
    key: &VerifyingKey,
) -> Result<(), JoinError> {
    let bytes = serde_json::to_vec(value).map_err(|_| JoinError::BadSignature)?;
    let raw = BASE64
        .decode(signature)
        .map_err(|_| JoinError::BadSignature)?;
    let raw: [u8; 64] = raw.try_into().map_err(|_| JoinError::BadSignature)?;
    key.verify(&bytes, &Signature::from_bytes(&raw))
        .map_err(|_| JoinError::BadSignature)
}

impl JoinRequest {
    pub fn new(
        node_id: &str,
        bind_addr: &str,
        advertise_addr: &str,
        non_voter: bool,
        key: &SigningKey,
    ) -> Self {
        let claims = JoinClaims {
            node_id: node_id.to_string(),
            bind_addr: bind_addr.to_string(),
            advertise_addr: advertise_addr.to_string(),
            public_key: public_key_b64(&key.verifying_key()),
            non_voter,
            app_version: APP_VERSION.to_string(),
            protocol_version: PROTOCOL_VERSION,
            schema_version: SCHEMA_VERSION,
        };
        let signature = sign_json(&claims, key);
        JoinRequest { claims, signature }
    }

    /// Leader-side checks, in order: versions, trust, signature.
    pub fn verify(&self, trusted: &TrustedKeys) -> Result<VerifyingKey, JoinError> {
        check_compatible(&self.claims)?;
        let key = trusted.require(&self.claims.public_key)?;
        verify_json(&self.claims, &self.signature, &key)?;
        Ok(key)
    }
}

fn check_compatible(claims: &JoinClaims) -> Result<(), JoinError> {
    if claims.protocol_version != PROTOCOL_VERSION {
        return Err(JoinError::Incompatible {
            field: "protocol_version",
            ours: PROTOCOL_VERSION.to_string(),
            theirs: claims.protocol_version.to_string(),
        });
    }
    if claims.schema_version != SCHEMA_VERSION {
        return Err(JoinError::Incompatible {
            field: "schema_version",
            ours: SCHEMA_VERSION.to_string(),
            theirs: claims.schema_version.to_string(),
        });
    }
    Ok(())
}

impl JoinResponse {
    pub fn new(leader_id: &str, leader_addr: &str, request: &JoinClaims, key: &SigningKey) -> Self {
        let claims = AcceptClaims {
            leader_id: leader_id.to_string(),
            leader_addr: leader_addr.to_string(),
            leader_public_key: public_key_b64(&key.verifying_key()),
            node_id: request.node_id.clone(),
            node_public_key: request.public_key.clone(),
        };
        let signature = sign_json(&claims, key);
        JoinResponse { claims, signature }
    }

    /// Joiner-side checks: the answer is for this node, comes from a trusted
    /// leader key, and carries a valid signature.
    pub fn verify(&self, request: &JoinClaims, trusted: &TrustedKeys) -> Result<(), JoinError> {
        if self.claims.node_id != request.node_id
            || self.claims.node_public_key != request.public_key
        {
            return Err(JoinError::BadSignature);
        }
        let key = trusted.require(&self.claims.leader_public_key)?;
        verify_json(&self.claims, &self.signature, &key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::generate_signing_key;

    fn trust(keys: &[&SigningKey]) -> TrustedKeys {
        let encoded: Vec<String> = keys
            .iter()
            .map(|k| public_key_b64(&k.verifying_key()))
            .collect();
        TrustedKeys::from_base64(&encoded).unwrap()
    }

    #[test]
    fn mutual_verification_succeeds_between_trusted_nodes() {
        let leader = generate_signing_key();
        let joiner = generate_signing_key();
        let req = JoinRequest::new("n2", "0.0.0.0:7402", "10.0.0.2:7402", false, &joiner);
        req.verify(&trust(&[&joiner])).unwrap();

        let resp = JoinResponse::new("n1", "10.0.0.1:7401", &req.claims, &leader);
        resp.verify(&req.claims, &trust(&[&leader])).unwrap();
    }

    #[test]
    fn unknown_joiner_is_untrusted() {
        let joiner = generate_signing_key();
        let other = generate_signing_key();
        let req = JoinRequest::new("n2", "a", "a", false, &joiner);
        assert!(matches!(
            req.verify(&trust(&[&other])),
            Err(JoinError::Untrusted { .. })
        ));
    }

    #[test]
    fn tampered_claims_fail_signature() {
        let joiner = generate_signing_key();
        let mut req = JoinRequest::new("n2", "a", "a", false, &joiner);
        req.claims.advertise_addr = "evil:1".to_string();
        assert_eq!(req.verify(&trust(&[&joiner])), Err(JoinError::BadSignature));
    }

    #[test]
    fn version_mismatch_is_rejected_before_trust() {
        let joiner = generate_signing_key();
        let mut req = JoinRequest::new("n2", "a", "a", false, &joiner);
        req.claims.schema_version = SCHEMA_VERSION + 1;
        assert!(matches!(
            req.verify(&TrustedKeys::default()),
            Err(JoinError::Incompatible {
                field: "schema_version",
                ..
            })
        ));
    }

    #[test]
    fn answer_from_untrusted_leader_is_refused() {
        let leader = generate_signing_key();
        let joiner = generate_signing_key();
        let req = JoinRequest::new("n2", "a", "a", false, &joiner);
        let resp = JoinResponse::new("n1", "b", &req.claims, &leader);
        assert!(matches!(
            resp.verify(&req.claims, &trust(&[&joiner])),
            Err(JoinError::Untrusted { .. })
        ));
    }

    #[test]
    fn request_serializes_with_camel_case_fields() {
        let joiner = generate_signing_key();
        let req = JoinRequest::new("n2", "0.0.0.0:1", "h:1", true, &joiner);
        let v = serde_json::to_value(&req).unwrap();
        for field in [
            "nodeId",
            "bindAddr",
            "advertiseAddr",
            "publicKey",
            "nonVoter",
            "appVersion",
            "protocolVersion",
            "schemaVersion",
            "signature",
        ] {
            assert!(v.get(field).is_some(), "missing {field}");
        }
    }
}
