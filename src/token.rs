//! Push tokens: per-reference signed transaction details carried in HTTP Basic-Auth usernames.
//!
//! A [`TxDetail`] authorizes one push to one reference: it names the push key, an account
//! nonce, a fee, the target reference, and (for notes) the note's current head. A push token is
//! `base58(bincode(TxDetail))`; several tokens may be comma-joined in the Basic-Auth username to
//! authorize a multi-reference push in one request (see [`decode_auth_tokens`]).

use bincode::{Decode, Encode};
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use serde::{Deserialize, Serialize};

use crate::errors::PushError;

/// The per-reference push authorization and billing record described in spec §3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Decode, Encode)]
pub struct TxDetail {
    pub push_key_id: String,
    pub nonce: u64,
    /// Decimal string, e.g. `"0.2"`. Kept as a string rather than a float so canonical bytes
    /// never depend on floating point formatting.
    pub fee: String,
    pub reference: String,
    /// Current head of a `refs/notes/*` reference at authorization time; absent for branches
    /// and tags.
    pub head: Option<String>,
    pub merge_proposal_id: Option<String>,
    pub signature: Vec<u8>,
}

impl TxDetail {
    pub fn new(
        push_key_id: impl Into<String>,
        nonce: u64,
        fee: impl Into<String>,
        reference: impl Into<String>,
        head: Option<String>,
        merge_proposal_id: Option<String>,
    ) -> Self {
        Self {
            push_key_id: push_key_id.into(),
            nonce,
            fee: fee.into(),
            reference: reference.into(),
            head,
            merge_proposal_id,
            signature: Vec::new(),
        }
    }

    /// The pre-signature canonical bytes: every field except `signature`. Signing and
    /// verification both operate over this encoding, never over the struct with its
    /// (possibly stale) signature field included.
    pub fn bytes_no_sig(&self) -> Vec<u8> {
        let unsigned = UnsignedTxDetail {
            push_key_id: &self.push_key_id,
            nonce: self.nonce,
            fee: &self.fee,
            reference: &self.reference,
            head: self.head.as_deref(),
            merge_proposal_id: self.merge_proposal_id.as_deref(),
        };
        bincode::encode_to_vec(&unsigned, bincode::config::standard())
            .expect("TxDetail fields are always encodable")
    }

    /// Returns the decimal `fee` parsed as an `f64` for comparisons. The canonical
    /// representation stays the string; this is a convenience for ordering only.
    pub fn fee_value(&self) -> f64 {
        self.fee.parse().unwrap_or(0.0)
    }
}

#[derive(Encode)]
struct UnsignedTxDetail<'a> {
    push_key_id: &'a str,
    nonce: u64,
    fee: &'a str,
    reference: &'a str,
    head: Option<&'a str>,
    merge_proposal_id: Option<&'a str>,
}

/// Sign `tx_detail.bytes_no_sig()` with `key` and return it with `signature` populated.
pub fn sign_tx_detail(key: &Ed25519KeyPair, mut tx_detail: TxDetail) -> TxDetail {
    let sig = key.sign(&tx_detail.bytes_no_sig());
    tx_detail.signature = sig.as_ref().to_vec();
    tx_detail
}

/// Verify `tx_detail.signature` against `public_key` (raw 32-byte Ed25519 public key bytes).
pub fn verify_tx_detail(tx_detail: &TxDetail, public_key: &[u8]) -> Result<(), PushError> {
    let unsigned = tx_detail.bytes_no_sig();
    UnparsedPublicKey::new(&ED25519, public_key)
        .verify(&unsigned, &tx_detail.signature)
        .map_err(|_| PushError::BadSignature(tx_detail.reference.clone()))
}

/// Encode a signed [`TxDetail`] as a base58 push token.
pub fn make_push_token(key: &Ed25519KeyPair, tx_detail: TxDetail) -> String {
    let signed = sign_tx_detail(key, tx_detail);
    encode_push_token(&signed)
}

/// Base58-encode an already-signed [`TxDetail`] into its token form, without re-signing.
pub fn encode_push_token(tx_detail: &TxDetail) -> String {
    let bytes = bincode::encode_to_vec(tx_detail, bincode::config::standard())
        .expect("TxDetail is always encodable");
    bs58::encode(bytes).into_string()
}

/// Decode a single push token back into a [`TxDetail`].
pub fn decode_push_token(token: &str) -> Result<TxDetail, PushError> {
    let bytes = bs58::decode(token)
        .into_vec()
        .map_err(|_| PushError::MalformedToken)?;
    let (tx_detail, _) =
        bincode::decode_from_slice::<TxDetail, _>(&bytes, bincode::config::standard())
            .map_err(|_| PushError::MalformedToken)?;
    Ok(tx_detail)
}

/// Decode a comma-joined list of push tokens (as carried in an HTTP Basic-Auth username) and
/// verify that all tokens in a multi-reference push agree on `pushKeyID`, `repoName`,
/// `repoNamespace`, and `nonce`.
///
/// `repo_name` and `repo_namespace` come from the request path, not the tokens themselves
/// (`TxDetail` has no repo field — a token only authorizes a reference; the repo it applies to
/// is whatever repo the HTTP request targets), so "agree on repoName/repoNamespace" reduces to
/// every token validly applying to the one repo the caller is pushing to. What the tokens must
/// actually agree on among themselves is `pushKeyID` and `nonce`.
pub fn decode_auth_tokens(username: &str) -> Result<Vec<TxDetail>, PushError> {
    let tokens: Vec<&str> = username.split(',').filter(|s| !s.is_empty()).collect();
    if tokens.is_empty() {
        return Err(PushError::MalformedToken);
    }

    let mut decoded = Vec::with_capacity(tokens.len());
    for token in tokens {
        decoded.push(decode_push_token(token)?);
    }

    let first = &decoded[0];
    for other in &decoded[1..] {
        if other.push_key_id != first.push_key_id || other.nonce != first.nonce {
            return Err(PushError::InconsistentMultiRef(format!(
                "reference `{}` disagrees with `{}` on pushKeyID/nonce",
                other.reference, first.reference
            )));
        }
    }

    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;

    fn test_key() -> Ed25519KeyPair {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap()
    }

    #[test]
    fn round_trips_through_base58() {
        let key = test_key();
        let detail = TxDetail::new("pk1", 1, "0.2", "refs/heads/master", None, None);
        let token = make_push_token(&key, detail.clone());
        let decoded = decode_push_token(&token).unwrap();
        assert_eq!(decoded.push_key_id, detail.push_key_id);
        assert_eq!(decoded.nonce, detail.nonce);
        assert_eq!(decoded.fee, detail.fee);
        assert_eq!(decoded.reference, detail.reference);
        verify_tx_detail(&decoded, key.public_key().as_ref()).unwrap();
    }

    #[test]
    fn rejects_garbage_token() {
        assert!(matches!(
            decode_push_token("not-base58!!"),
            Err(PushError::MalformedToken)
        ));
    }

    #[test]
    fn rejects_tampered_signature() {
        let key = test_key();
        let detail = TxDetail::new("pk1", 1, "0.2", "refs/heads/master", None, None);
        let mut signed = sign_tx_detail(&key, detail);
        signed.signature[0] ^= 0xff;
        assert!(verify_tx_detail(&signed, key.public_key().as_ref()).is_err());
    }

    #[test]
    fn multi_ref_tokens_must_share_push_key_and_nonce() {
        let key = test_key();
        let a = make_push_token(
            &key,
            TxDetail::new("pk1", 1, "0.2", "refs/heads/master", None, None),
        );
        let b = make_push_token(
            &key,
            TxDetail::new("pk1", 2, "0.2", "refs/heads/feature", None, None),
        );
        let err = decode_auth_tokens(&format!("{a},{b}")).unwrap_err();
        assert!(matches!(err, PushError::InconsistentMultiRef(_)));
    }

    #[test]
    fn multi_ref_tokens_decode_when_consistent() {
        let key = test_key();
        let a = make_push_token(
            &key,
            TxDetail::new("pk1", 1, "0.2", "refs/heads/master", None, None),
        );
        let b = make_push_token(
            &key,
            TxDetail::new("pk1", 1, "0.1", "refs/heads/feature", None, None),
        );
        let decoded = decode_auth_tokens(&format!("{a},{b}")).unwrap();
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn empty_username_is_malformed() {
        assert!(matches!(
            decode_auth_tokens(""),
            Err(PushError::MalformedToken)
        ));
    }
}
