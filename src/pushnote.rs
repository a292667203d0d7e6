//! The P2P wire types: [`PushNote`] (the internode unit of work) and [`PushEndorsement`] (a
//! storer node's signed attestation of a note's validity). Distinct from
//! [`crate::internal::object::note::Note`], which models a literal Git Notes object.

use bincode::{Decode, Encode};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use serde::{Deserialize, Serialize};

use crate::errors::PushError;

type Blake2b256 = Blake2b<U32>;

/// One reference's contribution to a [`PushNote`]: what changed, under what authorization, and
/// which objects it pulled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Decode, Encode)]
pub struct ReferenceUpdate {
    pub name: String,
    pub old_hash: String,
    pub new_hash: String,
    /// `repoState.refs[name].nonce + 1` at admission time.
    pub nonce: u64,
    pub fee: String,
    pub signature: Vec<u8>,
    /// The pusher's account nonce (distinct from the per-ref nonce above), echoed from the
    /// authorizing `TxDetail`.
    pub pusher_account_nonce: u64,
    /// Hex object hashes this reference's walk covers (commit history plus, for tags, the tag
    /// object itself).
    pub objects: Vec<String>,
}

impl ReferenceUpdate {
    pub fn is_delete(&self) -> bool {
        self.new_hash.chars().all(|c| c == '0')
    }

    pub fn fee_value(&self) -> f64 {
        self.fee.parse().unwrap_or(0.0)
    }
}

/// The internode unit of work: a signed, fee-bearing description of a validated push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Decode, Encode)]
pub struct PushNote {
    pub repo_name: String,
    pub references: Vec<ReferenceUpdate>,
    pub push_key_id: String,
    /// Sum of pushed object bytes.
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    pub node_sig: Vec<u8>,
    pub node_pub_key: Vec<u8>,
}

#[derive(Encode)]
struct UnsignedPushNote<'a> {
    repo_name: &'a str,
    references: &'a [ReferenceUpdate],
    push_key_id: &'a str,
    size: u64,
    timestamp: i64,
}

impl PushNote {
    pub fn new(
        repo_name: String,
        references: Vec<ReferenceUpdate>,
        push_key_id: String,
        timestamp: i64,
    ) -> Self {
        Self {
            repo_name,
            references,
            push_key_id,
            size: 0,
            timestamp,
            node_sig: Vec::new(),
            node_pub_key: Vec::new(),
        }
    }

    /// Sets `size` (sum of pushed object byte lengths). The mediator computes this while
    /// streaming the packfile, well after the reference list itself is known, so it is set
    /// separately rather than threaded through the constructor.
    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    fn unsigned_bytes(&self) -> Vec<u8> {
        let unsigned = UnsignedPushNote {
            repo_name: &self.repo_name,
            references: &self.references,
            push_key_id: &self.push_key_id,
            size: self.size,
            timestamp: self.timestamp,
        };
        bincode::encode_to_vec(&unsigned, bincode::config::standard())
            .expect("PushNote fields are always encodable")
    }

    /// Full canonical bytes including the node's signature and public key, used for the note's
    /// identity hash per spec §3 (I2: equal canonical bytes ⇒ equal ids).
    pub fn canonical_bytes(&self) -> Vec<u8> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .expect("PushNote is always encodable")
    }

    /// Blake2b-256 over [`Self::canonical_bytes`].
    pub fn id(&self) -> [u8; 32] {
        let mut hasher = Blake2b256::new();
        hasher.update(&self.canonical_bytes());
        hasher.finalize().into()
    }

    pub fn id_hex(&self) -> String {
        hex::encode(self.id())
    }

    /// `billableSize = len(bytes_minus_fee_fields) + size`. The fee fields are excluded from
    /// the size calculation the same way they're excluded from `TxDetail::bytes_no_sig`: a
    /// note's fee-rate denominator must not itself grow with a higher declared fee.
    pub fn billable_size(&self) -> u64 {
        let without_fees: Vec<u8> = bincode::encode_to_vec(
            self.references
                .iter()
                .map(|r| (r.name.as_str(), r.old_hash.as_str(), r.new_hash.as_str(), r.objects.clone()))
                .collect::<Vec<_>>(),
            bincode::config::standard(),
        )
        .expect("always encodable");
        without_fees.len() as u64 + self.size
    }

    pub fn total_fee(&self) -> f64 {
        self.references.iter().map(|r| r.fee_value()).sum()
    }

    pub fn fee_rate(&self) -> f64 {
        let billable = self.billable_size();
        if billable == 0 {
            0.0
        } else {
            self.total_fee() / billable as f64
        }
    }

    /// Sign the note with the node's key, setting `nodeSig` and `nodePubKey`. Must be called
    /// after every other field is finalized — signing, then mutating any field, invalidates
    /// the signature.
    pub fn sign(&mut self, key: &Ed25519KeyPair) {
        let sig = key.sign(&self.unsigned_bytes());
        self.node_sig = sig.as_ref().to_vec();
        self.node_pub_key = key.public_key().as_ref().to_vec();
    }

    pub fn verify_node_signature(&self) -> Result<(), PushError> {
        UnparsedPublicKey::new(&ED25519, &self.node_pub_key)
            .verify(&self.unsigned_bytes(), &self.node_sig)
            .map_err(|_| PushError::InvalidNote("bad node signature".to_string()))
    }
}

/// A storer node's signed attestation that it validated a [`PushNote`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Decode, Encode)]
pub struct PushEndorsement {
    pub push_note_id: [u8; 32],
    pub sender_pub_key: Vec<u8>,
    pub signature: Vec<u8>,
}

#[derive(Encode)]
struct UnsignedEndorsement<'a> {
    push_note_id: [u8; 32],
    sender_pub_key: &'a [u8],
}

impl PushEndorsement {
    pub fn new(push_note_id: [u8; 32], key: &Ed25519KeyPair) -> Self {
        let sender_pub_key = key.public_key().as_ref().to_vec();
        let unsigned = UnsignedEndorsement {
            push_note_id,
            sender_pub_key: &sender_pub_key,
        };
        let bytes = bincode::encode_to_vec(&unsigned, bincode::config::standard())
            .expect("always encodable");
        let signature = key.sign(&bytes).as_ref().to_vec();
        Self {
            push_note_id,
            sender_pub_key,
            signature,
        }
    }

    /// Identity: hash over fields without signature.
    pub fn id(&self) -> [u8; 32] {
        let unsigned = UnsignedEndorsement {
            push_note_id: self.push_note_id,
            sender_pub_key: &self.sender_pub_key,
        };
        let bytes = bincode::encode_to_vec(&unsigned, bincode::config::standard())
            .expect("always encodable");
        let mut hasher = Blake2b256::new();
        hasher.update(&bytes);
        hasher.finalize().into()
    }

    /// Verify `signature` against `senderPubKey`: signature covers the first two fields.
    pub fn verify(&self) -> Result<(), PushError> {
        let unsigned = UnsignedEndorsement {
            push_note_id: self.push_note_id,
            sender_pub_key: &self.sender_pub_key,
        };
        let bytes = bincode::encode_to_vec(&unsigned, bincode::config::standard())
            .expect("always encodable");
        UnparsedPublicKey::new(&ED25519, &self.sender_pub_key)
            .verify(&bytes, &self.signature)
            .map_err(|_| PushError::BadSignature("endorsement".to_string()))
    }
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

    fn sample_reference(name: &str, fee: &str) -> ReferenceUpdate {
        ReferenceUpdate {
            name: name.to_string(),
            old_hash: "0".repeat(40),
            new_hash: "c".repeat(40),
            nonce: 1,
            fee: fee.to_string(),
            signature: vec![],
            pusher_account_nonce: 2,
            objects: vec!["c".repeat(40), "t".repeat(40), "b".repeat(40)],
        }
    }

    #[test]
    fn equal_canonical_bytes_imply_equal_ids() {
        let key = test_key();
        let mut a = PushNote::new(
            "repo".to_string(),
            vec![sample_reference("refs/heads/master", "0.2")],
            "pk1".to_string(),
            1_700_000_000,
        );
        a.sign(&key);
        let mut b = a.clone();
        b.sign(&key);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn different_content_yields_different_id() {
        let key = test_key();
        let mut a = PushNote::new(
            "repo".to_string(),
            vec![sample_reference("refs/heads/master", "0.2")],
            "pk1".to_string(),
            1_700_000_000,
        );
        a.sign(&key);
        let mut b = PushNote::new(
            "repo".to_string(),
            vec![sample_reference("refs/heads/master", "0.5")],
            "pk1".to_string(),
            1_700_000_000,
        );
        b.sign(&key);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn node_signature_round_trips() {
        let key = test_key();
        let mut note = PushNote::new(
            "repo".to_string(),
            vec![sample_reference("refs/heads/master", "0.2")],
            "pk1".to_string(),
            1_700_000_000,
        );
        note.sign(&key);
        assert!(note.verify_node_signature().is_ok());
    }

    #[test]
    fn tampered_note_fails_signature_check() {
        let key = test_key();
        let mut note = PushNote::new(
            "repo".to_string(),
            vec![sample_reference("refs/heads/master", "0.2")],
            "pk1".to_string(),
            1_700_000_000,
        );
        note.sign(&key);
        note.size += 1;
        assert!(note.verify_node_signature().is_err());
    }

    #[test]
    fn endorsement_round_trips_and_id_excludes_signature() {
        let key = test_key();
        let note_id = [7u8; 32];
        let endorsement = PushEndorsement::new(note_id, &key);
        assert!(endorsement.verify().is_ok());

        let mut tampered = endorsement.clone();
        tampered.signature[0] ^= 0xff;
        assert!(tampered.verify().is_err());
    }

    #[test]
    fn total_fee_sums_references() {
        let note = PushNote::new(
            "repo".to_string(),
            vec![
                sample_reference("refs/heads/master", "0.2"),
                sample_reference("refs/heads/feature", "0.3"),
            ],
            "pk1".to_string(),
            0,
        );
        assert!((note.total_fee() - 0.5).abs() < f64::EPSILON);
    }
}
