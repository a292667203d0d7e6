//! The `Signature` line attached to commit and tag objects: `<role> <name> <email> <seconds> <tz>`.

use std::fmt::Display;
use std::str::FromStr;

use bincode::{Decode, Encode};
use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// Which role this signature line plays inside a commit or tag object.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize, Decode, Encode)]
pub enum SignatureType {
    Author,
    Committer,
    Tagger,
}

impl Display for SignatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SignatureType::Author => write!(f, "author"),
            SignatureType::Committer => write!(f, "committer"),
            SignatureType::Tagger => write!(f, "tagger"),
        }
    }
}

impl FromStr for SignatureType {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "author" => Ok(SignatureType::Author),
            "committer" => Ok(SignatureType::Committer),
            "tagger" => Ok(SignatureType::Tagger),
            _ => Err(GitError::InvalidSignatureType(s.to_string())),
        }
    }
}

/// A name/email/timestamp triple identifying who authored, committed, or tagged an object.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize, Decode, Encode)]
pub struct Signature {
    pub signature_type: SignatureType,
    pub name: String,
    pub email: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Offset from UTC, e.g. `+0800` or `-0500`.
    pub timezone: String,
}

impl Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} <{}> {} {}",
            self.name, self.email, self.timestamp, self.timezone
        )
    }
}

impl Signature {
    pub fn new(signature_type: SignatureType, name: String, email: String) -> Signature {
        Signature {
            signature_type,
            name,
            email,
            timestamp: chrono::Utc::now().timestamp(),
            timezone: "+0000".to_string(),
        }
    }

    /// Parse a single signature line, e.g. `author A U Thor <author@example.com> 1234567890 +0000`.
    ///
    /// `gpgsig`/`gpgsig-sha256` lines embedded in commits are not signature lines; callers strip
    /// those before reaching here (they live in the object body as part of an extended header).
    pub fn from_data(data: Vec<u8>) -> Result<Signature, GitError> {
        let type_end = data
            .find_byte(0x20)
            .ok_or_else(|| GitError::InvalidSignatureType("missing role".to_string()))?;
        let signature_type = SignatureType::from_str(
            String::from_utf8(data[..type_end].to_vec())
                .map_err(|e| GitError::InvalidSignatureType(e.to_string()))?
                .as_str(),
        )?;

        let email_start = data
            .find_byte(b'<')
            .ok_or_else(|| GitError::InvalidSignatureType("missing email".to_string()))?;
        let email_end = data
            .find_byte(b'>')
            .ok_or_else(|| GitError::InvalidSignatureType("missing email".to_string()))?;

        let name = String::from_utf8(data[type_end + 1..email_start - 1].to_vec())
            .map_err(|e| GitError::InvalidSignatureType(e.to_string()))?;
        let email = String::from_utf8(data[email_start + 1..email_end].to_vec())
            .map_err(|e| GitError::InvalidSignatureType(e.to_string()))?;

        let rest = String::from_utf8(data[email_end + 2..].to_vec())
            .map_err(|e| GitError::InvalidSignatureType(e.to_string()))?;
        let mut parts = rest.split_whitespace();
        let timestamp = parts
            .next()
            .ok_or_else(|| GitError::InvalidSignatureType("missing timestamp".to_string()))?
            .parse::<i64>()
            .map_err(|e| GitError::InvalidSignatureType(e.to_string()))?;
        let timezone = parts
            .next()
            .unwrap_or("+0000")
            .to_string();

        Ok(Signature {
            signature_type,
            name,
            email,
            timestamp,
            timezone,
        })
    }

    pub fn to_data(&self) -> Result<Vec<u8>, GitError> {
        Ok(format!(
            "{} {} <{}> {} {}",
            self.signature_type, self.name, self.email, self.timestamp, self.timezone
        )
        .into_bytes())
    }
}
