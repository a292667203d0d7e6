//! The annotated Tag object: a signed pointer to another object (usually a commit) carrying a
//! tag name, a tagger identity, and a message.

use std::fmt::Display;
use std::str::FromStr;

use bincode::{Decode, Encode};
use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::ObjectTrait;
use crate::internal::object::ObjectType;
use crate::internal::object::signature::Signature;

#[derive(Eq, Debug, Clone, Serialize, Deserialize, Decode, Encode)]
pub struct Tag {
    pub id: ObjectHash,
    pub object_hash: ObjectHash,
    pub object_type: ObjectType,
    pub tag_name: String,
    pub tagger: Signature,
    pub message: String,
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "object {}", self.object_hash)?;
        writeln!(f, "type {}", self.object_type)?;
        writeln!(f, "tag {}", self.tag_name)?;
        writeln!(f, "tagger {}", self.tagger)?;
        write!(f, "{}", self.message)
    }
}

impl Tag {
    pub fn new(
        object_hash: ObjectHash,
        object_type: ObjectType,
        tag_name: String,
        tagger: Signature,
        message: &str,
    ) -> Tag {
        let mut tag = Tag {
            id: ObjectHash::default(),
            object_hash,
            object_type,
            tag_name,
            tagger,
            message: message.to_string(),
        };
        let hash = ObjectHash::from_type_and_data(ObjectType::Tag, &tag.to_data().unwrap());
        tag.id = hash;
        tag
    }

    /// The commit this tag ultimately resolves to. For an annotated tag pointing directly at a
    /// commit this is just `object_hash`; tags pointing at other tags are not modeled here since
    /// push validation only ever walks annotated tags that point at commits.
    pub fn target_commit(&self) -> Option<ObjectHash> {
        match self.object_type {
            ObjectType::Commit => Some(self.object_hash),
            _ => None,
        }
    }
}

impl ObjectTrait for Tag {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError>
    where
        Self: Sized,
    {
        let mut tag = data;

        let object_end = tag.find_byte(0x0a).unwrap();
        let object_hash = ObjectHash::from_str(
            String::from_utf8(tag[7..object_end].to_owned()) // "object "
                .unwrap()
                .as_str(),
        )
        .unwrap();
        let binding = tag[object_end + 1..].to_vec();
        tag = &binding;

        let type_end = tag.find_byte(0x0a).unwrap();
        let object_type = ObjectType::from_string(
            String::from_utf8(tag[5..type_end].to_owned()) // "type "
                .unwrap()
                .as_str(),
        )?;
        let binding = tag[type_end + 1..].to_vec();
        tag = &binding;

        let name_end = tag.find_byte(0x0a).unwrap();
        let tag_name = String::from_utf8(tag[4..name_end].to_owned()) // "tag "
            .unwrap();
        let binding = tag[name_end + 1..].to_vec();
        tag = &binding;

        let tagger_end = tag.find_byte(0x0a).unwrap();
        let tagger = Signature::from_data(tag[..tagger_end].to_vec())?;

        let message = unsafe { String::from_utf8_unchecked(tag[tagger_end + 1..].to_vec()) };

        Ok(Tag {
            id: hash,
            object_hash,
            object_type,
            tag_name,
            tagger,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tag
    }

    fn get_size(&self) -> usize {
        0
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();
        data.extend(b"object ");
        data.extend(self.object_hash.to_string().as_bytes());
        data.extend(&[0x0a]);
        data.extend(b"type ");
        data.extend(self.object_type.to_string().as_bytes());
        data.extend(&[0x0a]);
        data.extend(b"tag ");
        data.extend(self.tag_name.as_bytes());
        data.extend(&[0x0a]);
        data.extend(self.tagger.to_data()?);
        data.extend(&[0x0a]);
        data.extend(self.message.as_bytes());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};
    use crate::internal::object::signature::SignatureType;

    #[test]
    fn test_tag_round_trip() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let tagger = Signature::new(
            SignatureType::Tagger,
            "tester".to_string(),
            "tester@example.com".to_string(),
        );
        let object_hash =
            ObjectHash::from_str("341e54913a3a43069f2927cc0f703e5a9f730df1").unwrap();
        let tag = Tag::new(
            object_hash,
            ObjectType::Commit,
            "v1.0.0".to_string(),
            tagger,
            "release\n",
        );

        let data = tag.to_data().unwrap();
        let parsed = Tag::from_bytes(&data, tag.id).unwrap();
        assert_eq!(parsed.object_hash, object_hash);
        assert_eq!(parsed.tag_name, "v1.0.0");
        assert_eq!(parsed.target_commit(), Some(object_hash));
    }
}
