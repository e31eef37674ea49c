//! Serde adapters for model fields.
//!
//! These are opt-in per field through `#[serde(with = ...)]`, `deserialize_with` or
//! `serialize_with`; nothing here changes how other types are encoded.
//!
//! ```ignore
//! #[derive(Serialize, Deserialize)]
//! struct Post {
//!     #[serde(deserialize_with = "codec::object_id::deserialize")]
//!     author: ObjectId,
//!     #[serde(serialize_with = "codec::set_as_list")]
//!     tags: HashSet<String>,
//! }
//! ```

use serde::{Serialize, Serializer};

/// Reads an [`ObjectId`](bson::oid::ObjectId) from either its BSON form or its hex string.
pub mod object_id {
    use bson::{Bson, oid::ObjectId};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<ObjectId, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Bson::deserialize(deserializer)? {
            Bson::ObjectId(oid) => Ok(oid),
            Bson::String(hex) => ObjectId::parse_str(&hex).map_err(D::Error::custom),
            other => Err(D::Error::custom(format!("expected an object id, got {other}"))),
        }
    }

    /// Writes the id in its native BSON form.
    pub fn serialize<S>(oid: &ObjectId, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serde::Serialize::serialize(oid, serializer)
    }
}

/// Writes any set as a BSON array in ascending order.
///
/// Hash sets iterate in arbitrary order, so the same set would otherwise produce
/// different documents between runs. Reading the array back into a set needs no adapter.
pub fn set_as_list<'a, T, I, S>(set: &'a I, serializer: S) -> Result<S::Ok, S::Error>
where
    &'a I: IntoIterator<Item = &'a T>,
    T: Serialize + Ord + 'a,
    S: Serializer,
{
    let mut items = set.into_iter().collect::<Vec<_>>();
    items.sort();
    serializer.collect_seq(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{Bson, doc, oid::ObjectId};
    use serde::Deserialize;
    use std::collections::HashSet;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Post {
        #[serde(with = "object_id")]
        author: ObjectId,
        #[serde(serialize_with = "set_as_list")]
        tags: HashSet<String>,
    }

    #[test]
    fn test_object_id_from_hex_string() {
        let oid = ObjectId::new();
        let post: Post = bson::de::deserialize_from_document(doc! {
            "author": oid.to_hex(),
            "tags": ["a"],
        })
        .unwrap();

        assert_eq!(post.author, oid);
    }

    #[test]
    fn test_object_id_from_native_form() {
        let oid = ObjectId::new();
        let post: Post = bson::de::deserialize_from_document(doc! { "author": oid, "tags": [] }).unwrap();

        assert_eq!(post.author, oid);
    }

    #[test]
    fn test_invalid_hex_is_rejected() {
        let result = bson::de::deserialize_from_document::<Post>(doc! { "author": "xyz", "tags": [] });
        assert!(result.is_err());
    }

    #[test]
    fn test_set_written_as_sorted_array() {
        let tags = ["delta", "alpha", "echo", "charlie", "bravo"];
        let post = Post {
            author: ObjectId::new(),
            tags: tags.iter().map(ToString::to_string).collect(),
        };

        let document = bson::ser::serialize_to_document(&post).unwrap();
        assert_eq!(
            document.get("tags"),
            Some(&Bson::Array(
                ["alpha", "bravo", "charlie", "delta", "echo"].into_iter().map(Bson::from).collect()
            ))
        );
        assert_eq!(bson::de::deserialize_from_document::<Post>(document).unwrap(), post);
    }
}
