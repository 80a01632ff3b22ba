//! JSON payload encoding for cache entries.
//!
//! Entries are stored as plain UTF-8 JSON so that other services sharing the
//! same Redis keyspace can read them. There is no envelope: a value written by
//! [`serialize_for_cache`] is exactly `serde_json::to_vec(&value)`.
//!
//! Decoding failures surface as [`Error::DeserializationError`]; the read path
//! of [`crate::store::CacheStore`] turns them into misses.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode a value for storage.
///
/// # Errors
///
/// Returns `Error::SerializationError` if the value's `Serialize` impl fails
/// (for example a map with non-string keys).
pub fn serialize_for_cache<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::SerializationError(e.to_string()))
}

/// Decode a stored payload.
///
/// # Errors
///
/// Returns `Error::DeserializationError` if the bytes are not valid JSON for `T`.
pub fn deserialize_from_cache<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::DeserializationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Exercise {
        id: u64,
        name: String,
        muscle_groups: Vec<String>,
    }

    #[test]
    fn test_payload_is_plain_json() {
        let exercise = Exercise {
            id: 7,
            name: "Squat".to_string(),
            muscle_groups: vec!["quads".to_string()],
        };

        let bytes = serialize_for_cache(&exercise).expect("serialize");
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"id":7,"name":"Squat","muscle_groups":["quads"]}"#
        );

        let back: Exercise = deserialize_from_cache(&bytes).expect("deserialize");
        assert_eq!(back, exercise);
    }

    #[test]
    fn test_wrong_shape_is_deserialization_error() {
        let bytes = serialize_for_cache(&vec![1, 2, 3]).unwrap();
        let result: Result<Exercise> = deserialize_from_cache(&bytes);
        assert!(matches!(result, Err(Error::DeserializationError(_))));
    }

    #[test]
    fn test_garbage_is_deserialization_error() {
        let result: Result<serde_json::Value> = deserialize_from_cache(b"\xff\xfe");
        assert!(matches!(result, Err(Error::DeserializationError(_))));
    }

    #[test]
    fn test_non_string_map_keys_fail_to_serialize() {
        let mut map: HashMap<Vec<u8>, u32> = HashMap::new();
        map.insert(vec![1], 1);
        let result = serialize_for_cache(&map);
        assert!(matches!(result, Err(Error::SerializationError(_))));
    }
}
