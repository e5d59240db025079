//! Base64 transport encoding for opaque byte blobs.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serializer};

pub(crate) fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map(Bytes::from)
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "super")]
        blob: Bytes,
    }

    #[test]
    fn blob_roundtrip() {
        let wrapper = Wrapper {
            blob: Bytes::from_static(&[0x00, 0xFF, 0x42]),
        };
        let json = serde_json::to_string(&wrapper).unwrap();
        assert_eq!(json, r#"{"blob":"AP9C"}"#);

        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.blob, wrapper.blob);
    }

    #[test]
    fn rejects_invalid_base64() {
        let result: Result<Wrapper, _> = serde_json::from_str(r#"{"blob":"!!"}"#);
        assert!(result.is_err());
    }
}
