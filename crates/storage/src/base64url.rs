//! `#[serde(with = "base64url")]` helper for byte fields that must be
//! wire/storage-encoded as unpadded base64url, matching the base64url
//! helpers duplicated across `webauthn.c++`/`serialization.c++`.

use base64::Engine;
use serde::{Deserialize, Deserializer, Serializer};

const ENGINE: base64::engine::GeneralPurpose = base64::engine::general_purpose::URL_SAFE_NO_PAD;

pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ENGINE.encode(bytes))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    ENGINE.decode(&s).map_err(serde::de::Error::custom)
}

pub mod option {
    use super::ENGINE;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) if !b.is_empty() => serializer.serialize_some(&ENGINE.encode(b)),
            _ => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let opt = Option::<String>::deserialize(deserializer)?;
        opt.map(|s| ENGINE.decode(&s).map_err(serde::de::Error::custom)).transpose()
    }
}
