//! Plain free-function base64url helpers for the wire-facing ceremony
//! payloads (challenges, credential ids, clientDataJSON). Kept separate
//! from `storage`'s serde-facing `base64url` module on purpose, mirroring
//! `webauthn.c++`'s own local `base64url_encode`/`base64url_decode` pair.

use base64::Engine;

const ENGINE: base64::engine::GeneralPurpose = base64::engine::general_purpose::URL_SAFE_NO_PAD;

pub fn encode(bytes: &[u8]) -> String {
    ENGINE.encode(bytes)
}

pub fn decode(s: &str) -> Vec<u8> {
    ENGINE.decode(s).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let data = b"hello world";
        assert_eq!(decode(&encode(data)), data);
    }

    #[test]
    fn bad_input_decodes_to_empty() {
        assert!(decode("not!!base64").is_empty());
    }
}
