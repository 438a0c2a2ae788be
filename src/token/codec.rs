//! Signed tracking tokens
//!
//! A token is the base64url (unpadded) encoding of a canonical JSON object
//! holding the metadata plus the destination under a reserved key. The
//! signature is a hex HMAC-SHA256 of the encoded body, truncated to the
//! configured number of characters, and travels beside the body as a
//! separate query parameter.

use base64::prelude::*;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fmt;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::config::{ConfigError, TrackerConfig};
use crate::models::{MetaValue, Metadata};

/// Key under which the destination URL travels inside the payload
pub const URL_KEY: &str = "u";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token signature verification failed")]
    InvalidSignature,
    #[error("token payload is malformed")]
    MalformedPayload,
    #[error("metadata key 'u' is reserved for the destination URL")]
    ReservedKey,
}

/// Encoded body and signature of a tracking token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    pub payload: String,
    pub signature: String,
}

/// Contents of a verified token.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedToken {
    pub destination_url: String,
    pub metadata: Metadata,
}

#[derive(Clone)]
pub struct TokenCodec {
    mac: HmacSha256,
    signature_len: usize,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("signature_len", &self.signature_len)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Shortest accepted signature, in hex characters
    pub const MIN_SIGNATURE_LEN: usize = 8;
    /// Hex length of an untruncated HMAC-SHA256 digest
    pub const MAX_SIGNATURE_LEN: usize = 64;

    pub fn new(secret_key: &[u8], signature_len: usize) -> Result<Self, ConfigError> {
        if secret_key.is_empty() {
            return Err(ConfigError::MissingSecretKey);
        }
        if !(Self::MIN_SIGNATURE_LEN..=Self::MAX_SIGNATURE_LEN).contains(&signature_len) {
            return Err(ConfigError::Invalid {
                var: "TRACKER_SIGNATURE_LEN",
                reason: format!(
                    "{signature_len} is outside {}..={}",
                    Self::MIN_SIGNATURE_LEN,
                    Self::MAX_SIGNATURE_LEN
                ),
            });
        }

        let mac = HmacSha256::new_from_slice(secret_key).map_err(|e| ConfigError::Invalid {
            var: "TRACKER_SECRET_KEY",
            reason: e.to_string(),
        })?;

        Ok(Self { mac, signature_len })
    }

    pub fn from_config(config: &TrackerConfig) -> Result<Self, ConfigError> {
        Self::new(&config.secret_key, config.signature_len)
    }

    /// Encode and sign a destination with its metadata.
    ///
    /// Output is a pure function of the inputs and the key.
    pub fn encode(
        &self,
        destination_url: &str,
        metadata: &Metadata,
    ) -> Result<SignedToken, TokenError> {
        if metadata.contains_key(URL_KEY) {
            return Err(TokenError::ReservedKey);
        }

        let url_value = MetaValue::Text(destination_url.to_string());
        let mut data: BTreeMap<&str, &MetaValue> =
            metadata.iter().map(|(k, v)| (k.as_str(), v)).collect();
        data.insert(URL_KEY, &url_value);

        let json = serde_json::to_vec(&data).map_err(|_| TokenError::MalformedPayload)?;
        let payload = BASE64_URL_SAFE_NO_PAD.encode(json);
        let signature = self.sign(&payload);

        Ok(SignedToken { payload, signature })
    }

    /// Verify a signature and decode the payload it covers.
    pub fn decode(&self, payload: &str, signature: &str) -> Result<DecodedToken, TokenError> {
        let expected = self.sign(payload);
        if !bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
            return Err(TokenError::InvalidSignature);
        }

        let json = BASE64_URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::MalformedPayload)?;
        let mut metadata: Metadata =
            serde_json::from_slice(&json).map_err(|_| TokenError::MalformedPayload)?;

        let destination_url = match metadata.remove(URL_KEY) {
            Some(MetaValue::Text(url)) => url,
            _ => return Err(TokenError::MalformedPayload),
        };

        Ok(DecodedToken {
            destination_url,
            metadata,
        })
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());

        let mut sig = hex::encode(mac.finalize().into_bytes());
        sig.truncate(self.signature_len);
        sig
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new(b"test_secret_key_1234567890", 16).unwrap()
    }

    fn sample_metadata() -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("shop_id".to_string(), 1i64.into());
        metadata.insert("promotion_id".to_string(), 42i64.into());
        metadata.insert("campaign".to_string(), "email".into());
        metadata
    }

    #[test]
    fn test_round_trip() {
        let codec = codec();
        let destination = "https://shop.example.com/product/123";
        let metadata = sample_metadata();

        let token = codec.encode(destination, &metadata).unwrap();
        let decoded = codec.decode(&token.payload, &token.signature).unwrap();

        assert_eq!(decoded.destination_url, destination);
        assert_eq!(decoded.metadata, metadata);
        assert!(!decoded.metadata.contains_key(URL_KEY));
    }

    #[test]
    fn test_round_trip_preserves_scalars() {
        let codec = codec();
        let mut metadata = Metadata::new();
        metadata.insert("none".to_string(), MetaValue::Null);
        metadata.insert("flag".to_string(), true.into());
        metadata.insert(
            "ratio".to_string(),
            MetaValue::Number(serde_json::Number::from_f64(0.25).unwrap()),
        );
        metadata.insert("campaign".to_string(), "lato_2024_żółć".into());

        let token = codec.encode("https://shop.com", &metadata).unwrap();
        let decoded = codec.decode(&token.payload, &token.signature).unwrap();
        assert_eq!(decoded.metadata, metadata);
    }

    #[test]
    fn test_signature_is_truncated_hex() {
        let token = codec().encode("https://shop.com", &Metadata::new()).unwrap();
        assert_eq!(token.signature.len(), 16);
        assert!(token
            .signature
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert!(!token.payload.contains('='));
    }

    #[test]
    fn test_full_length_signature() {
        let codec = TokenCodec::new(b"key", 64).unwrap();
        let token = codec.encode("https://shop.com", &Metadata::new()).unwrap();
        assert_eq!(token.signature.len(), 64);
        assert!(codec.decode(&token.payload, &token.signature).is_ok());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let codec = codec();
        let a = codec.encode("https://shop.com", &sample_metadata()).unwrap();
        let b = codec.encode("https://shop.com", &sample_metadata()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_destinations_produce_different_signatures() {
        let codec = codec();
        let a = codec.encode("https://shop1.com", &Metadata::new()).unwrap();
        let b = codec.encode("https://shop2.com", &Metadata::new()).unwrap();
        assert_ne!(a.signature, b.signature);
    }

    #[test]
    fn test_different_keys_produce_different_signatures() {
        let a = TokenCodec::new(b"key-one", 16).unwrap();
        let b = TokenCodec::new(b"key-two", 16).unwrap();
        let token = a.encode("https://shop.com", &Metadata::new()).unwrap();
        assert_eq!(
            b.decode(&token.payload, &token.signature),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn test_invalid_signature_is_rejected() {
        let codec = codec();
        let token = codec.encode("https://shop.com", &Metadata::new()).unwrap();
        assert_eq!(
            codec.decode(&token.payload, "invalidsignature"),
            Err(TokenError::InvalidSignature)
        );
        assert_eq!(
            codec.decode(&token.payload, ""),
            Err(TokenError::InvalidSignature)
        );
        assert_eq!(
            codec.decode(&token.payload, &token.signature[..15]),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let codec = codec();
        let token = codec.encode("https://shop.example.com", &Metadata::new()).unwrap();
        let forged = BASE64_URL_SAFE_NO_PAD.encode(br#"{"u":"https://evil.com"}"#);
        assert_eq!(
            codec.decode(&forged, &token.signature),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn test_single_bit_flips_are_detected() {
        let codec = codec();
        let token = codec.encode("https://shop.com/p?q=1", &sample_metadata()).unwrap();

        // Bits 0..7 keep every byte ASCII, so the mutated body stays valid UTF-8
        for i in 0..token.payload.len() {
            for bit in 0..7 {
                let mut bytes = token.payload.clone().into_bytes();
                bytes[i] ^= 1 << bit;
                let mutated = String::from_utf8(bytes).unwrap();
                assert_eq!(
                    codec.decode(&mutated, &token.signature),
                    Err(TokenError::InvalidSignature),
                    "payload flip at byte {i} bit {bit} was accepted"
                );
            }
        }

        for i in 0..token.signature.len() {
            for bit in 0..7 {
                let mut bytes = token.signature.clone().into_bytes();
                bytes[i] ^= 1 << bit;
                let mutated = String::from_utf8(bytes).unwrap();
                assert_eq!(
                    codec.decode(&token.payload, &mutated),
                    Err(TokenError::InvalidSignature),
                    "signature flip at byte {i} bit {bit} was accepted"
                );
            }
        }
    }

    #[test]
    fn test_truncated_and_reordered_payloads_are_rejected() {
        let codec = codec();
        let token = codec.encode("https://shop.com", &sample_metadata()).unwrap();

        for end in 0..token.payload.len() {
            assert_eq!(
                codec.decode(&token.payload[..end], &token.signature),
                Err(TokenError::InvalidSignature)
            );
        }

        let (head, tail) = token.payload.split_at(token.payload.len() / 2);
        let swapped = format!("{tail}{head}");
        assert_eq!(
            codec.decode(&swapped, &token.signature),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn test_reserved_key_is_refused() {
        let mut metadata = Metadata::new();
        metadata.insert(URL_KEY.to_string(), "https://evil.com".into());
        assert_eq!(
            codec().encode("https://shop.com", &metadata),
            Err(TokenError::ReservedKey)
        );
    }

    #[test]
    fn test_signed_garbage_is_malformed() {
        let codec = codec();

        let not_base64 = "not*base64!";
        let sig = codec.sign(not_base64);
        assert_eq!(
            codec.decode(not_base64, &sig),
            Err(TokenError::MalformedPayload)
        );

        let cases: [&[u8]; 4] = [
            b"not json",
            br#"{"shop_id":1}"#,
            br#"{"u":42}"#,
            br#"{"u":"https://shop.com","tags":["a"]}"#,
        ];
        for body in cases {
            let payload = BASE64_URL_SAFE_NO_PAD.encode(body);
            let sig = codec.sign(&payload);
            assert_eq!(
                codec.decode(&payload, &sig),
                Err(TokenError::MalformedPayload)
            );
        }
    }

    #[test]
    fn test_special_characters_in_destination() {
        let codec = codec();
        let destination = "https://shop.com/search?q=test&category=shoes#frag";
        let token = codec.encode(destination, &Metadata::new()).unwrap();
        let decoded = codec.decode(&token.payload, &token.signature).unwrap();
        assert_eq!(decoded.destination_url, destination);
    }

    #[test]
    fn test_constructor_validation() {
        assert!(matches!(
            TokenCodec::new(b"", 16),
            Err(ConfigError::MissingSecretKey)
        ));
        assert!(TokenCodec::new(b"key", 0).is_err());
        assert!(TokenCodec::new(b"key", 65).is_err());
    }

    #[test]
    fn test_short_signatures_are_rejected() {
        for len in 1..TokenCodec::MIN_SIGNATURE_LEN {
            assert!(matches!(
                TokenCodec::new(b"key", len),
                Err(ConfigError::Invalid { var: "TRACKER_SIGNATURE_LEN", .. })
            ));
        }
        let codec = TokenCodec::new(b"key", TokenCodec::MIN_SIGNATURE_LEN).unwrap();
        let token = codec.encode("https://shop.com", &Metadata::new()).unwrap();
        assert_eq!(token.signature.len(), TokenCodec::MIN_SIGNATURE_LEN);
    }

    #[test]
    fn test_signature_matches_full_digest_prefix() {
        let codec = TokenCodec::new(b"key", 64).unwrap();
        let payload = "eyJ1IjoiaHR0cHM6Ly9zaG9wLmNvbSJ9";

        let mut mac = HmacSha256::new_from_slice(b"key").unwrap();
        mac.update(payload.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        assert_eq!(codec.sign(payload), expected);
        let short = TokenCodec::new(b"key", 16).unwrap();
        assert_eq!(short.sign(payload), expected[..16]);
    }

    #[test]
    fn test_debug_does_not_expose_key() {
        let rendered = format!("{:?}", codec());
        assert!(!rendered.contains("test_secret_key"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_meta_value() -> impl Strategy<Value = MetaValue> {
            prop_oneof![
                Just(MetaValue::Null),
                any::<bool>().prop_map(MetaValue::from),
                any::<i64>().prop_map(MetaValue::from),
                any::<String>().prop_map(MetaValue::from),
            ]
        }

        fn arb_metadata() -> impl Strategy<Value = Metadata> {
            prop::collection::btree_map(
                "[a-z_]{1,12}".prop_filter("reserved key", |k| k != URL_KEY),
                arb_meta_value(),
                0..8,
            )
        }

        proptest! {
            /// decode(encode(url, metadata)) returns exactly what went in
            #[test]
            fn prop_encode_decode_roundtrip(
                destination in any::<String>(),
                metadata in arb_metadata(),
            ) {
                let codec = codec();
                let token = codec.encode(&destination, &metadata).unwrap();
                let decoded = codec.decode(&token.payload, &token.signature).unwrap();
                prop_assert_eq!(decoded.destination_url, destination);
                prop_assert_eq!(decoded.metadata, metadata);
            }

            /// Flipping any single bit of the body or signature is rejected
            #[test]
            fn prop_bit_flip_is_rejected(
                destination in "https://[a-z]{1,12}\\.com/[a-z0-9/]{0,20}",
                metadata in arb_metadata(),
                in_signature in any::<bool>(),
                position in any::<prop::sample::Index>(),
                bit in 0u8..7,
            ) {
                let codec = codec();
                let token = codec.encode(&destination, &metadata).unwrap();

                let (mut payload, mut signature) = (token.payload, token.signature);
                let target = if in_signature { &mut signature } else { &mut payload };
                let mut bytes = std::mem::take(target).into_bytes();
                let idx = position.index(bytes.len());
                bytes[idx] ^= 1 << bit;
                *target = String::from_utf8(bytes).unwrap();

                prop_assert_eq!(
                    codec.decode(&payload, &signature),
                    Err(TokenError::InvalidSignature)
                );
            }
        }
    }
}
