// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Payload Codecs
//!
//! A codec turns a typed value into the opaque body of an AMQP message and
//! back, and names the content type it produces. Codecs are supplied at
//! publish and subscribe time, so the dispatch loop never knows the wire
//! format of the messages it routes.

use crate::errors::CodecError;
use serde::{de::DeserializeOwned, Serialize};

/// Content type produced by [`JsonCodec`]
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type produced by [`BincodeCodec`]
pub const BINCODE_CONTENT_TYPE: &str = "application/x-bincode";

/// Converts values of any serde type to and from a byte payload.
pub trait Codec: Send + Sync {
    /// The content type stamped on every envelope this codec encodes.
    fn content_type(&self) -> &'static str;

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|err| CodecError::Encode {
            content_type: JSON_CONTENT_TYPE,
            reason: err.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(payload).map_err(|err| CodecError::Decode {
            content_type: JSON_CONTENT_TYPE,
            reason: err.to_string(),
        })
    }
}

/// Compact binary codec backed by `bincode`.
///
/// Both ends must agree on the exact Rust type: the format carries no field
/// names.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn content_type(&self) -> &'static str {
        BINCODE_CONTENT_TYPE
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(value).map_err(|err| CodecError::Encode {
            content_type: BINCODE_CONTENT_TYPE,
            reason: err.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(payload).map_err(|err| CodecError::Decode {
            content_type: BINCODE_CONTENT_TYPE,
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: String,
        item: String,
        price: f64,
        tags: Vec<String>,
        notes: Option<String>,
    }

    fn order() -> Order {
        Order {
            id: "ORD-1".to_owned(),
            item: "Widget".to_owned(),
            price: 9.99,
            tags: vec!["us".to_owned(), "urgent".to_owned()],
            notes: None,
        }
    }

    #[test]
    fn json_round_trip_preserves_value() {
        let codec = JsonCodec;
        let payload = codec.encode(&order()).unwrap();
        let decoded: Order = codec.decode(&payload).unwrap();
        assert_eq!(decoded, order());
    }

    #[test]
    fn bincode_round_trip_preserves_value() {
        let codec = BincodeCodec;
        let mut stock = BTreeMap::new();
        stock.insert("widget".to_owned(), 3u32);
        stock.insert("gadget".to_owned(), 0u32);

        let payload = codec.encode(&(order(), stock.clone())).unwrap();
        let (decoded, decoded_stock): (Order, BTreeMap<String, u32>) =
            codec.decode(&payload).unwrap();

        assert_eq!(decoded, order());
        assert_eq!(decoded_stock, stock);
    }

    #[test]
    fn json_payload_is_plain_json() {
        let payload = JsonCodec.encode(&order()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["id"], "ORD-1");
        assert_eq!(value["price"], 9.99);
    }

    #[test]
    fn malformed_payloads_fail_to_decode() {
        let json: Result<Order, _> = JsonCodec.decode(b"{\"id\": 1");
        assert!(matches!(
            json,
            Err(CodecError::Decode {
                content_type: JSON_CONTENT_TYPE,
                ..
            })
        ));

        let binary: Result<Order, _> = BincodeCodec.decode(&[0xff, 0x01]);
        assert!(matches!(
            binary,
            Err(CodecError::Decode {
                content_type: BINCODE_CONTENT_TYPE,
                ..
            })
        ));
    }

    #[test]
    fn json_encode_fails_for_non_string_map_keys() {
        let mut map = BTreeMap::new();
        map.insert((1u8, 2u8), "pair");
        assert!(matches!(
            JsonCodec.encode(&map),
            Err(CodecError::Encode { .. })
        ));
    }

    #[test]
    fn codecs_report_their_content_type() {
        assert_eq!(JsonCodec.content_type(), "application/json");
        assert_eq!(BincodeCodec.content_type(), "application/x-bincode");
    }
}
