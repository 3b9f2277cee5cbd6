//! Wire protocol: typed control messages, the binary DATA frame, and the
//! QR bootstrap payload.
//!
//! Control frames are UTF-8 JSON with a shared envelope `{v, type, sid, seq}`.
//! Encrypted payloads travel as a compact binary frame instead; the legacy
//! JSON DATA form is still accepted on receive. A frame's first byte selects
//! the decoder: 0x01 for binary, `{` for JSON, anything else is dropped.

use crate::config::{MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
use crate::crypto::{AEAD_TAG_LENGTH, NONCE_LENGTH};
use crate::error::ProtocolError;
use crate::types::{
    Base64Ciphertext, Base64Nonce, Base64Proof, Base64PublicKey, NetworkAddress, SequenceNumber,
    SessionId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// First byte of a binary DATA frame.
pub const DATA_FRAME_TAG: u8 = 0x01;
/// Tag + big-endian seq + nonce.
pub const DATA_FRAME_HEADER_LEN: usize = 1 + 4 + NONCE_LENGTH;

/// Shared control-frame envelope plus the type-specific body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlFrame {
    pub v: u8,
    #[serde(flatten)]
    pub body: MessageBody,
    pub sid: SessionId,
    pub seq: SequenceNumber,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageBody {
    #[serde(rename = "HELLO")]
    Hello {
        pk: Base64PublicKey,
        #[serde(rename = "deviceName")]
        device_name: String,
    },
    #[serde(rename = "CHALLENGE")]
    Challenge { nonce: Base64Nonce, pk: Base64PublicKey },
    #[serde(rename = "AUTH")]
    Auth { proof: Base64Proof },
    #[serde(rename = "ACCEPT")]
    Accept,
    #[serde(rename = "REJECT")]
    Reject {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename = "ACK")]
    Ack {
        #[serde(rename = "ackSeq")]
        ack_seq: SequenceNumber,
    },
    #[serde(rename = "CLOSE")]
    Close,
    /// Legacy JSON form of an encrypted payload. Accepted on receive only;
    /// outbound data always uses the binary frame.
    #[serde(rename = "DATA")]
    Data { nonce: Base64Nonce, ciphertext: Base64Ciphertext },
}

impl MessageBody {
    pub fn type_name(&self) -> &'static str {
        match self {
            MessageBody::Hello { .. } => "HELLO",
            MessageBody::Challenge { .. } => "CHALLENGE",
            MessageBody::Auth { .. } => "AUTH",
            MessageBody::Accept => "ACCEPT",
            MessageBody::Reject { .. } => "REJECT",
            MessageBody::Ack { .. } => "ACK",
            MessageBody::Close => "CLOSE",
            MessageBody::Data { .. } => "DATA",
        }
    }
}

pub fn encode_control(frame: &ControlFrame) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(frame).map_err(|_| ProtocolError::MalformedMessage)
}

/// Decode and validate a JSON control frame.
///
/// Validation is staged so callers can tell a version mismatch from an
/// unknown type from a missing field.
pub fn decode_control(bytes: &[u8]) -> Result<ControlFrame, ProtocolError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|_| ProtocolError::MalformedMessage)?;
    let obj = value.as_object().ok_or(ProtocolError::MalformedMessage)?;

    let v = field_u64(obj, "v")?;
    if v != u64::from(PROTOCOL_VERSION) {
        return Err(ProtocolError::UnsupportedProtocolVersion(v));
    }

    let msg_type = field_str(obj, "type")?;
    let sid = SessionId::new_unchecked(field_str(obj, "sid")?.to_string());
    let seq = SequenceNumber::new(field_u32(obj, "seq")?);

    let body = match msg_type {
        "HELLO" => MessageBody::Hello {
            pk: Base64PublicKey::from_encoded(field_str(obj, "pk")?),
            device_name: field_str(obj, "deviceName")?.to_string(),
        },
        "CHALLENGE" => MessageBody::Challenge {
            nonce: Base64Nonce::from_encoded(field_str(obj, "nonce")?),
            pk: Base64PublicKey::from_encoded(field_str(obj, "pk")?),
        },
        "AUTH" => MessageBody::Auth { proof: Base64Proof::from_encoded(field_str(obj, "proof")?) },
        "ACCEPT" => MessageBody::Accept,
        "REJECT" => MessageBody::Reject {
            reason: match obj.get("reason") {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => Some(s.clone()),
                Some(_) => return Err(ProtocolError::MalformedMessage),
            },
        },
        "ACK" => MessageBody::Ack { ack_seq: SequenceNumber::new(field_u32(obj, "ackSeq")?) },
        "CLOSE" => MessageBody::Close,
        "DATA" => MessageBody::Data {
            nonce: Base64Nonce::from_encoded(field_str(obj, "nonce")?),
            ciphertext: Base64Ciphertext::from_encoded(field_str(obj, "ciphertext")?),
        },
        other => return Err(ProtocolError::UnknownMessageType(other.to_string())),
    };

    Ok(ControlFrame { v: PROTOCOL_VERSION, body, sid, seq })
}

fn field_str<'a>(
    obj: &'a serde_json::Map<String, Value>,
    name: &'static str,
) -> Result<&'a str, ProtocolError> {
    match obj.get(name) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ProtocolError::MalformedMessage),
        None => Err(ProtocolError::MissingField(name)),
    }
}

fn field_u64(
    obj: &serde_json::Map<String, Value>,
    name: &'static str,
) -> Result<u64, ProtocolError> {
    match obj.get(name) {
        Some(value) => value.as_u64().ok_or(ProtocolError::MalformedMessage),
        None => Err(ProtocolError::MissingField(name)),
    }
}

fn field_u32(
    obj: &serde_json::Map<String, Value>,
    name: &'static str,
) -> Result<u32, ProtocolError> {
    let raw = field_u64(obj, name)?;
    u32::try_from(raw).map_err(|_| ProtocolError::MalformedMessage)
}

/// Compact on-wire form of an encrypted payload.
///
/// ```text
/// offset 0:  1 byte  0x01
/// offset 1:  4 bytes seq, big-endian
/// offset 5:  24 bytes nonce
/// offset 29: ciphertext (>= 16 bytes)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub seq: SequenceNumber,
    pub nonce: [u8; NONCE_LENGTH],
    pub ciphertext: Vec<u8>,
}

impl DataFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DATA_FRAME_HEADER_LEN + self.ciphertext.len());
        out.push(DATA_FRAME_TAG);
        out.extend_from_slice(&self.seq.get().to_be_bytes());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::FrameTooLarge);
        }
        if bytes.len() < DATA_FRAME_HEADER_LEN + AEAD_TAG_LENGTH {
            return Err(ProtocolError::FrameTooShort);
        }
        if bytes[0] != DATA_FRAME_TAG {
            return Err(ProtocolError::MalformedMessage);
        }
        let seq = u32::from_be_bytes(bytes[1..5].try_into().expect("4-byte slice"));
        let mut nonce = [0u8; NONCE_LENGTH];
        nonce.copy_from_slice(&bytes[5..DATA_FRAME_HEADER_LEN]);
        Ok(Self {
            seq: SequenceNumber::new(seq),
            nonce,
            ciphertext: bytes[DATA_FRAME_HEADER_LEN..].to_vec(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Binary,
    Json,
}

/// First-byte frame discrimination. `None` means the frame must be dropped.
pub fn classify_frame(bytes: &[u8]) -> Option<FrameKind> {
    match bytes.first()? {
        &DATA_FRAME_TAG => Some(FrameKind::Binary),
        b'{' => Some(FrameKind::Json),
        _ => None,
    }
}

/// Bootstrap payload rendered into the QR code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrPayload {
    pub v: u8,
    pub sid: SessionId,
    pub addr: NetworkAddress,
    pub pk: Base64PublicKey,
    /// Validity window in seconds.
    pub exp: u64,
}

impl QrPayload {
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("qr payload serializes")
    }

    pub fn decode(input: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(input).map_err(|_| ProtocolError::MalformedMessage)?;
        let obj = value.as_object().ok_or(ProtocolError::MalformedMessage)?;

        let v = field_u64(obj, "v")?;
        if v != u64::from(PROTOCOL_VERSION) {
            return Err(ProtocolError::UnsupportedProtocolVersion(v));
        }

        let sid = SessionId::new_unchecked(field_str(obj, "sid")?.to_string());
        let addr: NetworkAddress =
            field_str(obj, "addr")?.parse().map_err(|_| ProtocolError::MalformedMessage)?;
        let pk = Base64PublicKey::from_encoded(field_str(obj, "pk")?);
        let exp = field_u64(obj, "exp")?;
        if exp == 0 {
            return Err(ProtocolError::MalformedMessage);
        }

        Ok(Self { v: PROTOCOL_VERSION, sid, addr, pk, exp })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> SessionId {
        SessionId::parse("AB23CD").unwrap()
    }

    #[test]
    fn control_frame_roundtrip() {
        let frame = ControlFrame {
            v: PROTOCOL_VERSION,
            body: MessageBody::Hello {
                pk: Base64PublicKey::from_bytes(&[7u8; 32]),
                device_name: "Sender".to_string(),
            },
            sid: sid(),
            seq: SequenceNumber::new(1),
        };
        let bytes = encode_control(&frame).unwrap();
        assert_eq!(bytes[0], b'{');
        assert_eq!(decode_control(&bytes).unwrap(), frame);
    }

    #[test]
    fn decode_rejects_version_mismatch() {
        let bytes = br#"{"v":2,"type":"CLOSE","sid":"AB23CD","seq":1}"#;
        assert_eq!(
            decode_control(bytes).unwrap_err(),
            ProtocolError::UnsupportedProtocolVersion(2)
        );
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let bytes = br#"{"v":1,"type":"PING","sid":"AB23CD","seq":1}"#;
        assert_eq!(
            decode_control(bytes).unwrap_err(),
            ProtocolError::UnknownMessageType("PING".to_string())
        );
    }

    #[test]
    fn decode_reports_missing_fields() {
        let bytes = br#"{"v":1,"type":"HELLO","sid":"AB23CD","seq":1}"#;
        assert_eq!(decode_control(bytes).unwrap_err(), ProtocolError::MissingField("pk"));

        let bytes = br#"{"type":"CLOSE","sid":"AB23CD","seq":1}"#;
        assert_eq!(decode_control(bytes).unwrap_err(), ProtocolError::MissingField("v"));

        let bytes = br#"{"v":1,"type":"ACK","sid":"AB23CD","seq":1}"#;
        assert_eq!(decode_control(bytes).unwrap_err(), ProtocolError::MissingField("ackSeq"));
    }

    #[test]
    fn decode_rejects_wrong_field_types() {
        let bytes = br#"{"v":1,"type":"HELLO","sid":"AB23CD","seq":1,"pk":5,"deviceName":"x"}"#;
        assert_eq!(decode_control(bytes).unwrap_err(), ProtocolError::MalformedMessage);

        let bytes = br#"{"v":1,"type":"CLOSE","sid":"AB23CD","seq":"one"}"#;
        assert_eq!(decode_control(bytes).unwrap_err(), ProtocolError::MalformedMessage);
    }

    #[test]
    fn reject_reason_is_optional() {
        let bytes = br#"{"v":1,"type":"REJECT","sid":"AB23CD","seq":3}"#;
        let frame = decode_control(bytes).unwrap();
        assert_eq!(frame.body, MessageBody::Reject { reason: None });

        let bytes = br#"{"v":1,"type":"REJECT","sid":"AB23CD","seq":3,"reason":"no"}"#;
        let frame = decode_control(bytes).unwrap();
        assert_eq!(frame.body, MessageBody::Reject { reason: Some("no".to_string()) });
    }

    #[test]
    fn data_frame_layout() {
        let frame = DataFrame {
            seq: SequenceNumber::new(42),
            nonce: [0xAA; NONCE_LENGTH],
            ciphertext: vec![0x55; 5 + AEAD_TAG_LENGTH],
        };
        let bytes = frame.encode();
        assert_eq!(bytes.len(), 50);
        assert_eq!(bytes[0], 0x01);
        assert_eq!(&bytes[1..5], &[0x00, 0x00, 0x00, 0x2A]);
        assert_eq!(&bytes[5..29], &[0xAA; 24]);
        assert_eq!(DataFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn data_frame_rejects_short_input() {
        assert_eq!(
            DataFrame::decode(&[DATA_FRAME_TAG; 20]).unwrap_err(),
            ProtocolError::FrameTooShort
        );
    }

    #[test]
    fn frame_discrimination() {
        assert_eq!(classify_frame(&[0x01, 0, 0]), Some(FrameKind::Binary));
        assert_eq!(classify_frame(b"{}"), Some(FrameKind::Json));
        assert_eq!(classify_frame(&[0x02]), None);
        assert_eq!(classify_frame(&[]), None);
    }

    #[test]
    fn qr_payload_roundtrip() {
        let payload = QrPayload {
            v: PROTOCOL_VERSION,
            sid: sid(),
            addr: "192.168.1.10:4040".parse().unwrap(),
            pk: Base64PublicKey::from_bytes(&[1u8; 32]),
            exp: 10,
        };
        let encoded = payload.encode();
        assert_eq!(QrPayload::decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn qr_payload_rejects_invalid_fields() {
        let ok = r#"{"v":1,"sid":"AB23CD","addr":"192.168.1.10:4040","pk":"cGs","exp":10}"#;
        assert!(QrPayload::decode(ok).is_ok());

        for bad in [
            r#"{"sid":"AB23CD","addr":"192.168.1.10:4040","pk":"cGs","exp":10}"#,
            r#"{"v":2,"sid":"AB23CD","addr":"192.168.1.10:4040","pk":"cGs","exp":10}"#,
            r#"{"v":1,"addr":"192.168.1.10:4040","pk":"cGs","exp":10}"#,
            r#"{"v":1,"sid":"AB23CD","pk":"cGs","exp":10}"#,
            r#"{"v":1,"sid":"AB23CD","addr":"not-an-addr","pk":"cGs","exp":10}"#,
            r#"{"v":1,"sid":"AB23CD","addr":"192.168.1.10:4040","exp":10}"#,
            r#"{"v":1,"sid":"AB23CD","addr":"192.168.1.10:4040","pk":"cGs"}"#,
            r#"{"v":1,"sid":"AB23CD","addr":"192.168.1.10:4040","pk":"cGs","exp":0}"#,
        ] {
            assert!(QrPayload::decode(bad).is_err(), "accepted {bad}");
        }
    }
}
