//! Frame to message decoding

use bincode::Options;
use serde::de::DeserializeOwned;

use crate::codec::wire_options;
use crate::error::ProtocolError;
use crate::protocol::{Message, Opcode};

/// Decode a wire frame. An empty frame carries no message.
pub fn decode(frame: &[u8]) -> Result<Option<Message>, ProtocolError> {
    let Some((&first, payload)) = frame.split_first() else {
        return Ok(None);
    };

    let opcode = Opcode::from_byte(first)?;
    let message = match opcode {
        Opcode::Announce => Message::Announce(read_payload(opcode, payload)?),
        Opcode::DeviceStatus => Message::DeviceStatus(read_payload(opcode, payload)?),
        Opcode::StreamData => Message::StreamData(read_payload(opcode, payload)?),
        Opcode::PeerOnline => Message::PeerOnline(read_payload(opcode, payload)?),
        Opcode::PeerOffline => Message::PeerOffline(read_payload(opcode, payload)?),
        Opcode::WriteRequest => Message::WriteRequest(read_payload(opcode, payload)?),
    };

    Ok(Some(message))
}

fn read_payload<T: DeserializeOwned>(opcode: Opcode, payload: &[u8]) -> Result<T, ProtocolError> {
    wire_options()
        .deserialize(payload)
        .map_err(|e| ProtocolError::MalformedPayload {
            opcode,
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::protocol::*;
    use bytes::Bytes;
    use proptest::prelude::*;

    fn every_variant() -> Vec<Message> {
        vec![
            Message::Announce(Announce::new("device-a")),
            Message::Announce(Announce {
                service_number: SERVICE_NUMBER,
                device_name: "device-b".into(),
                return_address: Some("192.168.1.20:19416".into()),
            }),
            Message::DeviceStatus(DeviceStatus {
                device_id: "device-a".into(),
                allowed: false,
            }),
            Message::StreamData(StreamData {
                samples_left: vec![0.25, -0.5, 1.0],
                samples_right: vec![0.0, 0.125, -1.0],
                next_at: 1_700_000_000_123_456_789,
            }),
            Message::PeerOnline(PeerOnline {
                device_id: "device-a".into(),
            }),
            Message::PeerOffline(PeerOffline {
                device_id: "device-a".into(),
            }),
            Message::WriteRequest(WriteRequest::broadcast(Bytes::from_static(&[0x10, 1, 2]))),
        ]
    }

    #[test]
    fn test_roundtrip_every_variant() {
        for message in every_variant() {
            let frame = encode(&message).unwrap();
            assert_eq!(decode(&frame).unwrap(), Some(message));
        }
    }

    #[test]
    fn test_empty_frame_is_no_message() {
        assert_eq!(decode(&[]), Ok(None));
    }

    #[test]
    fn test_unknown_opcode() {
        assert_eq!(decode(&[0x11, 0, 0]), Err(ProtocolError::UnknownOpcode(0x11)));
        assert_eq!(decode(&[0x7F]), Err(ProtocolError::UnknownOpcode(0x7F)));
    }

    #[test]
    fn test_truncated_payload() {
        let frame = encode(&Message::Announce(Announce::new("device-a"))).unwrap();
        let result = decode(&frame[..frame.len() - 3]);
        assert!(matches!(
            result,
            Err(ProtocolError::MalformedPayload {
                opcode: Opcode::Announce,
                ..
            })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut frame = encode(&Message::PeerOnline(PeerOnline {
            device_id: "x".into(),
        }))
        .unwrap()
        .to_vec();
        frame.push(0xAA);

        assert!(matches!(
            decode(&frame),
            Err(ProtocolError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_absurd_length_prefix_rejected() {
        // StreamData claiming u64::MAX left samples
        let frame = [0x20, 253, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        assert!(matches!(
            decode(&frame),
            Err(ProtocolError::MalformedPayload { .. })
        ));
    }

    fn arb_message() -> impl Strategy<Value = Message> {
        let name = "[a-z0-9-]{0,24}";
        prop_oneof![
            (any::<u32>(), name, proptest::option::of("[0-9.:]{0,21}")).prop_map(
                |(service_number, device_name, return_address)| {
                    Message::Announce(Announce {
                        service_number,
                        device_name,
                        return_address,
                    })
                }
            ),
            (name, any::<bool>()).prop_map(|(device_id, allowed)| {
                Message::DeviceStatus(DeviceStatus { device_id, allowed })
            }),
            (
                proptest::collection::vec(-1.0f64..1.0, 0..64),
                proptest::collection::vec(-1.0f64..1.0, 0..64),
                any::<i64>()
            )
                .prop_map(|(samples_left, samples_right, next_at)| {
                    Message::StreamData(StreamData {
                        samples_left,
                        samples_right,
                        next_at,
                    })
                }),
            name.prop_map(|device_id| Message::PeerOnline(PeerOnline { device_id })),
            name.prop_map(|device_id| Message::PeerOffline(PeerOffline { device_id })),
            (name, proptest::collection::vec(any::<u8>(), 0..128)).prop_map(
                |(target, payload)| {
                    Message::WriteRequest(WriteRequest {
                        target,
                        payload: Bytes::from(payload),
                    })
                }
            ),
        ]
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(message in arb_message()) {
            let frame = encode(&message).unwrap();
            prop_assert_eq!(decode(&frame).unwrap(), Some(message));
        }

        #[test]
        fn prop_decode_never_panics(frame in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode(&frame);
        }
    }
}
