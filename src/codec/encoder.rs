//! Message to frame encoding

use bincode::Options;
use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::codec::wire_options;
use crate::error::ProtocolError;
use crate::protocol::Message;

/// Encode a message into a wire frame
pub fn encode(message: &Message) -> Result<Bytes, ProtocolError> {
    let mut frame = BytesMut::with_capacity(64).writer();
    frame.get_mut().put_u8(message.opcode().as_byte());

    match message {
        Message::Announce(m) => write_payload(&mut frame, m)?,
        Message::DeviceStatus(m) => write_payload(&mut frame, m)?,
        Message::StreamData(m) => write_payload(&mut frame, m)?,
        Message::PeerOnline(m) => write_payload(&mut frame, m)?,
        Message::PeerOffline(m) => write_payload(&mut frame, m)?,
        Message::WriteRequest(m) => write_payload(&mut frame, m)?,
    }

    Ok(frame.into_inner().freeze())
}

fn write_payload<T: Serialize>(
    frame: &mut bytes::buf::Writer<BytesMut>,
    payload: &T,
) -> Result<(), ProtocolError> {
    wire_options()
        .serialize_into(frame, payload)
        .map_err(|e| ProtocolError::Encode(e.to_string()))
}
