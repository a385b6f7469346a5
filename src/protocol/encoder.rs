//! Payload serialization.
//!
//! Layouts are little-endian, counts precede the repeated data they count.

use bytes::BufMut;

use super::message::{
    Ack, CustomData, Fragment, Item, Message, Reading, Registration, RelayedMessage,
    SensorCommand, SensorConfig, SensorData, SensorDataMulti, SensorHeartbeat, TimeSync,
};
use super::MAX_PAYLOAD_SIZE;
use crate::error::{ProtocolError, Result};

/// Serialize a message's fields into a payload.
pub fn encode_payload(message: &Message) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(32);

    match message {
        Message::Command(m) => encode_command(&mut buf, m),
        Message::Config(m) => encode_config(&mut buf, m)?,
        Message::Heartbeat(m) => encode_heartbeat(&mut buf, m),
        Message::SensorData(m) => encode_sensor_data(&mut buf, m)?,
        Message::CustomData(m) => encode_custom_data(&mut buf, m)?,
        Message::TimeSync(m) => encode_time_sync(&mut buf, m),
        Message::Ack(m) => encode_ack(&mut buf, m),
        Message::Registration(m) => encode_registration(&mut buf, m),
        Message::Fragment(m) => encode_fragment(&mut buf, m)?,
        Message::Relayed(m) => encode_relayed(&mut buf, m)?,
        Message::SensorDataMulti(m) => encode_sensor_data_multi(&mut buf, m)?,
    }

    if buf.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: buf.len(),
            max: MAX_PAYLOAD_SIZE,
        }
        .into());
    }

    Ok(buf)
}

fn count_u8(len: usize, field: &str) -> Result<u8> {
    u8::try_from(len)
        .map_err(|_| ProtocolError::encoding(field, format!("{len} exceeds 255")).into())
}

fn count_u16(len: usize, field: &str) -> Result<u16> {
    u16::try_from(len)
        .map_err(|_| ProtocolError::encoding(field, format!("{len} exceeds 65535")).into())
}

fn put_items(buf: &mut Vec<u8>, items: &[Item], field: &str) -> Result<()> {
    buf.put_u8(count_u8(items.len(), field)?);
    for item in items {
        buf.put_u8(item.key);
        buf.put_u8(count_u8(item.len(), "item length")?);
        buf.put_slice(&item.value);
    }
    Ok(())
}

fn put_reading(buf: &mut Vec<u8>, reading: &Reading, field: &str) -> Result<()> {
    buf.put_u8(reading.data_type.0);
    buf.put_u8(count_u8(reading.values.len(), field)?);
    for value in &reading.values {
        buf.put_f32_le(*value);
    }
    Ok(())
}

fn encode_command(buf: &mut Vec<u8>, m: &SensorCommand) {
    buf.put_u8(m.sensor_id);
    buf.put_u32_le(m.timestamp);
    buf.put_u8(m.command);
}

fn encode_config(buf: &mut Vec<u8>, m: &SensorConfig) -> Result<()> {
    buf.put_u8(m.sensor_id);
    buf.put_u32_le(m.timestamp);
    put_items(buf, &m.items, "config items count")
}

fn encode_heartbeat(buf: &mut Vec<u8>, m: &SensorHeartbeat) {
    buf.put_u8(m.sensor_id);
    buf.put_u32_le(m.timestamp);
    buf.put_u8(m.battery);
    buf.put_u8(m.status.0);
}

fn encode_sensor_data(buf: &mut Vec<u8>, m: &SensorData) -> Result<()> {
    buf.put_u8(m.sensor_id);
    buf.put_u32_le(m.timestamp);
    put_reading(buf, &m.reading, "values count")
}

fn encode_custom_data(buf: &mut Vec<u8>, m: &CustomData) -> Result<()> {
    buf.put_u8(m.sensor_id);
    buf.put_u32_le(m.timestamp);
    buf.put_u8(m.data_type.0);
    put_items(buf, &m.items, "custom items count")
}

fn encode_time_sync(buf: &mut Vec<u8>, m: &TimeSync) {
    buf.put_u8(m.sensor_id);
    buf.put_u32_le(m.server_time);
    buf.put_u32_le(m.sensor_time);
}

fn encode_ack(buf: &mut Vec<u8>, m: &Ack) {
    buf.put_u8(m.sensor_id);
    buf.put_u16_le(m.message_id);
    buf.put_u8(m.status.0);
}

fn encode_registration(buf: &mut Vec<u8>, m: &Registration) {
    buf.put_u8(m.sensor_id);
    buf.put_u8(m.device_type.0);
    buf.put_u8(m.capabilities.bits());
    buf.put_u16_le(m.fw_version);
}

fn encode_fragment(buf: &mut Vec<u8>, m: &Fragment) -> Result<()> {
    buf.put_u16_le(m.message_id);
    buf.put_u8(m.fragment_num);
    buf.put_u8(m.total_fragments);
    buf.put_u16_le(count_u16(m.data.len(), "fragment data length")?);
    buf.put_slice(&m.data);
    Ok(())
}

fn encode_relayed(buf: &mut Vec<u8>, m: &RelayedMessage) -> Result<()> {
    buf.put_u8(m.relay_id);
    buf.put_u16_le(count_u16(m.original_data.len(), "relayed data length")?);
    buf.put_slice(&m.original_data);
    Ok(())
}

fn encode_sensor_data_multi(buf: &mut Vec<u8>, m: &SensorDataMulti) -> Result<()> {
    buf.put_u8(m.sensor_id);
    buf.put_u32_le(m.timestamp);
    buf.put_u8(count_u8(m.readings.len(), "dataset count")?);
    for (i, reading) in m.readings.iter().enumerate() {
        put_reading(buf, reading, &format!("values count of dataset {i}"))?;
    }
    Ok(())
}
