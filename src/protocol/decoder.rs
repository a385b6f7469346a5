//! Payload parsing.
//!
//! Each variant reader consumes the payload field by field. A short read
//! fails with the name of the field that could not be read; bytes left over
//! after the last field are ignored.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use super::message::{
    Ack, AckStatus, Capabilities, CustomData, CustomType, DataType, DeviceStatus, DeviceType,
    Fragment, Item, Message, MessageType, Reading, Registration, RelayedMessage, SensorCommand,
    SensorConfig, SensorData, SensorDataMulti, SensorHeartbeat, TimeSync,
};
use crate::error::{ProtocolError, Result};

/// Field reader over a payload slice.
struct FieldReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> FieldReader<'a> {
    fn new(payload: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(payload),
        }
    }

    fn u8(&mut self, field: &str) -> Result<u8> {
        self.cursor
            .read_u8()
            .map_err(|_| ProtocolError::decoding(field).into())
    }

    fn u16(&mut self, field: &str) -> Result<u16> {
        self.cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| ProtocolError::decoding(field).into())
    }

    fn u32(&mut self, field: &str) -> Result<u32> {
        self.cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| ProtocolError::decoding(field).into())
    }

    fn f32(&mut self, field: &str) -> Result<f32> {
        self.cursor
            .read_f32::<LittleEndian>()
            .map_err(|_| ProtocolError::decoding(field).into())
    }

    fn bytes(&mut self, len: usize, field: &str) -> Result<Vec<u8>> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(ProtocolError::decoding(field).into());
        }
        let mut buf = vec![0u8; len];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| ProtocolError::decoding(field))?;
        Ok(buf)
    }

    fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }

    fn items(&mut self, count_field: &str) -> Result<Vec<Item>> {
        let count = self.u8(count_field)?;
        let mut items = Vec::with_capacity(usize::from(count));
        for i in 0..count {
            let key = self.u8(&format!("key of item {i}"))?;
            let len = self.u8(&format!("length of item {i}"))?;
            let value = self.bytes(usize::from(len), &format!("value of item {i}"))?;
            items.push(Item { key, value });
        }
        Ok(items)
    }

    fn reading(&mut self, suffix: &str) -> Result<Reading> {
        let data_type = DataType(self.u8(&format!("data type{suffix}"))?);
        let count = self.u8(&format!("values count{suffix}"))?;
        let mut values = Vec::with_capacity(usize::from(count));
        for i in 0..count {
            values.push(self.f32(&format!("value {i}{suffix}"))?);
        }
        Ok(Reading { data_type, values })
    }
}

/// Parse a payload as the given message type.
pub fn decode_payload(msg_type: MessageType, payload: &[u8]) -> Result<Message> {
    let mut r = FieldReader::new(payload);

    let message = match msg_type {
        MessageType::Command => Message::Command(SensorCommand {
            sensor_id: r.u8("sensor ID")?,
            timestamp: r.u32("timestamp")?,
            command: r.u8("command")?,
        }),
        MessageType::Config => Message::Config(SensorConfig {
            sensor_id: r.u8("sensor ID")?,
            timestamp: r.u32("timestamp")?,
            items: r.items("config items count")?,
        }),
        MessageType::Heartbeat => Message::Heartbeat(SensorHeartbeat {
            sensor_id: r.u8("sensor ID")?,
            timestamp: r.u32("timestamp")?,
            battery: r.u8("battery level")?,
            status: DeviceStatus(r.u8("status")?),
        }),
        MessageType::SensorData => Message::SensorData(SensorData {
            sensor_id: r.u8("sensor ID")?,
            timestamp: r.u32("timestamp")?,
            reading: r.reading("")?,
        }),
        MessageType::CustomData => Message::CustomData(CustomData {
            sensor_id: r.u8("sensor ID")?,
            timestamp: r.u32("timestamp")?,
            data_type: CustomType(r.u8("custom data type")?),
            items: r.items("custom items count")?,
        }),
        MessageType::TimeSync => Message::TimeSync(TimeSync {
            sensor_id: r.u8("sensor ID")?,
            server_time: r.u32("server time")?,
            sensor_time: r.u32("sensor time")?,
        }),
        MessageType::Ack => Message::Ack(Ack {
            sensor_id: r.u8("sensor ID")?,
            message_id: r.u16("message ID")?,
            status: AckStatus(r.u8("status")?),
        }),
        MessageType::Registration => Message::Registration(Registration {
            sensor_id: r.u8("sensor ID")?,
            device_type: DeviceType(r.u8("device type")?),
            capabilities: Capabilities::new(r.u8("capabilities")?),
            fw_version: r.u16("firmware version")?,
        }),
        MessageType::Fragment => {
            let message_id = r.u16("message ID")?;
            let fragment_num = r.u8("fragment number")?;
            let total_fragments = r.u8("total fragments")?;
            let len = r.u16("fragment data length")?;
            Message::Fragment(Fragment {
                message_id,
                fragment_num,
                total_fragments,
                data: r.bytes(usize::from(len), "fragment data")?,
            })
        }
        MessageType::Relayed => {
            let relay_id = r.u8("relay ID")?;
            let len = r.u16("relayed data length")?;
            Message::Relayed(RelayedMessage {
                relay_id,
                original_data: r.bytes(usize::from(len), "relayed data")?,
            })
        }
        MessageType::SensorDataMulti => {
            let sensor_id = r.u8("sensor ID")?;
            let timestamp = r.u32("timestamp")?;
            let count = r.u8("dataset count")?;
            let mut readings = Vec::with_capacity(usize::from(count));
            for i in 0..count {
                readings.push(r.reading(&format!(" of dataset {i}"))?);
            }
            Message::SensorDataMulti(SensorDataMulti {
                sensor_id,
                timestamp,
                readings,
            })
        }
    };

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::encoder::encode_payload;

    fn field_of(result: Result<Message>) -> String {
        match result {
            Err(Error::Protocol(ProtocolError::DecodingFailed { field })) => field,
            other => panic!("expected decoding failure, got {other:?}"),
        }
    }

    #[test]
    fn test_sensor_data() {
        let payload = hex::decode("01393000000103 9a99993f 9a995940 3333b340".replace(' ', ""))
            .unwrap();
        let msg = decode_payload(MessageType::SensorData, &payload).unwrap();

        match msg {
            Message::SensorData(data) => {
                assert_eq!(data.sensor_id, 1);
                assert_eq!(data.timestamp, 12345);
                assert_eq!(data.reading.data_type, DataType::ACCELEROMETER);
                assert_eq!(data.reading.values, vec![1.2f32, 3.4, 5.6]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_every_type_decodes_its_own_encoding() {
        let messages: Vec<Message> = vec![
            SensorCommand {
                sensor_id: 3,
                timestamp: 99,
                command: 0x10,
            }
            .into(),
            SensorConfig {
                sensor_id: 3,
                timestamp: 100,
                items: vec![Item::new(0x01u8, vec![0x64, 0x00])],
            }
            .into(),
            SensorHeartbeat {
                sensor_id: 3,
                timestamp: 101,
                battery: 87,
                status: DeviceStatus::LOW_BATTERY,
            }
            .into(),
            CustomData {
                sensor_id: 3,
                timestamp: 102,
                data_type: CustomType::STRING,
                items: vec![Item::new(0x00u8, b"hello".to_vec()), Item::new(0x01u8, vec![])],
            }
            .into(),
            TimeSync {
                sensor_id: 3,
                server_time: 1000,
                sensor_time: 990,
            }
            .into(),
            Fragment {
                message_id: 0xBEEF,
                fragment_num: 1,
                total_fragments: 2,
                data: vec![1, 2, 3],
            }
            .into(),
            RelayedMessage {
                relay_id: 9,
                original_data: vec![0x4B, 0x4E, 0, 1, 7, 0],
            }
            .into(),
            SensorDataMulti {
                sensor_id: 3,
                timestamp: 103,
                readings: vec![
                    Reading::new(DataType::GYROSCOPE, vec![0.5, -0.25, 0.0]),
                    Reading::new(DataType::QUATERNION, vec![1.0, 0.0, 0.0, 0.0]),
                    Reading::new(DataType::EULER_ANGLES, vec![]),
                ],
            }
            .into(),
        ];

        for msg in messages {
            let payload = encode_payload(&msg).unwrap();
            let decoded = decode_payload(msg.message_type(), &payload).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn test_short_read_names_field() {
        assert_eq!(field_of(decode_payload(MessageType::Heartbeat, &[])), "sensor ID");
        assert_eq!(
            field_of(decode_payload(MessageType::Heartbeat, &[1, 0, 0])),
            "timestamp"
        );
        assert_eq!(
            field_of(decode_payload(MessageType::Ack, &[1, 0, 0])),
            "status"
        );
        assert_eq!(
            field_of(decode_payload(MessageType::SensorData, &[1, 0, 0, 0, 0, 1, 2, 0, 0, 0, 0])),
            "value 1"
        );
    }

    #[test]
    fn test_multi_short_read_names_dataset() {
        // Two datasets declared, the second is cut after its type byte.
        let payload = [1, 0, 0, 0, 0, 2, 0x01, 0, 0x02];
        assert_eq!(
            field_of(decode_payload(MessageType::SensorDataMulti, &payload)),
            "values count of dataset 1"
        );
    }

    #[test]
    fn test_inner_length_exceeding_payload() {
        // Relayed data length says 16 bytes, only 2 follow.
        let payload = [7, 16, 0, 0xAA, 0xBB];
        assert_eq!(
            field_of(decode_payload(MessageType::Relayed, &payload)),
            "relayed data"
        );

        let payload = [0, 0, 0, 1, 0xFF, 0xFF, 1];
        assert_eq!(
            field_of(decode_payload(MessageType::Fragment, &payload)),
            "fragment data"
        );
    }

    #[test]
    fn test_item_value_cut_short() {
        let payload = [1, 0, 0, 0, 0, 1, 0x02, 4, 0xAA];
        assert_eq!(
            field_of(decode_payload(MessageType::Config, &payload)),
            "value of item 0"
        );
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let payload = [5, 0x01, 0x00, 0x01, 0xDE, 0xAD];
        let msg = decode_payload(MessageType::Ack, &payload).unwrap();
        assert_eq!(
            msg,
            Message::Ack(Ack {
                sensor_id: 5,
                message_id: 1,
                status: AckStatus::OK,
            })
        );
    }
}
