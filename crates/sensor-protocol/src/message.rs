//! Typed command-channel messages.
//!
//! Each `Request` maps to one [`PacketKind`]; the server answers every request
//! with exactly one `Reply`.

use bytes::{BufMut, Bytes, BytesMut};

use sensor_core::{
    ClientId, EventType, Permission, SensorData, SensorInfo, SensorOption, SensorType,
};

use crate::packet::{Packet, PacketKind};
use crate::wire::{put_sensor_data, put_string, Reader};
use crate::{status, ProtocolError};

// ============================================================================
// Requests
// ============================================================================

/// Commands sent by a client over its command channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Obtain a process-wide client id.
    GetId { pid: i32, name: String },
    GetSensorList,
    /// Bind this connection to `sensor` on behalf of `client_id`.
    Hello {
        client_id: ClientId,
        sensor: SensorType,
    },
    /// Unbind and close the connection.
    ByeBye,
    Start,
    Stop,
    Reg { event_type: EventType },
    Unreg { event_type: EventType },
    SetOption { option: SensorOption },
    SetBatch { interval_us: u32, latency_us: u32 },
    UnsetBatch,
    GetData,
    SetAttributeInt { attribute: i32, value: i32 },
    SetAttributeStr { attribute: i32, value: Bytes },
    Flush,
}

impl Request {
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::GetId { .. } => PacketKind::GetId,
            Self::GetSensorList => PacketKind::GetSensorList,
            Self::Hello { .. } => PacketKind::Hello,
            Self::ByeBye => PacketKind::ByeBye,
            Self::Start => PacketKind::Start,
            Self::Stop => PacketKind::Stop,
            Self::Reg { .. } => PacketKind::Reg,
            Self::Unreg { .. } => PacketKind::Unreg,
            Self::SetOption { .. } => PacketKind::SetOption,
            Self::SetBatch { .. } => PacketKind::SetBatch,
            Self::UnsetBatch => PacketKind::UnsetBatch,
            Self::GetData => PacketKind::GetData,
            Self::SetAttributeInt { .. } => PacketKind::SetAttributeInt,
            Self::SetAttributeStr { .. } => PacketKind::SetAttributeStr,
            Self::Flush => PacketKind::Flush,
        }
    }

    pub fn encode(&self) -> Packet {
        let mut buf = BytesMut::new();
        match self {
            Self::GetId { pid, name } => {
                buf.put_i32_ne(*pid);
                put_string(&mut buf, name);
            }
            Self::Hello { client_id, sensor } => {
                buf.put_i32_ne(client_id.as_i32());
                buf.put_i32_ne(sensor.as_i32());
            }
            Self::Reg { event_type } | Self::Unreg { event_type } => {
                buf.put_u32_ne(event_type.raw());
            }
            Self::SetOption { option } => buf.put_i32_ne(option.as_i32()),
            Self::SetBatch {
                interval_us,
                latency_us,
            } => {
                buf.put_u32_ne(*interval_us);
                buf.put_u32_ne(*latency_us);
            }
            Self::SetAttributeInt { attribute, value } => {
                buf.put_i32_ne(*attribute);
                buf.put_i32_ne(*value);
            }
            Self::SetAttributeStr { attribute, value } => {
                buf.put_i32_ne(*attribute);
                buf.put_slice(value);
            }
            Self::GetSensorList
            | Self::ByeBye
            | Self::Start
            | Self::Stop
            | Self::UnsetBatch
            | Self::GetData
            | Self::Flush => {}
        }
        Packet::new(self.kind(), buf.freeze())
    }

    pub fn decode(packet: &Packet) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(&packet.payload);
        let request = match packet.kind {
            PacketKind::GetId => Self::GetId {
                pid: r.i32("get_id.pid")?,
                name: r.string("get_id.name")?,
            },
            PacketKind::GetSensorList => Self::GetSensorList,
            PacketKind::Hello => {
                let client_id = ClientId::new(r.i32("hello.client_id")?);
                let raw = r.i32("hello.sensor")?;
                let sensor = SensorType::from_i32(raw).ok_or(ProtocolError::InvalidValue {
                    field: "hello.sensor",
                    value: i64::from(raw),
                })?;
                Self::Hello { client_id, sensor }
            }
            PacketKind::ByeBye => Self::ByeBye,
            PacketKind::Start => Self::Start,
            PacketKind::Stop => Self::Stop,
            PacketKind::Reg => Self::Reg {
                event_type: EventType::from_raw(r.u32("reg.event_type")?),
            },
            PacketKind::Unreg => Self::Unreg {
                event_type: EventType::from_raw(r.u32("unreg.event_type")?),
            },
            PacketKind::SetOption => {
                let raw = r.i32("set_option.option")?;
                let option = SensorOption::from_i32(raw).ok_or(ProtocolError::InvalidValue {
                    field: "set_option.option",
                    value: i64::from(raw),
                })?;
                Self::SetOption { option }
            }
            PacketKind::SetBatch => Self::SetBatch {
                interval_us: r.u32("set_batch.interval")?,
                latency_us: r.u32("set_batch.latency")?,
            },
            PacketKind::UnsetBatch => Self::UnsetBatch,
            PacketKind::GetData => Self::GetData,
            PacketKind::SetAttributeInt => Self::SetAttributeInt {
                attribute: r.i32("set_attribute.attribute")?,
                value: r.i32("set_attribute.value")?,
            },
            PacketKind::SetAttributeStr => Self::SetAttributeStr {
                attribute: r.i32("set_attribute.attribute")?,
                value: r.rest(),
            },
            PacketKind::Flush => Self::Flush,
            other => {
                return Err(ProtocolError::UnexpectedPacket {
                    expected: PacketKind::Hello,
                    got: other,
                })
            }
        };
        Ok(request)
    }
}

// ============================================================================
// Replies
// ============================================================================

/// Replies sent by the server, one per request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Generic status: zero or positive on success, negative errno on failure.
    Done { value: i64 },
    GetIdDone { client_id: ClientId },
    GetDataDone { state: i64, data: SensorData },
    GetSensorListDone { sensors: Vec<SensorInfo> },
}

impl Reply {
    pub fn ok() -> Self {
        Self::Done { value: status::OK }
    }

    pub fn status(value: i64) -> Self {
        Self::Done { value }
    }

    pub fn kind(&self) -> PacketKind {
        match self {
            Self::Done { .. } => PacketKind::Done,
            Self::GetIdDone { .. } => PacketKind::GetIdDone,
            Self::GetDataDone { .. } => PacketKind::GetDataDone,
            Self::GetSensorListDone { .. } => PacketKind::GetSensorListDone,
        }
    }

    /// Status carried by this reply; dedicated replies always succeed.
    pub fn status_value(&self) -> i64 {
        match self {
            Self::Done { value } => *value,
            Self::GetDataDone { state, .. } => *state,
            Self::GetIdDone { .. } | Self::GetSensorListDone { .. } => status::OK,
        }
    }

    pub fn encode(&self) -> Packet {
        let mut buf = BytesMut::new();
        match self {
            Self::Done { value } => buf.put_i64_ne(*value),
            Self::GetIdDone { client_id } => buf.put_i32_ne(client_id.as_i32()),
            Self::GetDataDone { state, data } => {
                buf.put_i64_ne(*state);
                put_sensor_data(&mut buf, data);
            }
            Self::GetSensorListDone { sensors } => {
                let blobs: Vec<Bytes> = sensors.iter().map(encode_sensor_info).collect();
                buf.put_u32_ne(blobs.len() as u32);
                for blob in &blobs {
                    buf.put_u32_ne(blob.len() as u32);
                }
                for blob in &blobs {
                    buf.put_slice(blob);
                }
            }
        }
        Packet::new(self.kind(), buf.freeze())
    }

    pub fn decode(packet: &Packet) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(&packet.payload);
        let reply = match packet.kind {
            PacketKind::Done => Self::Done {
                value: r.i64("done.value")?,
            },
            PacketKind::GetIdDone => Self::GetIdDone {
                client_id: ClientId::new(r.i32("get_id_done.client_id")?),
            },
            PacketKind::GetDataDone => Self::GetDataDone {
                state: r.i64("get_data_done.state")?,
                data: r.sensor_data()?,
            },
            PacketKind::GetSensorListDone => {
                let count = r.u32("sensor_list.count")? as usize;
                let mut sizes = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    sizes.push(r.u32("sensor_list.size_table")? as usize);
                }
                let mut sensors = Vec::with_capacity(sizes.len());
                for size in sizes {
                    let blob = r.bytes(size, "sensor_list.blob")?;
                    // Unknown sensor types from a newer daemon are skipped.
                    if let Some(info) = decode_sensor_info(&blob)? {
                        sensors.push(info);
                    }
                }
                Self::GetSensorListDone { sensors }
            }
            other => {
                return Err(ProtocolError::UnexpectedPacket {
                    expected: PacketKind::Done,
                    got: other,
                })
            }
        };
        Ok(reply)
    }
}

fn encode_sensor_info(info: &SensorInfo) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i32_ne(info.sensor_type.as_i32());
    buf.put_u32_ne(info.permission.bits());
    buf.put_f32_ne(info.min_range);
    buf.put_f32_ne(info.max_range);
    buf.put_f32_ne(info.resolution);
    buf.put_u32_ne(info.min_interval_us);
    buf.put_u32_ne(info.max_batch_count);
    buf.put_u8(u8::from(info.wakeup_supported));
    buf.put_u32_ne(info.event_types.len() as u32);
    for event_type in &info.event_types {
        buf.put_u32_ne(event_type.raw());
    }
    put_string(&mut buf, &info.name);
    put_string(&mut buf, &info.vendor);
    buf.freeze()
}

fn decode_sensor_info(blob: &Bytes) -> Result<Option<SensorInfo>, ProtocolError> {
    let mut r = Reader::new(blob);
    let Some(sensor_type) = SensorType::from_i32(r.i32("sensor_info.type")?) else {
        return Ok(None);
    };
    let permission = Permission::from_bits(r.u32("sensor_info.permission")?);
    let min_range = r.f32("sensor_info.min_range")?;
    let max_range = r.f32("sensor_info.max_range")?;
    let resolution = r.f32("sensor_info.resolution")?;
    let min_interval_us = r.u32("sensor_info.min_interval")?;
    let max_batch_count = r.u32("sensor_info.max_batch_count")?;
    let wakeup_supported = r.u8("sensor_info.wakeup")? != 0;
    let event_count = r.u32("sensor_info.event_count")? as usize;
    let mut event_types = Vec::with_capacity(event_count.min(16));
    for _ in 0..event_count {
        event_types.push(EventType::from_raw(r.u32("sensor_info.event_types")?));
    }
    let name = r.string("sensor_info.name")?;
    let vendor = r.string("sensor_info.vendor")?;

    Ok(Some(SensorInfo {
        sensor_type,
        name,
        vendor,
        min_range,
        max_range,
        resolution,
        min_interval_us,
        max_batch_count,
        wakeup_supported,
        permission,
        event_types,
    }))
}
