//! Bounds-checked primitive readers and writers for payload bodies.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use sensor_core::SensorData;
use sensor_core::MAX_VALUE_COUNT;

use crate::ProtocolError;

/// Cursor over a payload that fails instead of panicking on short input.
pub(crate) struct Reader {
    buf: Bytes,
}

impl Reader {
    pub(crate) fn new(buf: &Bytes) -> Self {
        Self { buf: buf.clone() }
    }

    fn need(&self, n: usize, what: &'static str) -> Result<(), ProtocolError> {
        if self.buf.remaining() < n {
            Err(ProtocolError::truncated(what))
        } else {
            Ok(())
        }
    }

    pub(crate) fn i32(&mut self, what: &'static str) -> Result<i32, ProtocolError> {
        self.need(4, what)?;
        Ok(self.buf.get_i32_ne())
    }

    pub(crate) fn u32(&mut self, what: &'static str) -> Result<u32, ProtocolError> {
        self.need(4, what)?;
        Ok(self.buf.get_u32_ne())
    }

    pub(crate) fn i64(&mut self, what: &'static str) -> Result<i64, ProtocolError> {
        self.need(8, what)?;
        Ok(self.buf.get_i64_ne())
    }

    pub(crate) fn u64(&mut self, what: &'static str) -> Result<u64, ProtocolError> {
        self.need(8, what)?;
        Ok(self.buf.get_u64_ne())
    }

    pub(crate) fn f32(&mut self, what: &'static str) -> Result<f32, ProtocolError> {
        self.need(4, what)?;
        Ok(self.buf.get_f32_ne())
    }

    pub(crate) fn u8(&mut self, what: &'static str) -> Result<u8, ProtocolError> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn bytes(&mut self, len: usize, what: &'static str) -> Result<Bytes, ProtocolError> {
        self.need(len, what)?;
        Ok(self.buf.split_to(len))
    }

    /// Length-prefixed UTF-8 string.
    pub(crate) fn string(&mut self, what: &'static str) -> Result<String, ProtocolError> {
        let len = self.u32(what)? as usize;
        let raw = self.bytes(len, what)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Everything not yet consumed.
    pub(crate) fn rest(&mut self) -> Bytes {
        let len = self.buf.remaining();
        self.buf.split_to(len)
    }

    pub(crate) fn sensor_data(&mut self) -> Result<SensorData, ProtocolError> {
        let accuracy = self.i32("data.accuracy")?;
        let timestamp = self.u64("data.timestamp")?;
        let count = self.u32("data.value_count")? as usize;
        if count > MAX_VALUE_COUNT {
            return Err(ProtocolError::InvalidValue {
                field: "data.value_count",
                value: count as i64,
            });
        }
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.f32("data.values")?);
        }
        Ok(SensorData {
            accuracy,
            timestamp,
            values,
        })
    }
}

pub(crate) fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u32_ne(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

pub(crate) fn put_sensor_data(buf: &mut BytesMut, data: &SensorData) {
    let count = data.values.len().min(MAX_VALUE_COUNT);
    buf.put_i32_ne(data.accuracy);
    buf.put_u64_ne(data.timestamp);
    buf.put_u32_ne(count as u32);
    for value in data.values.iter().take(count) {
        buf.put_f32_ne(*value);
    }
}
