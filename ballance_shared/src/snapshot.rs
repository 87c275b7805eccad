//! World-state snapshot codec.
//!
//! One snapshot is the kinematic state of every body, 13 little-endian `f32`
//! per body, in ascending body-id order:
//!
//! ```text
//! [posX, posY, posZ, quatX, quatY, quatZ, velX, velY, velZ, angX, angY, angZ, quatW]
//! ```
//!
//! The quaternion's scalar part sits last (index 12), not after `quatZ`.
//! Clients depend on this layout bit for bit.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolDecodeError;
use crate::math::{Quat, Vec3};

/// Floats per body record.
pub const FLOATS_PER_BODY: usize = 13;

/// Bytes per body record.
pub const BYTES_PER_BODY: usize = FLOATS_PER_BODY * 4;

/// Kinematic state of one body as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BodyState {
    pub position: Vec3,
    pub orientation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
}

impl BodyState {
    /// Record in wire order.
    pub fn to_record(&self) -> [f32; FLOATS_PER_BODY] {
        let p = self.position;
        let q = self.orientation;
        let v = self.linear_velocity;
        let w = self.angular_velocity;
        [p.x, p.y, p.z, q.x, q.y, q.z, v.x, v.y, v.z, w.x, w.y, w.z, q.w]
    }

    pub fn from_record(r: &[f32; FLOATS_PER_BODY]) -> Self {
        Self {
            position: Vec3::new(r[0], r[1], r[2]),
            orientation: Quat::new(r[3], r[4], r[5], r[12]),
            linear_velocity: Vec3::new(r[6], r[7], r[8]),
            angular_velocity: Vec3::new(r[9], r[10], r[11]),
        }
    }
}

/// Encodes all body states into one immutable buffer.
pub fn encode(bodies: &[BodyState]) -> Bytes {
    let mut buf = BytesMut::with_capacity(bodies.len() * BYTES_PER_BODY);
    for body in bodies {
        for f in body.to_record() {
            buf.put_f32_le(f);
        }
    }
    buf.freeze()
}

/// Decodes a byte buffer produced by [`encode`].
pub fn decode(buf: &[u8]) -> Result<Vec<BodyState>, ProtocolDecodeError> {
    if buf.len() % 4 != 0 {
        return Err(ProtocolDecodeError::UnalignedBytes(buf.len()));
    }
    let floats: Vec<f32> = buf
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    decode_floats(&floats)
}

/// Decodes an already split float sequence.
pub fn decode_floats(floats: &[f32]) -> Result<Vec<BodyState>, ProtocolDecodeError> {
    if floats.len() % FLOATS_PER_BODY != 0 {
        return Err(ProtocolDecodeError::PartialRecord(floats.len()));
    }
    Ok(floats
        .chunks_exact(FLOATS_PER_BODY)
        .map(|chunk| {
            let mut record = [0.0; FLOATS_PER_BODY];
            record.copy_from_slice(chunk);
            BodyState::from_record(&record)
        })
        .collect())
}
