//! Binary world snapshot reader/writer (spec §6 "World snapshot format").
//!
//! Wire format is little-endian, matching `original_source/mesh.cpp`
//! `SaveWorld`/`LoadWorld`/`SaveInst`. The BVH itself is never serialized;
//! callers must rebuild after load.

use crate::error::Result;
use crate::instance::InstanceFlags;
use cgmath::Matrix4;
use std::io::{Read, Write};

/// One `(mesh_id, inst_name, tm, flags)` record (spec §8 round-trip
/// property).
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    pub mesh_id: String,
    pub inst_name: String,
    /// Row-major 4x4, matching spec §6.
    pub tm: [f64; 16],
    pub flags: i32,
}

impl InstanceRecord {
    pub fn tm_matrix(&self) -> Matrix4<f64> {
        // cgmath::Matrix4::new takes column-major arguments; transpose the
        // row-major wire layout on the way in.
        let m = self.tm;
        Matrix4::new(
            m[0], m[4], m[8], m[12], m[1], m[5], m[9], m[13], m[2], m[6], m[10], m[14], m[3],
            m[7], m[11], m[15],
        )
    }

    pub fn from_matrix(mesh_id: String, inst_name: String, tm: &Matrix4<f64>, flags: InstanceFlags) -> Self {
        let c = [
            tm.x.x, tm.x.y, tm.x.z, tm.x.w, tm.y.x, tm.y.y, tm.y.z, tm.y.w, tm.z.x, tm.z.y, tm.z.z,
            tm.z.w, tm.w.x, tm.w.y, tm.w.z, tm.w.w,
        ];
        // cgmath stores column-major; re-flatten to the row-major wire
        // layout.
        let row_major = [
            c[0], c[4], c[8], c[12], c[1], c[5], c[9], c[13], c[2], c[6], c[10], c[14], c[3],
            c[7], c[11], c[15],
        ];
        InstanceRecord {
            mesh_id,
            inst_name,
            tm: row_major,
            flags: flags.bits() as i32,
        }
    }
}

pub fn write_snapshot<W: Write>(w: &mut W, records: &[InstanceRecord]) -> Result<()> {
    w.write_all(&(records.len() as i32).to_le_bytes())?;
    for rec in records {
        write_string(w, &rec.mesh_id)?;
        write_string(w, &rec.inst_name)?;
        for v in &rec.tm {
            w.write_all(&v.to_le_bytes())?;
        }
        w.write_all(&rec.flags.to_le_bytes())?;
    }
    Ok(())
}

fn write_string<W: Write>(w: &mut W, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    w.write_all(&(bytes.len() as i32).to_le_bytes())?;
    w.write_all(bytes)?;
    Ok(())
}

/// Reads a snapshot. On truncation, returns `Err(Error::Io)` -- the caller
/// is expected to tear down any world it had begun building (spec §7
/// "IoError").
pub fn read_snapshot<R: Read>(r: &mut R) -> Result<Vec<InstanceRecord>> {
    let num_instances = read_i32(r)?;
    if num_instances < 0 {
        return Err(crate::error::Error::InvalidArgument("negative instance count"));
    }
    let mut records = Vec::with_capacity(num_instances as usize);
    for _ in 0..num_instances {
        let mesh_id = read_string(r)?;
        let inst_name = read_string(r)?;
        let mut tm = [0.0f64; 16];
        for slot in tm.iter_mut() {
            *slot = read_f64(r)?;
        }
        let flags = read_i32(r)?;
        records.push(InstanceRecord {
            mesh_id,
            inst_name,
            tm,
            flags,
        });
    }
    Ok(records)
}

fn read_i32<R: Read>(r: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_f64<R: Read>(r: &mut R) -> Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn read_string<R: Read>(r: &mut R) -> Result<String> {
    let len = read_i32(r)?;
    if len < 0 {
        return Err(crate::error::Error::InvalidArgument("negative string length"));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| crate::error::Error::MalformedMesh("snapshot string was not valid utf-8".into()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_records() {
        let records = vec![
            InstanceRecord {
                mesh_id: "cube".into(),
                inst_name: "cube_0".into(),
                tm: [
                    1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 5.0, 6.0, 7.0, 1.0,
                ],
                flags: 1,
            },
            InstanceRecord {
                mesh_id: "terrain".into(),
                inst_name: "t0".into(),
                tm: [1.0; 16],
                flags: 0,
            },
        ];
        let mut buf = Vec::new();
        write_snapshot(&mut buf, &records).unwrap();
        let read_back = read_snapshot(&mut buf.as_slice()).unwrap();
        assert_eq!(read_back, records);
    }

    #[test]
    fn truncated_snapshot_is_io_error() {
        let buf = [1, 0, 0, 0]; // says 1 instance, no body
        let err = read_snapshot(&mut &buf[..]).unwrap_err();
        assert!(matches!(err, crate::error::Error::Io(_)));
    }

    #[test]
    fn matrix_round_trip_preserves_translation() {
        let tm = Matrix4::from_translation(cgmath::Vector3::new(1.0, 2.0, 3.0));
        let rec = InstanceRecord::from_matrix("m".into(), "i".into(), &tm, InstanceFlags::USE_TREE);
        let back = rec.tm_matrix();
        assert_eq!(back, tm);
    }
}
