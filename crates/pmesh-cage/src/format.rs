//! `.ccm` binary cage container: strict little-endian, tightly packed.
//!
//! Layout is fixed by SPEC_FULL.md §6.1: an 8-byte magic, five `i32`
//! counts, then the index arrays, vertex/uv arrays, creases, and
//! half-edges in that order.

use std::io::{self, Read};
use std::path::Path;

use thiserror::Error;

use crate::{Cage, Crease, Halfedge, VertexPoint, VertexUv};

const MAGIC: &[u8; 8] = b"cc_Mesh1";

/// Failure modes of loading or saving a `.ccm` container.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file does not start with the `cc_Mesh1` magic.
    #[error("bad magic: expected \"cc_Mesh1\"")]
    BadMagic,

    /// An I/O error occurred while reading or writing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A declared count would overflow the arena it sizes.
    #[error("count overflow while allocating cage arenas")]
    Alloc,
}

fn read_i32(r: &mut impl Read) -> Result<i32, LoadError> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(i32::from_le_bytes(b))
}

fn read_f32(r: &mut impl Read) -> Result<f32, LoadError> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(f32::from_le_bytes(b))
}

fn checked_len(count: i32, elem_size: usize) -> Result<usize, LoadError> {
    if count < 0 {
        return Err(LoadError::Alloc);
    }
    (count as usize)
        .checked_mul(elem_size)
        .map(|_| count as usize)
        .ok_or(LoadError::Alloc)
}

/// Load a cage from a `.ccm` file on disk.
pub fn load_cage(path: impl AsRef<Path>) -> Result<Cage, LoadError> {
    let bytes = std::fs::read(path)?;
    load_cage_bytes(&bytes)
}

/// Load a cage from an in-memory `.ccm` byte buffer.
pub fn load_cage_bytes(bytes: &[u8]) -> Result<Cage, LoadError> {
    let mut r = bytes;

    let mut magic = [0u8; 8];
    r.read_exact(&mut magic).map_err(|_| LoadError::BadMagic)?;
    if &magic != MAGIC {
        return Err(LoadError::BadMagic);
    }

    let vertex_count = checked_len(read_i32(&mut r)?, 12)?;
    let uv_count = checked_len(read_i32(&mut r)?, 8)?;
    let halfedge_count = checked_len(read_i32(&mut r)?, 28)?;
    let edge_count = checked_len(read_i32(&mut r)?, 12)?;
    let face_count = checked_len(read_i32(&mut r)?, 4)?;

    let mut vertex_to_halfedge = Vec::with_capacity(vertex_count);
    for _ in 0..vertex_count {
        vertex_to_halfedge.push(read_i32(&mut r)?);
    }

    let mut edge_to_halfedge = Vec::with_capacity(edge_count);
    for _ in 0..edge_count {
        edge_to_halfedge.push(read_i32(&mut r)?);
    }

    let mut face_to_halfedge = Vec::with_capacity(face_count);
    for _ in 0..face_count {
        face_to_halfedge.push(read_i32(&mut r)?);
    }

    let mut vertex_points = Vec::with_capacity(vertex_count);
    for _ in 0..vertex_count {
        let x = read_f32(&mut r)?;
        let y = read_f32(&mut r)?;
        let z = read_f32(&mut r)?;
        vertex_points.push(VertexPoint { x, y, z });
    }

    let mut uvs = Vec::with_capacity(uv_count);
    for _ in 0..uv_count {
        let u = read_f32(&mut r)?;
        let v = read_f32(&mut r)?;
        uvs.push(VertexUv { u, v });
    }

    let mut creases = Vec::with_capacity(edge_count);
    for _ in 0..edge_count {
        let next = read_i32(&mut r)?;
        let prev = read_i32(&mut r)?;
        let sharpness = read_f32(&mut r)?;
        creases.push(Crease {
            next,
            prev,
            sharpness,
        });
    }

    let mut halfedges = Vec::with_capacity(halfedge_count);
    for _ in 0..halfedge_count {
        let twin = read_i32(&mut r)?;
        let next = read_i32(&mut r)?;
        let prev = read_i32(&mut r)?;
        let face = read_i32(&mut r)?;
        let edge = read_i32(&mut r)?;
        let vertex = read_i32(&mut r)?;
        let uv = read_i32(&mut r)?;
        halfedges.push(Halfedge {
            twin,
            next,
            prev,
            face,
            edge,
            vertex,
            uv,
        });
    }

    // No trailing bytes should remain; a short/oversized file is a
    // structural error we surface the same way as a truncated read.
    if !r.is_empty() {
        return Err(LoadError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            "trailing bytes after expected cage payload",
        )));
    }

    Ok(Cage::from_parts(
        vertex_to_halfedge,
        edge_to_halfedge,
        face_to_halfedge,
        vertex_points,
        uvs,
        creases,
        halfedges,
    ))
}

/// Serialize a cage to a `.ccm` file on disk.
pub fn save_cage(cage: &Cage, path: impl AsRef<Path>) -> Result<(), LoadError> {
    let bytes = save_cage_bytes(cage);
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Serialize a cage to an in-memory `.ccm` byte buffer.
pub fn save_cage_bytes(cage: &Cage) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(cage.vertex_count() as i32).to_le_bytes());
    out.extend_from_slice(&(cage.uv_count() as i32).to_le_bytes());
    out.extend_from_slice(&(cage.halfedge_count() as i32).to_le_bytes());
    out.extend_from_slice(&(cage.edge_count() as i32).to_le_bytes());
    out.extend_from_slice(&(cage.face_count() as i32).to_le_bytes());

    for i in 0..cage.vertex_count() {
        out.extend_from_slice(&cage.vertex_to_halfedge(i).to_le_bytes());
    }
    for i in 0..cage.edge_count() {
        out.extend_from_slice(&cage.edge_to_halfedge(i).to_le_bytes());
    }
    for i in 0..cage.face_count() {
        out.extend_from_slice(&cage.face_to_halfedge(i).to_le_bytes());
    }
    for i in 0..cage.vertex_count() {
        let p = cage.vertex_point(i);
        out.extend_from_slice(&p.x.to_le_bytes());
        out.extend_from_slice(&p.y.to_le_bytes());
        out.extend_from_slice(&p.z.to_le_bytes());
    }
    for i in 0..cage.uv_count() {
        let uv = cage.uv(i);
        out.extend_from_slice(&uv.u.to_le_bytes());
        out.extend_from_slice(&uv.v.to_le_bytes());
    }
    for i in 0..cage.edge_count() {
        let c = cage.crease(i);
        out.extend_from_slice(&c.next.to_le_bytes());
        out.extend_from_slice(&c.prev.to_le_bytes());
        out.extend_from_slice(&c.sharpness.to_le_bytes());
    }
    for i in 0..cage.halfedge_count() {
        let h = cage.halfedge(i);
        out.extend_from_slice(&h.twin.to_le_bytes());
        out.extend_from_slice(&h.next.to_le_bytes());
        out.extend_from_slice(&h.prev.to_le_bytes());
        out.extend_from_slice(&h.face.to_le_bytes());
        out.extend_from_slice(&h.edge.to_le_bytes());
        out.extend_from_slice(&h.vertex.to_le_bytes());
        out.extend_from_slice(&h.uv.to_le_bytes());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cage() -> Cage {
        let vertex_points = vec![
            VertexPoint::new(0.0, 0.0, 0.0),
            VertexPoint::new(1.0, 0.0, 0.0),
            VertexPoint::new(1.0, 1.0, 0.0),
            VertexPoint::new(0.0, 1.0, 0.0),
        ];
        let creases = vec![
            Crease {
                next: 0,
                prev: 0,
                sharpness: 0.0,
            },
            Crease {
                next: 1,
                prev: 1,
                sharpness: 2.5,
            },
            Crease {
                next: 2,
                prev: 2,
                sharpness: 0.0,
            },
            Crease {
                next: 3,
                prev: 3,
                sharpness: 0.0,
            },
        ];
        let halfedges = (0..4i32)
            .map(|h| Halfedge {
                twin: crate::INVALID,
                next: Cage::halfedge_next_quad(h as u32) as i32,
                prev: Cage::halfedge_prev_quad(h as u32) as i32,
                face: 0,
                edge: h,
                vertex: h,
                uv: crate::INVALID,
            })
            .collect();

        Cage::from_parts(
            vec![0, 1, 2, 3],
            vec![0, 1, 2, 3],
            vec![0],
            vertex_points,
            Vec::new(),
            creases,
            halfedges,
        )
    }

    #[test]
    fn round_trip_is_byte_exact() {
        let cage = sample_cage();
        let bytes = save_cage_bytes(&cage);
        let reloaded = load_cage_bytes(&bytes).unwrap();
        let bytes_again = save_cage_bytes(&reloaded);
        assert_eq!(bytes, bytes_again);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = save_cage_bytes(&sample_cage());
        bytes[0] = b'X';
        assert!(matches!(load_cage_bytes(&bytes), Err(LoadError::BadMagic)));
    }

    #[test]
    fn truncated_file_is_an_io_error() {
        let bytes = save_cage_bytes(&sample_cage());
        let truncated = &bytes[..bytes.len() - 4];
        assert!(matches!(load_cage_bytes(truncated), Err(LoadError::Io(_))));
    }
}
