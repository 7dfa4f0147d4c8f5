//! Well-Known Binary encoding for the polygon column.
//!
//! Only 2D polygons are written or accepted. Output is always little-endian;
//! both byte orders are read.

use geo::{Coord, LineString, Polygon};

const BYTE_ORDER_BIG: u8 = 0;
const BYTE_ORDER_LITTLE: u8 = 1;
const WKB_POLYGON: u32 = 3;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum WkbError {
    #[error("unexpected end of WKB data at byte {0}")]
    UnexpectedEof(usize),
    #[error("invalid WKB byte order marker {0}")]
    InvalidByteOrder(u8),
    #[error("unsupported WKB geometry type {0} (only 2D polygons are stored)")]
    UnsupportedGeometryType(u32),
    #[error("{0} trailing bytes after WKB polygon")]
    TrailingBytes(usize),
}

pub fn encode_polygon(polygon: &Polygon<f64>) -> Vec<u8> {
    let rings = std::iter::once(polygon.exterior()).chain(polygon.interiors().iter());
    let coord_count: usize = polygon.exterior().0.len()
        + polygon.interiors().iter().map(|r| r.0.len()).sum::<usize>();
    let ring_count = 1 + polygon.interiors().len();

    let mut out = Vec::with_capacity(9 + ring_count * 4 + coord_count * 16);
    out.push(BYTE_ORDER_LITTLE);
    out.extend_from_slice(&WKB_POLYGON.to_le_bytes());
    out.extend_from_slice(&(ring_count as u32).to_le_bytes());
    for ring in rings {
        out.extend_from_slice(&(ring.0.len() as u32).to_le_bytes());
        for c in &ring.0 {
            out.extend_from_slice(&c.x.to_le_bytes());
            out.extend_from_slice(&c.y.to_le_bytes());
        }
    }
    out
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    little: bool,
}

impl<'a> Cursor<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], WkbError> {
        let end = self.pos + N;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(WkbError::UnexpectedEof(self.pos))?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, WkbError> {
        let b = self.take::<4>()?;
        Ok(if self.little { u32::from_le_bytes(b) } else { u32::from_be_bytes(b) })
    }

    fn f64(&mut self) -> Result<f64, WkbError> {
        let b = self.take::<8>()?;
        Ok(if self.little { f64::from_le_bytes(b) } else { f64::from_be_bytes(b) })
    }
}

pub fn decode_polygon(buf: &[u8]) -> Result<Polygon<f64>, WkbError> {
    let order = *buf.first().ok_or(WkbError::UnexpectedEof(0))?;
    let little = match order {
        BYTE_ORDER_LITTLE => true,
        BYTE_ORDER_BIG => false,
        other => return Err(WkbError::InvalidByteOrder(other)),
    };
    let mut cur = Cursor { buf, pos: 1, little };

    let kind = cur.u32()?;
    if kind != WKB_POLYGON {
        return Err(WkbError::UnsupportedGeometryType(kind));
    }

    let ring_count = cur.u32()? as usize;
    let mut rings = Vec::with_capacity(ring_count.min(64));
    for _ in 0..ring_count {
        let n = cur.u32()? as usize;
        // Guard the allocation against a corrupt count.
        let mut coords = Vec::with_capacity(n.min((buf.len() - cur.pos) / 16));
        for _ in 0..n {
            let x = cur.f64()?;
            let y = cur.f64()?;
            coords.push(Coord { x, y });
        }
        rings.push(LineString::new(coords));
    }

    if cur.pos != buf.len() {
        return Err(WkbError::TrailingBytes(buf.len() - cur.pos));
    }

    let mut rings = rings.into_iter();
    let exterior = rings.next().unwrap_or_else(|| LineString::new(Vec::new()));
    Ok(Polygon::new(exterior, rings.collect()))
}
