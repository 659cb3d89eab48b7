//! Scalar encode/decode with configurable byte order.
//!
//! Handles the fixed-width numeric field types of a grammar (unsigned and signed
//! integers of 1, 2, 3, 4 or 8 bytes, IEEE floats of 4 or 8 bytes). Variable-length
//! content (`bytes`, `ascii`, `utf8`) is copied verbatim by the decomposer and
//! reconstructor and never passes through here.

use crate::value::Value;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endianness {
    #[serde(rename = "big-endian")]
    Big,
    #[serde(rename = "little-endian")]
    Little,
}

impl Endianness {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "little-endian" | "little" | "le" => Some(Endianness::Little),
            "big-endian" | "big" | "be" => Some(Endianness::Big),
            _ => None,
        }
    }
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endianness::Big => f.write_str("big-endian"),
            Endianness::Little => f.write_str("little-endian"),
        }
    }
}

/// Numeric representation of a fixed-width field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Unsigned,
    Signed,
    Float,
}

/// A fixed-width numeric type with an optional byte-order override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarType {
    pub kind: ScalarKind,
    pub width: usize,
    /// `None` means "use the grammar's byte order".
    pub endianness: Option<Endianness>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ScalarError {
    #[error("value {value} does not fit in {width} byte(s)")]
    Overflow { value: String, width: usize },
    #[error("expected a numeric value, found {0}")]
    NotNumeric(String),
}

impl ScalarType {
    /// Parse a type name such as `uint32_le`, `int16`, `uint24_be` or `float64`.
    pub fn parse(name: &str) -> Option<Self> {
        let (base, endianness) = if let Some(b) = name.strip_suffix("_le") {
            (b, Some(Endianness::Little))
        } else if let Some(b) = name.strip_suffix("_be") {
            (b, Some(Endianness::Big))
        } else {
            (name, None)
        };
        let (kind, bits) = if let Some(bits) = base.strip_prefix("uint") {
            (ScalarKind::Unsigned, bits)
        } else if let Some(bits) = base.strip_prefix("int") {
            (ScalarKind::Signed, bits)
        } else if let Some(bits) = base.strip_prefix("float") {
            (ScalarKind::Float, bits)
        } else {
            return None;
        };
        let width = match (kind, bits) {
            (ScalarKind::Float, "32") => 4,
            (ScalarKind::Float, "64") => 8,
            (ScalarKind::Float, _) => return None,
            (_, "8") => 1,
            (_, "16") => 2,
            (ScalarKind::Unsigned, "24") => 3,
            (_, "32") => 4,
            (_, "64") => 8,
            _ => return None,
        };
        if width == 1 && endianness.is_some() {
            return None;
        }
        Some(ScalarType { kind, width, endianness })
    }

    pub fn is_integer(&self) -> bool {
        self.kind != ScalarKind::Float
    }

    fn order(&self, default: Endianness) -> Endianness {
        self.endianness.unwrap_or(default)
    }

    /// Decode `buf` (exactly `width` bytes). Non-finite floats return `None`; callers keep
    /// those as raw bytes so their bit pattern survives reconstruction.
    pub fn decode(&self, buf: &[u8], default: Endianness) -> Option<Value> {
        debug_assert_eq!(buf.len(), self.width);
        let order = self.order(default);
        Some(match self.kind {
            ScalarKind::Unsigned => Value::from_u64(match order {
                Endianness::Big => BigEndian::read_uint(buf, self.width),
                Endianness::Little => LittleEndian::read_uint(buf, self.width),
            }),
            ScalarKind::Signed => Value::Int(match order {
                Endianness::Big => BigEndian::read_int(buf, self.width),
                Endianness::Little => LittleEndian::read_int(buf, self.width),
            }),
            ScalarKind::Float => {
                let f = match (order, self.width) {
                    (Endianness::Big, 4) => BigEndian::read_f32(buf) as f64,
                    (Endianness::Little, 4) => LittleEndian::read_f32(buf) as f64,
                    (Endianness::Big, _) => BigEndian::read_f64(buf),
                    (Endianness::Little, _) => LittleEndian::read_f64(buf),
                };
                if !f.is_finite() {
                    return None;
                }
                Value::Float(f)
            }
        })
    }

    /// Decode as an unsigned integer (used for length, count and checksum fields).
    pub fn decode_u64(&self, buf: &[u8], default: Endianness) -> Option<u64> {
        self.decode(buf, default).and_then(|v| v.as_u64())
    }

    /// Encode `v` into exactly `width` bytes.
    pub fn encode(&self, v: &Value, default: Endianness) -> Result<Vec<u8>, ScalarError> {
        let order = self.order(default);
        let mut buf = vec![0u8; self.width];
        match self.kind {
            ScalarKind::Unsigned => {
                let n = v.as_u64().ok_or_else(|| self.not_fitting(v))?;
                self.encode_u64_into(n, order, &mut buf)?;
            }
            ScalarKind::Signed => {
                let n = v.as_i64().ok_or_else(|| self.not_fitting(v))?;
                let bits = self.width * 8;
                if bits < 64 {
                    let min = -(1i64 << (bits - 1));
                    let max = (1i64 << (bits - 1)) - 1;
                    if n < min || n > max {
                        return Err(self.not_fitting(v));
                    }
                }
                match order {
                    Endianness::Big => BigEndian::write_int(&mut buf, n, self.width),
                    Endianness::Little => LittleEndian::write_int(&mut buf, n, self.width),
                }
            }
            ScalarKind::Float => {
                let f = v.as_f64().ok_or_else(|| ScalarError::NotNumeric(v.to_string()))?;
                match (order, self.width) {
                    (Endianness::Big, 4) => BigEndian::write_f32(&mut buf, f as f32),
                    (Endianness::Little, 4) => LittleEndian::write_f32(&mut buf, f as f32),
                    (Endianness::Big, _) => BigEndian::write_f64(&mut buf, f),
                    (Endianness::Little, _) => LittleEndian::write_f64(&mut buf, f),
                }
            }
        }
        Ok(buf)
    }

    /// Encode an unsigned quantity (recomputed length, count or checksum).
    pub fn encode_u64(&self, n: u64, default: Endianness) -> Result<Vec<u8>, ScalarError> {
        let mut buf = vec![0u8; self.width];
        self.encode_u64_into(n, self.order(default), &mut buf)?;
        Ok(buf)
    }

    fn encode_u64_into(&self, n: u64, order: Endianness, buf: &mut [u8]) -> Result<(), ScalarError> {
        if self.width < 8 && n >> (self.width * 8) != 0 {
            return Err(ScalarError::Overflow { value: n.to_string(), width: self.width });
        }
        match order {
            Endianness::Big => BigEndian::write_uint(buf, n, self.width),
            Endianness::Little => LittleEndian::write_uint(buf, n, self.width),
        }
        Ok(())
    }

    fn not_fitting(&self, v: &Value) -> ScalarError {
        match v {
            Value::Text(_) | Value::Float(_) => ScalarError::NotNumeric(v.to_string()),
            _ => ScalarError::Overflow { value: v.to_string(), width: self.width },
        }
    }
}
