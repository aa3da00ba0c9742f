//! Core data types for data cubes

use crate::error::{Result, XcubeError};
use serde::{Deserialize, Serialize};
use std::fmt;

const OPENGIS_DATA_TYPE_PREFIX: &str = "http://www.opengis.net/def/dataType/OGC/0/";

/// Element types of data cube variables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Unsigned 8-bit integer
    #[serde(rename = "uint8")]
    U8,
    /// Unsigned 16-bit integer
    #[serde(rename = "uint16")]
    U16,
    /// Unsigned 32-bit integer
    #[serde(rename = "uint32")]
    U32,
    /// Unsigned 64-bit integer
    #[serde(rename = "uint64")]
    U64,
    /// Signed 8-bit integer
    #[serde(rename = "int8")]
    I8,
    /// Signed 16-bit integer
    #[serde(rename = "int16")]
    I16,
    /// Signed 32-bit integer
    #[serde(rename = "int32")]
    I32,
    /// Signed 64-bit integer
    #[serde(rename = "int64")]
    I64,
    /// 32-bit floating point
    #[serde(rename = "float32")]
    F32,
    /// 64-bit floating point
    #[serde(rename = "float64")]
    F64,
}

impl DataType {
    /// Size in bytes of this data type
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::U32 | DataType::I32 | DataType::F32 => 4,
            DataType::U64 | DataType::I64 | DataType::F64 => 8,
        }
    }

    /// Check if this is a floating point type
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    /// Check if this is a signed integer type
    pub fn is_signed_integer(&self) -> bool {
        matches!(
            self,
            DataType::I8 | DataType::I16 | DataType::I32 | DataType::I64
        )
    }

    /// Check if this is an unsigned integer type
    pub fn is_unsigned_integer(&self) -> bool {
        matches!(
            self,
            DataType::U8 | DataType::U16 | DataType::U32 | DataType::U64
        )
    }

    /// Encode as a Zarr v2 dtype string, e.g. `"<f4"` or `"|u1"`
    pub fn to_zarr_dtype(&self) -> String {
        let kind = if self.is_float() {
            'f'
        } else if self.is_signed_integer() {
            'i'
        } else {
            'u'
        };
        let size = self.size_in_bytes();
        let byte_order = if size == 1 { '|' } else { '<' };
        format!("{}{}{}", byte_order, kind, size)
    }

    /// Parse a Zarr v2 dtype string
    ///
    /// Big-endian types are rejected, all chunks are handled little-endian.
    pub fn from_zarr_dtype(dtype: &str) -> Result<Self> {
        let invalid = || XcubeError::InvalidDataType(dtype.to_string());
        let mut chars = dtype.chars();
        let first = chars.next().ok_or_else(invalid)?;
        let rest = match first {
            '<' | '|' | '=' => chars.as_str(),
            '>' => {
                return Err(XcubeError::InvalidDataType(format!(
                    "big-endian data type {dtype:?} is not supported"
                )))
            }
            _ => dtype,
        };
        match rest {
            "u1" | "b1" => Ok(DataType::U8),
            "u2" => Ok(DataType::U16),
            "u4" => Ok(DataType::U32),
            "u8" => Ok(DataType::U64),
            "i1" => Ok(DataType::I8),
            "i2" => Ok(DataType::I16),
            "i4" => Ok(DataType::I32),
            "i8" => Ok(DataType::I64),
            "f4" => Ok(DataType::F32),
            "f8" => Ok(DataType::F64),
            _ => Err(invalid()),
        }
    }

    /// OpenGIS data type identifier, as used by OGC API Coverages range types
    pub fn to_opengis_data_type(&self) -> String {
        let bits = 8 * self.size_in_bytes();
        let int_name = match bits {
            8 => "Byte",
            16 => "Short",
            32 => "Int",
            _ => "Long",
        };
        if self.is_float() {
            format!("{}float{}", OPENGIS_DATA_TYPE_PREFIX, bits)
        } else if self.is_signed_integer() {
            format!("{}signed{}", OPENGIS_DATA_TYPE_PREFIX, int_name)
        } else {
            format!("{}unsigned{}", OPENGIS_DATA_TYPE_PREFIX, int_name)
        }
    }

    /// Encode values as little-endian bytes of this data type.
    ///
    /// Integer targets saturate, NaN becomes zero.
    pub fn encode_values<'a, I>(&self, values: I) -> Vec<u8>
    where
        I: IntoIterator<Item = &'a f64>,
    {
        let values = values.into_iter();
        let mut bytes = Vec::with_capacity(values.size_hint().0 * self.size_in_bytes());
        for &v in values {
            match self {
                DataType::U8 => bytes.push(v as u8),
                DataType::I8 => bytes.extend_from_slice(&(v as i8).to_le_bytes()),
                DataType::U16 => bytes.extend_from_slice(&(v as u16).to_le_bytes()),
                DataType::I16 => bytes.extend_from_slice(&(v as i16).to_le_bytes()),
                DataType::U32 => bytes.extend_from_slice(&(v as u32).to_le_bytes()),
                DataType::I32 => bytes.extend_from_slice(&(v as i32).to_le_bytes()),
                DataType::U64 => bytes.extend_from_slice(&(v as u64).to_le_bytes()),
                DataType::I64 => bytes.extend_from_slice(&(v as i64).to_le_bytes()),
                DataType::F32 => bytes.extend_from_slice(&(v as f32).to_le_bytes()),
                DataType::F64 => bytes.extend_from_slice(&v.to_le_bytes()),
            }
        }
        bytes
    }

    /// Decode little-endian bytes of this data type into values
    pub fn decode_values(&self, bytes: &[u8]) -> Result<Vec<f64>> {
        let size = self.size_in_bytes();
        if bytes.len() % size != 0 {
            return Err(XcubeError::InvalidFormat(format!(
                "byte length {} not aligned with data type {}",
                bytes.len(),
                self
            )));
        }
        let values = bytes
            .chunks_exact(size)
            .map(|b| match self {
                DataType::U8 => b[0] as f64,
                DataType::I8 => b[0] as i8 as f64,
                DataType::U16 => u16::from_le_bytes([b[0], b[1]]) as f64,
                DataType::I16 => i16::from_le_bytes([b[0], b[1]]) as f64,
                DataType::U32 => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
                DataType::I32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
                DataType::F32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
                DataType::U64 => u64::from_le_bytes(to_array8(b)) as f64,
                DataType::I64 => i64::from_le_bytes(to_array8(b)) as f64,
                DataType::F64 => f64::from_le_bytes(to_array8(b)),
            })
            .collect();
        Ok(values)
    }
}

fn to_array8(b: &[u8]) -> [u8; 8] {
    [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::U8 => "uint8",
            DataType::U16 => "uint16",
            DataType::U32 => "uint32",
            DataType::U64 => "uint64",
            DataType::I8 => "int8",
            DataType::I16 => "int16",
            DataType::I32 => "int32",
            DataType::I64 => "int64",
            DataType::F32 => "float32",
            DataType::F64 => "float64",
        };
        f.write_str(name)
    }
}

/// Value range of a variable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }

    /// Compute the range of the finite values, if any
    pub fn from_values<'a, I>(values: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a f64>,
    {
        values
            .into_iter()
            .filter(|v| v.is_finite())
            .fold(None, |range, &v| match range {
                None => Some(ValueRange::new(v, v)),
                Some(r) => Some(ValueRange::new(r.min.min(v), r.max.max(v))),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_sizes() {
        assert_eq!(DataType::U8.size_in_bytes(), 1);
        assert_eq!(DataType::I16.size_in_bytes(), 2);
        assert_eq!(DataType::F32.size_in_bytes(), 4);
        assert_eq!(DataType::F64.size_in_bytes(), 8);
    }

    #[test]
    fn test_zarr_dtype() {
        assert_eq!(DataType::U8.to_zarr_dtype(), "|u1");
        assert_eq!(DataType::I16.to_zarr_dtype(), "<i2");
        assert_eq!(DataType::F32.to_zarr_dtype(), "<f4");
        assert_eq!(DataType::from_zarr_dtype("<f8").unwrap(), DataType::F64);
        assert_eq!(DataType::from_zarr_dtype("|u1").unwrap(), DataType::U8);
        assert_eq!(DataType::from_zarr_dtype("i4").unwrap(), DataType::I32);
        assert!(DataType::from_zarr_dtype(">f4").is_err());
        assert!(DataType::from_zarr_dtype("<c8").is_err());
        assert!(DataType::from_zarr_dtype("").is_err());
    }

    #[test]
    fn test_opengis_data_type() {
        assert_eq!(
            DataType::F32.to_opengis_data_type(),
            "http://www.opengis.net/def/dataType/OGC/0/float32"
        );
        assert_eq!(
            DataType::I16.to_opengis_data_type(),
            "http://www.opengis.net/def/dataType/OGC/0/signedShort"
        );
        assert_eq!(
            DataType::U8.to_opengis_data_type(),
            "http://www.opengis.net/def/dataType/OGC/0/unsignedByte"
        );
        assert_eq!(
            DataType::U64.to_opengis_data_type(),
            "http://www.opengis.net/def/dataType/OGC/0/unsignedLong"
        );
    }

    #[test]
    fn test_encode_decode_values() {
        let values = [1.0, -2.0, 300.5];
        let bytes = DataType::F32.encode_values(&values);
        assert_eq!(bytes.len(), 12);
        assert_eq!(DataType::F32.decode_values(&bytes).unwrap(), values.to_vec());

        let bytes = DataType::I16.encode_values(&values);
        assert_eq!(DataType::I16.decode_values(&bytes).unwrap(), vec![1.0, -2.0, 300.0]);

        let bytes = DataType::U8.encode_values(&[f64::NAN, 300.0]);
        assert_eq!(bytes, vec![0, 255]);

        assert!(DataType::F64.decode_values(&[0u8; 5]).is_err());
    }

    #[test]
    fn test_value_range() {
        let range = ValueRange::from_values(&[f64::NAN, 3.0, -1.0, 2.0]).unwrap();
        assert_eq!(range, ValueRange::new(-1.0, 3.0));
        assert!(range.is_valid());
        assert!(ValueRange::from_values(&[f64::NAN]).is_none());
        assert!(!ValueRange::new(2.0, 1.0).is_valid());
    }
}
