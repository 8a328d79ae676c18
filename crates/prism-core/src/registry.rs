//! Capability registry: which value kind each info key decodes to
//!
//! The driver contract answers every attribute query with raw bytes. This
//! module is the host-side schema for those payloads: a const table from
//! [`InfoKey`] to [`ValueKind`], and a decoder that turns the bytes into a
//! typed [`InfoValue`]. Payload encodings are fixed by the contract: UTF-8
//! text, little-endian integers, one-byte booleans, and `u64` sequences for
//! size lists.

use crate::error::{Error, Result};
use prism_driver::{DeviceTypeMask, InfoKey, PlatformHandle};
use std::fmt;

/// Value shape an [`InfoKey`] decodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    U32,
    U64,
    Bool,
    SizeList,
    TypeMask,
    PlatformRef,
}

/// Registry lookup. Total over every key the driver contract defines.
pub const fn value_kind(key: InfoKey) -> ValueKind {
    match key {
        InfoKey::PlatformName
        | InfoKey::PlatformVendor
        | InfoKey::PlatformVersion
        | InfoKey::PlatformProfile
        | InfoKey::PlatformExtensions
        | InfoKey::DeviceName
        | InfoKey::DeviceVendor
        | InfoKey::DeviceExtensions => ValueKind::Text,
        InfoKey::DeviceComputeUnits | InfoKey::DeviceMaxWorkItemDimensions => ValueKind::U32,
        InfoKey::DeviceGlobalMemSize
        | InfoKey::DeviceLocalMemSize
        | InfoKey::DeviceMaxAllocSize
        | InfoKey::DeviceMaxWorkGroupSize => ValueKind::U64,
        InfoKey::DeviceAvailable => ValueKind::Bool,
        InfoKey::DeviceMaxWorkItemSizes => ValueKind::SizeList,
        InfoKey::DeviceType => ValueKind::TypeMask,
        InfoKey::DevicePlatform => ValueKind::PlatformRef,
    }
}

/// Decoded attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum InfoValue {
    Text(String),
    U32(u32),
    U64(u64),
    Bool(bool),
    SizeList(Vec<usize>),
    TypeMask(DeviceTypeMask),
    PlatformRef(PlatformHandle),
}

impl InfoValue {
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_u32(self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_u64(self) -> Option<u64> {
        match self {
            Self::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_bool(self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_size_list(self) -> Option<Vec<usize>> {
        match self {
            Self::SizeList(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_type_mask(self) -> Option<DeviceTypeMask> {
        match self {
            Self::TypeMask(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_platform(self) -> Option<PlatformHandle> {
        match self {
            Self::PlatformRef(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for InfoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::SizeList(v) => write!(f, "{v:?}"),
            Self::TypeMask(v) => write!(f, "{v}"),
            Self::PlatformRef(v) => write!(f, "{v}"),
        }
    }
}

fn le_u32(raw: &[u8]) -> Option<u32> {
    Some(u32::from_le_bytes(raw.try_into().ok()?))
}

fn le_u64(raw: &[u8]) -> Option<u64> {
    Some(u64::from_le_bytes(raw.try_into().ok()?))
}

/// Decode a raw attribute payload according to the registry.
///
/// `target` only labels the error when the payload is malformed.
pub fn decode(target: impl fmt::Display, key: InfoKey, raw: &[u8]) -> Result<InfoValue> {
    let malformed = |reason: &str| Error::info_unavailable(key, &target, reason);
    let value = match value_kind(key) {
        ValueKind::Text => {
            let text = std::str::from_utf8(raw).map_err(|_| malformed("payload is not UTF-8"))?;
            InfoValue::Text(text.to_string())
        }
        ValueKind::U32 => {
            InfoValue::U32(le_u32(raw).ok_or_else(|| malformed("payload is not 4 bytes"))?)
        }
        ValueKind::U64 => {
            InfoValue::U64(le_u64(raw).ok_or_else(|| malformed("payload is not 8 bytes"))?)
        }
        ValueKind::Bool => match raw {
            [0] => InfoValue::Bool(false),
            [1] => InfoValue::Bool(true),
            _ => return Err(malformed("payload is not a one-byte boolean")),
        },
        ValueKind::SizeList => {
            if raw.len() % 8 != 0 {
                return Err(malformed("payload length is not a multiple of 8"));
            }
            let sizes = raw
                .chunks_exact(8)
                .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap_or([0; 8])) as usize)
                .collect();
            InfoValue::SizeList(sizes)
        }
        ValueKind::TypeMask => InfoValue::TypeMask(DeviceTypeMask(
            le_u64(raw).ok_or_else(|| malformed("payload is not 8 bytes"))?,
        )),
        ValueKind::PlatformRef => InfoValue::PlatformRef(PlatformHandle::new(
            le_u64(raw).ok_or_else(|| malformed("payload is not 8 bytes"))?,
        )),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_kind_table() {
        assert_eq!(value_kind(InfoKey::PlatformName), ValueKind::Text);
        assert_eq!(value_kind(InfoKey::DeviceComputeUnits), ValueKind::U32);
        assert_eq!(value_kind(InfoKey::DeviceMaxAllocSize), ValueKind::U64);
        assert_eq!(value_kind(InfoKey::DeviceMaxWorkGroupSize), ValueKind::U64);
        assert_eq!(value_kind(InfoKey::DeviceAvailable), ValueKind::Bool);
        assert_eq!(value_kind(InfoKey::DeviceMaxWorkItemSizes), ValueKind::SizeList);
        assert_eq!(value_kind(InfoKey::DeviceType), ValueKind::TypeMask);
        assert_eq!(value_kind(InfoKey::DevicePlatform), ValueKind::PlatformRef);
    }

    #[test]
    fn test_decode_text() {
        let value = decode("plat0", InfoKey::PlatformName, b"Prism Host Platform").unwrap();
        assert_eq!(value, InfoValue::Text("Prism Host Platform".to_string()));
    }

    #[test]
    fn test_decode_integers() {
        let value = decode("dev0", InfoKey::DeviceComputeUnits, &8u32.to_le_bytes()).unwrap();
        assert_eq!(value.into_u32(), Some(8));
        let value = decode("dev0", InfoKey::DeviceGlobalMemSize, &1024u64.to_le_bytes()).unwrap();
        assert_eq!(value.into_u64(), Some(1024));
    }

    #[test]
    fn test_decode_bool_and_mask() {
        let value = decode("dev0", InfoKey::DeviceAvailable, &[1]).unwrap();
        assert_eq!(value, InfoValue::Bool(true));
        let raw = DeviceTypeMask::GPU.0.to_le_bytes();
        let value = decode("dev0", InfoKey::DeviceType, &raw).unwrap();
        assert_eq!(value.into_type_mask(), Some(DeviceTypeMask::GPU));
    }

    #[test]
    fn test_decode_size_list() {
        let mut raw = Vec::new();
        for size in [256u64, 256, 64] {
            raw.extend_from_slice(&size.to_le_bytes());
        }
        let value = decode("dev1", InfoKey::DeviceMaxWorkItemSizes, &raw).unwrap();
        assert_eq!(value.into_size_list(), Some(vec![256, 256, 64]));
    }

    #[test]
    fn test_decode_platform_ref() {
        let value = decode("dev1", InfoKey::DevicePlatform, &0u64.to_le_bytes()).unwrap();
        assert_eq!(value.into_platform(), Some(PlatformHandle::new(0)));
    }

    #[test]
    fn test_malformed_payloads() {
        let err = decode("dev0", InfoKey::DeviceComputeUnits, &[1, 2]).unwrap_err();
        assert!(matches!(err, Error::InfoUnavailable { .. }));
        let err = decode("dev0", InfoKey::DeviceAvailable, &[2]).unwrap_err();
        assert!(matches!(err, Error::InfoUnavailable { .. }));
        let err = decode("dev0", InfoKey::DeviceName, &[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, Error::InfoUnavailable { .. }));
        let err = decode("dev0", InfoKey::DeviceMaxWorkItemSizes, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, Error::InfoUnavailable { .. }));
    }
}
