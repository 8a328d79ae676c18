//! Platform and device topology of the reference driver
//!
//! The host driver's hardware picture is configuration, not probing: a
//! [`HostDriverConfig`] lists platforms and their devices, and the default
//! config models one platform carrying the host CPU and an emulated GPU.
//! Attribute queries answer from these specs using the wire encodings the
//! driver contract fixes (UTF-8 text, little-endian integers, one-byte
//! booleans, `u64` sequences for size lists).

use crate::driver::types::{DeviceHandle, DeviceTypeMask, InfoKey, PlatformHandle};
use crate::error::{DriverError, Result};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Description of one platform to expose
#[derive(Debug, Clone)]
pub struct PlatformSpec {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub profile: String,
    pub extensions: Vec<String>,
    pub devices: Vec<DeviceSpec>,
}

/// Description of one device to expose
#[derive(Debug, Clone)]
pub struct DeviceSpec {
    pub name: String,
    pub vendor: String,
    pub device_type: DeviceTypeMask,
    pub compute_units: u32,
    pub global_mem_size: u64,
    pub local_mem_size: u64,
    pub max_alloc_size: u64,
    pub max_work_group_size: usize,
    pub max_work_item_sizes: [usize; 3],
    pub extensions: Vec<String>,
    pub available: bool,
}

/// Topology the driver is constructed with
#[derive(Debug, Clone)]
pub struct HostDriverConfig {
    pub platforms: Vec<PlatformSpec>,
}

impl Default for HostDriverConfig {
    fn default() -> Self {
        Self {
            platforms: vec![PlatformSpec {
                name: "Prism Host Platform".to_string(),
                vendor: "Prism".to_string(),
                version: "PRISM 1.0".to_string(),
                profile: "FULL_PROFILE".to_string(),
                extensions: Vec::new(),
                devices: vec![
                    DeviceSpec {
                        name: "Host CPU".to_string(),
                        vendor: "Prism".to_string(),
                        device_type: DeviceTypeMask::CPU.union(DeviceTypeMask::DEFAULT),
                        compute_units: 8,
                        global_mem_size: 4 * GIB,
                        local_mem_size: 32 * KIB,
                        max_alloc_size: GIB,
                        max_work_group_size: 1024,
                        max_work_item_sizes: [1024, 1024, 1024],
                        extensions: Vec::new(),
                        available: true,
                    },
                    DeviceSpec {
                        name: "Emulated GPU".to_string(),
                        vendor: "Prism".to_string(),
                        device_type: DeviceTypeMask::GPU,
                        compute_units: 16,
                        global_mem_size: 2 * GIB,
                        local_mem_size: 48 * KIB,
                        max_alloc_size: 512 * MIB,
                        max_work_group_size: 256,
                        max_work_item_sizes: [256, 256, 64],
                        extensions: Vec::new(),
                        available: true,
                    },
                ],
            }],
        }
    }
}

/// One exposed platform with resolved handles
#[derive(Debug)]
pub(crate) struct PlatformRecord {
    pub handle: PlatformHandle,
    pub spec: PlatformSpec,
    pub devices: Vec<DeviceRecord>,
}

/// One exposed device with resolved handles
#[derive(Debug)]
pub(crate) struct DeviceRecord {
    pub handle: DeviceHandle,
    pub platform: PlatformHandle,
    pub spec: DeviceSpec,
}

/// Assign handles to the configured topology. Platform and device ids each
/// count from zero in declaration order.
pub(crate) fn build_records(config: HostDriverConfig) -> Vec<PlatformRecord> {
    let mut device_id = 0u64;
    config
        .platforms
        .into_iter()
        .enumerate()
        .map(|(platform_id, mut spec)| {
            let handle = PlatformHandle::new(platform_id as u64);
            let devices = spec
                .devices
                .drain(..)
                .map(|device_spec| {
                    let record = DeviceRecord {
                        handle: DeviceHandle::new(device_id),
                        platform: handle,
                        spec: device_spec,
                    };
                    device_id += 1;
                    record
                })
                .collect();
            PlatformRecord {
                handle,
                spec,
                devices,
            }
        })
        .collect()
}

// ================================================================================================
// Attribute encoding
// ================================================================================================

fn encode_text(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

fn encode_extensions(extensions: &[String]) -> Vec<u8> {
    encode_text(&extensions.join(" "))
}

fn encode_u32(v: u32) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

fn encode_u64(v: u64) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

fn encode_bool(v: bool) -> Vec<u8> {
    vec![u8::from(v)]
}

fn encode_sizes(sizes: &[usize]) -> Vec<u8> {
    sizes.iter().flat_map(|s| (*s as u64).to_le_bytes()).collect()
}

impl PlatformRecord {
    pub(crate) fn attribute(&self, key: InfoKey) -> Result<Vec<u8>> {
        let value = match key {
            InfoKey::PlatformName => encode_text(&self.spec.name),
            InfoKey::PlatformVendor => encode_text(&self.spec.vendor),
            InfoKey::PlatformVersion => encode_text(&self.spec.version),
            InfoKey::PlatformProfile => encode_text(&self.spec.profile),
            InfoKey::PlatformExtensions => encode_extensions(&self.spec.extensions),
            other => {
                return Err(DriverError::unsupported_attribute(
                    other,
                    crate::driver::types::AttrTarget::Platform(self.handle),
                ))
            }
        };
        Ok(value)
    }
}

impl DeviceRecord {
    pub(crate) fn attribute(&self, key: InfoKey) -> Result<Vec<u8>> {
        let value = match key {
            InfoKey::DeviceType => encode_u64(self.spec.device_type.0),
            InfoKey::DeviceName => encode_text(&self.spec.name),
            InfoKey::DeviceVendor => encode_text(&self.spec.vendor),
            InfoKey::DeviceComputeUnits => encode_u32(self.spec.compute_units),
            InfoKey::DeviceGlobalMemSize => encode_u64(self.spec.global_mem_size),
            InfoKey::DeviceLocalMemSize => encode_u64(self.spec.local_mem_size),
            InfoKey::DeviceMaxAllocSize => encode_u64(self.spec.max_alloc_size),
            InfoKey::DeviceMaxWorkGroupSize => encode_u64(self.spec.max_work_group_size as u64),
            InfoKey::DeviceMaxWorkItemDimensions => encode_u32(3),
            InfoKey::DeviceMaxWorkItemSizes => encode_sizes(&self.spec.max_work_item_sizes),
            InfoKey::DeviceExtensions => encode_extensions(&self.spec.extensions),
            InfoKey::DeviceAvailable => encode_bool(self.spec.available),
            InfoKey::DevicePlatform => encode_u64(self.platform.id()),
            other => {
                return Err(DriverError::unsupported_attribute(
                    other,
                    crate::driver::types::AttrTarget::Device(self.handle),
                ))
            }
        };
        Ok(value)
    }
}
