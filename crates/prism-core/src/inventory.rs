//! Platform discovery and device inventory
//!
//! [`Host`] is the entry point of the crate: it wraps a [`ComputeDriver`]
//! and exposes the platforms the driver reports. Discovery runs once per
//! host and is cached, so repeated calls return the same snapshot. Attribute
//! queries decode through the capability registry; a driver fault or a
//! malformed payload surfaces as [`Error::InfoUnavailable`] and never
//! invalidates the rest of the inventory.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::registry::{self, InfoValue};
use prism_driver::{
    AttrTarget, ComputeDriver, DeviceHandle, DeviceTypeMask, InfoKey, PlatformHandle,
};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Root of the dispatch layer: a driver plus its discovered platforms.
pub struct Host {
    driver: Arc<dyn ComputeDriver>,
    platforms: OnceLock<Vec<Platform>>,
}

impl Host {
    pub fn new(driver: Arc<dyn ComputeDriver>) -> Self {
        Self {
            driver,
            platforms: OnceLock::new(),
        }
    }

    /// Platforms reported by the driver. The first successful discovery is
    /// cached for the lifetime of the host.
    pub fn platforms(&self) -> Result<&[Platform]> {
        if let Some(platforms) = self.platforms.get() {
            return Ok(platforms);
        }
        let discovered = self.discover()?;
        Ok(self.platforms.get_or_init(|| discovered))
    }

    fn discover(&self) -> Result<Vec<Platform>> {
        let handles = self.driver.enumerate_platforms()?;
        tracing::debug!(platform_count = handles.len(), "platforms_discovered");
        Ok(handles
            .into_iter()
            .map(|handle| Platform {
                driver: Arc::clone(&self.driver),
                handle,
            })
            .collect())
    }

    /// Create a context over an explicit device selection.
    ///
    /// The list must be non-empty and every device must belong to
    /// `platform`, otherwise the call fails with [`Error::InvalidDevice`].
    #[tracing::instrument(skip(self, platform, devices), fields(platform = %platform.handle(), device_count = devices.len()))]
    pub fn create_context(&self, platform: &Platform, devices: &[Device]) -> Result<Context> {
        if devices.is_empty() {
            return Err(Error::invalid_device("context requires at least one device"));
        }
        for device in devices {
            if device.platform_handle() != platform.handle() {
                return Err(Error::invalid_device(format!(
                    "device {} does not belong to platform {}",
                    device.handle(),
                    platform.handle()
                )));
            }
        }
        Context::create(
            Arc::clone(&self.driver),
            platform.clone(),
            devices.to_vec(),
        )
    }

    /// Create a context over every device on `platform` matching `filter`.
    ///
    /// Fails with [`Error::NoDeviceFound`] when nothing matches.
    pub fn create_context_from_type(
        &self,
        platform: &Platform,
        filter: DeviceTypeMask,
    ) -> Result<Context> {
        let devices = platform.devices(filter)?;
        self.create_context(platform, &devices)
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("discovered", &self.platforms.get().map(Vec::len))
            .finish()
    }
}

/// One platform of the inventory. Cheap to clone.
#[derive(Clone)]
pub struct Platform {
    driver: Arc<dyn ComputeDriver>,
    handle: PlatformHandle,
}

impl Platform {
    pub fn handle(&self) -> PlatformHandle {
        self.handle
    }

    /// Raw registry-decoded attribute query.
    pub fn info(&self, key: InfoKey) -> Result<InfoValue> {
        let raw = self
            .driver
            .query_attribute(AttrTarget::Platform(self.handle), key)
            .map_err(|err| Error::info_unavailable(key, self.handle, err.to_string()))?;
        registry::decode(self.handle, key, &raw)
    }

    pub fn name(&self) -> Result<String> {
        self.text_info(InfoKey::PlatformName)
    }

    pub fn vendor(&self) -> Result<String> {
        self.text_info(InfoKey::PlatformVendor)
    }

    pub fn version(&self) -> Result<String> {
        self.text_info(InfoKey::PlatformVersion)
    }

    pub fn profile(&self) -> Result<String> {
        self.text_info(InfoKey::PlatformProfile)
    }

    pub fn extensions(&self) -> Result<Vec<String>> {
        let joined = self.text_info(InfoKey::PlatformExtensions)?;
        Ok(joined.split_whitespace().map(str::to_string).collect())
    }

    /// Devices of this platform matching `filter`.
    ///
    /// An empty match is [`Error::NoDeviceFound`]; the platform itself
    /// stays usable.
    pub fn devices(&self, filter: DeviceTypeMask) -> Result<Vec<Device>> {
        let handles = self.driver.enumerate_devices(self.handle, filter)?;
        if handles.is_empty() {
            return Err(Error::NoDeviceFound {
                platform: self.handle,
                filter,
            });
        }
        tracing::debug!(
            platform = %self.handle,
            %filter,
            device_count = handles.len(),
            "devices_enumerated"
        );
        Ok(handles
            .into_iter()
            .map(|handle| Device {
                driver: Arc::clone(&self.driver),
                handle,
                platform: self.handle,
            })
            .collect())
    }

    fn text_info(&self, key: InfoKey) -> Result<String> {
        self.info(key)?
            .into_text()
            .ok_or_else(|| Error::info_unavailable(key, self.handle, "unexpected value kind"))
    }
}

impl PartialEq for Platform {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for Platform {}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform").field("handle", &self.handle).finish()
    }
}

/// One device of the inventory. Cheap to clone; remembers the platform it
/// was enumerated from.
#[derive(Clone)]
pub struct Device {
    driver: Arc<dyn ComputeDriver>,
    handle: DeviceHandle,
    platform: PlatformHandle,
}

impl Device {
    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    /// Platform this device was enumerated from.
    pub fn platform_handle(&self) -> PlatformHandle {
        self.platform
    }

    /// Raw registry-decoded attribute query.
    pub fn info(&self, key: InfoKey) -> Result<InfoValue> {
        let raw = self
            .driver
            .query_attribute(AttrTarget::Device(self.handle), key)
            .map_err(|err| Error::info_unavailable(key, self.handle, err.to_string()))?;
        registry::decode(self.handle, key, &raw)
    }

    pub fn name(&self) -> Result<String> {
        self.text_info(InfoKey::DeviceName)
    }

    pub fn vendor(&self) -> Result<String> {
        self.text_info(InfoKey::DeviceVendor)
    }

    pub fn device_type(&self) -> Result<DeviceTypeMask> {
        self.info(InfoKey::DeviceType)?
            .into_type_mask()
            .ok_or_else(|| self.kind_mismatch(InfoKey::DeviceType))
    }

    pub fn compute_units(&self) -> Result<u32> {
        self.u32_info(InfoKey::DeviceComputeUnits)
    }

    pub fn global_mem_size(&self) -> Result<u64> {
        self.u64_info(InfoKey::DeviceGlobalMemSize)
    }

    pub fn local_mem_size(&self) -> Result<u64> {
        self.u64_info(InfoKey::DeviceLocalMemSize)
    }

    /// Largest single allocation the device accepts, in bytes.
    pub fn max_alloc_size(&self) -> Result<u64> {
        self.u64_info(InfoKey::DeviceMaxAllocSize)
    }

    /// Upper bound on the volume of one work-group.
    pub fn max_work_group_size(&self) -> Result<usize> {
        Ok(self.u64_info(InfoKey::DeviceMaxWorkGroupSize)? as usize)
    }

    pub fn max_work_item_dimensions(&self) -> Result<u32> {
        self.u32_info(InfoKey::DeviceMaxWorkItemDimensions)
    }

    pub fn max_work_item_sizes(&self) -> Result<Vec<usize>> {
        self.info(InfoKey::DeviceMaxWorkItemSizes)?
            .into_size_list()
            .ok_or_else(|| self.kind_mismatch(InfoKey::DeviceMaxWorkItemSizes))
    }

    pub fn extensions(&self) -> Result<Vec<String>> {
        let joined = self.text_info(InfoKey::DeviceExtensions)?;
        Ok(joined.split_whitespace().map(str::to_string).collect())
    }

    pub fn available(&self) -> Result<bool> {
        self.info(InfoKey::DeviceAvailable)?
            .into_bool()
            .ok_or_else(|| self.kind_mismatch(InfoKey::DeviceAvailable))
    }

    fn text_info(&self, key: InfoKey) -> Result<String> {
        self.info(key)?
            .into_text()
            .ok_or_else(|| self.kind_mismatch(key))
    }

    fn u32_info(&self, key: InfoKey) -> Result<u32> {
        self.info(key)?
            .into_u32()
            .ok_or_else(|| self.kind_mismatch(key))
    }

    fn u64_info(&self, key: InfoKey) -> Result<u64> {
        self.info(key)?
            .into_u64()
            .ok_or_else(|| self.kind_mismatch(key))
    }

    fn kind_mismatch(&self, key: InfoKey) -> Error {
        Error::info_unavailable(key, self.handle, "unexpected value kind")
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for Device {}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.handle)
            .field("platform", &self.platform)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_driver::ScriptedDriver;
    use prism_driver::HostDriver;

    fn host() -> Host {
        Host::new(Arc::new(HostDriver::new()))
    }

    #[test]
    fn test_discovery_is_cached() {
        let host = host();
        let first = host.platforms().unwrap().as_ptr();
        let second = host.platforms().unwrap().as_ptr();
        assert_eq!(first, second);
    }

    #[test]
    fn test_platform_attributes() {
        let host = host();
        let platform = &host.platforms().unwrap()[0];
        assert_eq!(platform.name().unwrap(), "Prism Host Platform");
        assert_eq!(platform.vendor().unwrap(), "Prism");
        assert_eq!(platform.version().unwrap(), "PRISM 1.0");
        assert_eq!(platform.profile().unwrap(), "FULL_PROFILE");
        assert!(platform.extensions().unwrap().is_empty());
    }

    #[test]
    fn test_device_filter() {
        let host = host();
        let platform = &host.platforms().unwrap()[0];
        let all = platform.devices(DeviceTypeMask::ALL).unwrap();
        assert_eq!(all.len(), 2);
        let gpus = platform.devices(DeviceTypeMask::GPU).unwrap();
        assert_eq!(gpus.len(), 1);
        assert_eq!(gpus[0].name().unwrap(), "Emulated GPU");
    }

    #[test]
    fn test_empty_filter_is_no_device_found() {
        let host = host();
        let platform = &host.platforms().unwrap()[0];
        let err = platform.devices(DeviceTypeMask::ACCELERATOR).unwrap_err();
        assert!(matches!(err, Error::NoDeviceFound { .. }));
        // The platform is still usable afterwards.
        assert!(platform.devices(DeviceTypeMask::CPU).is_ok());
    }

    #[test]
    fn test_device_attributes() {
        let host = host();
        let platform = &host.platforms().unwrap()[0];
        let cpu = &platform.devices(DeviceTypeMask::CPU).unwrap()[0];
        assert_eq!(cpu.name().unwrap(), "Host CPU");
        assert_eq!(cpu.compute_units().unwrap(), 8);
        assert_eq!(cpu.max_work_group_size().unwrap(), 1024);
        assert_eq!(cpu.max_work_item_dimensions().unwrap(), 3);
        assert_eq!(cpu.max_work_item_sizes().unwrap(), vec![1024, 1024, 1024]);
        assert!(cpu.available().unwrap());
        assert!(cpu.device_type().unwrap().intersects(DeviceTypeMask::CPU));
    }

    #[test]
    fn test_device_platform_back_reference() {
        let host = host();
        let platform = &host.platforms().unwrap()[0];
        for device in platform.devices(DeviceTypeMask::ALL).unwrap() {
            let back = device
                .info(InfoKey::DevicePlatform)
                .unwrap()
                .into_platform()
                .unwrap();
            assert_eq!(back, device.platform_handle());
            assert_eq!(back, platform.handle());
        }
    }

    #[test]
    fn test_failed_query_is_info_unavailable() {
        let driver = ScriptedDriver::new().with_failing_key(InfoKey::DeviceLocalMemSize);
        let host = Host::new(Arc::new(driver));
        let platform = &host.platforms().unwrap()[0];
        let device = &platform.devices(DeviceTypeMask::ALL).unwrap()[0];
        let err = device.local_mem_size().unwrap_err();
        assert!(matches!(err, Error::InfoUnavailable { .. }));
        // Other keys on the same device still answer.
        assert_eq!(device.compute_units().unwrap(), 4);
    }
}
