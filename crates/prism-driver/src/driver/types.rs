//! Shared types crossing the driver boundary
//!
//! Everything the dispatch layer and a driver exchange lives here: opaque
//! handles for every entity class, the device-type filter mask, buffer access
//! modes, queue ordering, info-query keys, command descriptors, and kernel
//! argument values. All of it is plain data; behavior stays on either side of
//! the [`ComputeDriver`](crate::ComputeDriver) trait.

use std::fmt;
use std::sync::Arc;

// ================================================================================================
// Opaque handles
// ================================================================================================

macro_rules! driver_handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            /// Create a handle from a raw id
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Get the raw id
            pub const fn id(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

driver_handle!(
    /// Opaque platform identifier, stable for the driver's lifetime
    PlatformHandle,
    "plat"
);
driver_handle!(
    /// Opaque device identifier, owned by exactly one platform
    DeviceHandle,
    "dev"
);
driver_handle!(
    /// Opaque context identifier
    ContextHandle,
    "ctx"
);
driver_handle!(
    /// Opaque device-visible memory region identifier
    BufferHandle,
    "buf"
);
driver_handle!(
    /// Opaque program identifier
    ProgramHandle,
    "prog"
);
driver_handle!(
    /// Opaque kernel entry-point identifier
    KernelHandle,
    "kern"
);
driver_handle!(
    /// Opaque submission-channel identifier
    QueueHandle,
    "queue"
);
driver_handle!(
    /// Opaque completion-event identifier, produced by every submitted command
    EventHandle,
    "evt"
);

// ================================================================================================
// Device classification
// ================================================================================================

/// Bitmask over device classes, usable both as a device's own type and as an
/// enumeration filter.
///
/// A device may carry several bits (the platform's default device is both
/// `DEFAULT` and its hardware class). A filter matches a device when the two
/// masks intersect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceTypeMask(pub u64);

impl DeviceTypeMask {
    /// The platform's preferred device
    pub const DEFAULT: Self = Self(1 << 0);
    /// Host-processor devices
    pub const CPU: Self = Self(1 << 1);
    /// Graphics-processor devices
    pub const GPU: Self = Self(1 << 2);
    /// Dedicated compute accelerators
    pub const ACCELERATOR: Self = Self(1 << 3);
    /// Every device on the platform
    pub const ALL: Self = Self(u64::MAX);

    /// Empty mask, matches nothing
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// True when the two masks share at least one bit
    pub const fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// True when every bit of `other` is set in `self`
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(&self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for DeviceTypeMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Display for DeviceTypeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == u64::MAX {
            return write!(f, "ALL");
        }
        if self.is_empty() {
            return write!(f, "NONE");
        }
        let mut first = true;
        for (bit, name) in [
            (Self::DEFAULT, "DEFAULT"),
            (Self::CPU, "CPU"),
            (Self::GPU, "GPU"),
            (Self::ACCELERATOR, "ACCELERATOR"),
        ] {
            if self.intersects(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

// ================================================================================================
// Buffer access
// ================================================================================================

/// Device-side access contract of a buffer, fixed at creation.
///
/// The mode constrains what kernels may do with the region; host-initiated
/// transfers are unrestricted in direction (inputs are typically created
/// read-only and filled by enqueued writes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Kernels may only read the region
    ReadOnly,
    /// Kernels may only write the region
    WriteOnly,
    /// Kernels may read and write the region
    ReadWrite,
}

impl AccessMode {
    /// Whether kernels may read through this mode
    pub const fn device_readable(&self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    /// Whether kernels may write through this mode
    pub const fn device_writable(&self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read-only"),
            Self::WriteOnly => write!(f, "write-only"),
            Self::ReadWrite => write!(f, "read-write"),
        }
    }
}

// ================================================================================================
// Queue ordering
// ================================================================================================

/// Execution ordering of a submission channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOrdering {
    /// Commands execute in submission order, each implicitly depending on the
    /// previous command's completion
    InOrder,
    /// Commands execute as soon as their explicit prerequisites complete; the
    /// caller owns all ordering
    OutOfOrder,
}

impl fmt::Display for QueueOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InOrder => write!(f, "in-order"),
            Self::OutOfOrder => write!(f, "out-of-order"),
        }
    }
}

// ================================================================================================
// Info queries
// ================================================================================================

/// Identifier of one queryable attribute of a platform or device.
///
/// Raw query results are encoded per attribute kind: UTF-8 for text,
/// little-endian for integers and handle references, one byte for booleans,
/// and a little-endian `u64` sequence for size lists. The capability registry
/// on the dispatch side owns the kind mapping and the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoKey {
    PlatformName,
    PlatformVendor,
    PlatformVersion,
    PlatformProfile,
    PlatformExtensions,
    DeviceType,
    DeviceName,
    DeviceVendor,
    DeviceComputeUnits,
    DeviceGlobalMemSize,
    DeviceLocalMemSize,
    DeviceMaxAllocSize,
    DeviceMaxWorkGroupSize,
    DeviceMaxWorkItemDimensions,
    DeviceMaxWorkItemSizes,
    DeviceExtensions,
    DeviceAvailable,
    DevicePlatform,
}

/// Target of an attribute query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrTarget {
    Platform(PlatformHandle),
    Device(DeviceHandle),
}

impl fmt::Display for AttrTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Platform(h) => write!(f, "{}", h),
            Self::Device(h) => write!(f, "{}", h),
        }
    }
}

// ================================================================================================
// Kernel arguments
// ================================================================================================

/// The closed set of kernel argument slot kinds.
///
/// A kernel's signature declares one kind per positional slot; bindings are
/// checked against the declaration before they reach the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgSlotKind {
    /// Device memory region passed by handle
    Buffer,
    Char,
    Uchar,
    Short,
    Ushort,
    Int,
    Uint,
    Long,
    Ulong,
    Float,
}

impl fmt::Display for ArgSlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Buffer => "buffer",
            Self::Char => "char",
            Self::Uchar => "uchar",
            Self::Short => "short",
            Self::Ushort => "ushort",
            Self::Int => "int",
            Self::Uint => "uint",
            Self::Long => "long",
            Self::Ulong => "ulong",
            Self::Float => "float",
        };
        write!(f, "{}", name)
    }
}

/// A concrete value bound to one kernel argument slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundArg {
    Buffer(BufferHandle),
    Char(i8),
    Uchar(u8),
    Short(i16),
    Ushort(u16),
    Int(i32),
    Uint(u32),
    Long(i64),
    Ulong(u64),
    Float(f32),
}

impl BoundArg {
    /// The slot kind this value satisfies
    pub const fn kind(&self) -> ArgSlotKind {
        match self {
            Self::Buffer(_) => ArgSlotKind::Buffer,
            Self::Char(_) => ArgSlotKind::Char,
            Self::Uchar(_) => ArgSlotKind::Uchar,
            Self::Short(_) => ArgSlotKind::Short,
            Self::Ushort(_) => ArgSlotKind::Ushort,
            Self::Int(_) => ArgSlotKind::Int,
            Self::Uint(_) => ArgSlotKind::Uint,
            Self::Long(_) => ArgSlotKind::Long,
            Self::Ulong(_) => ArgSlotKind::Ulong,
            Self::Float(_) => ArgSlotKind::Float,
        }
    }
}

// ================================================================================================
// Program builds
// ================================================================================================

/// Per-device build state of a program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    /// No build attempted for this device
    None,
    /// A build is currently running for this device
    InProgress,
    /// The last build for this device succeeded
    Success,
    /// The last build for this device failed; the log is populated
    Error,
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::InProgress => write!(f, "in-progress"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Build outcome for one device
#[derive(Debug, Clone)]
pub struct DeviceBuildReport {
    pub device: DeviceHandle,
    pub status: BuildStatus,
    pub log: String,
}

/// Result of resolving a kernel entry point: the driver-side handle plus the
/// declared argument slots in positional order
#[derive(Debug, Clone)]
pub struct KernelInfo {
    pub handle: KernelHandle,
    pub args: Vec<ArgSlotKind>,
}

// ================================================================================================
// Commands
// ================================================================================================

/// A fully-resolved command ready for driver submission.
///
/// Write payloads are shared slices so descriptors stay cheap to clone while
/// a command is in flight.
#[derive(Debug, Clone)]
pub enum CommandDescriptor {
    ReadBuffer {
        buffer: BufferHandle,
        offset: usize,
        len: usize,
    },
    WriteBuffer {
        buffer: BufferHandle,
        offset: usize,
        data: Arc<[u8]>,
    },
    CopyBuffer {
        src: BufferHandle,
        src_offset: usize,
        dst: BufferHandle,
        dst_offset: usize,
        len: usize,
    },
    LaunchKernel {
        kernel: KernelHandle,
        /// Per-dimension global extents, already rounded to work-group
        /// multiples by the dispatch layer
        global: Vec<usize>,
        /// Per-dimension work-group extents, same length as `global`
        local: Vec<usize>,
    },
    /// No device work; completes as soon as it executes
    Marker,
}

impl CommandDescriptor {
    /// Short name for logging
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::ReadBuffer { .. } => "read",
            Self::WriteBuffer { .. } => "write",
            Self::CopyBuffer { .. } => "copy",
            Self::LaunchKernel { .. } => "launch",
            Self::Marker => "marker",
        }
    }
}

/// Payload delivered with a successful command completion
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Bytes produced by a read command, absent for every other kind
    pub read_data: Option<Arc<[u8]>>,
}

impl CommandOutput {
    pub fn with_read_data(data: Vec<u8>) -> Self {
        Self {
            read_data: Some(Arc::from(data)),
        }
    }
}
