//! Device families a codelet can target

use std::fmt;

use serde::{Deserialize, Serialize};

/// Compute device family of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Cpu,
    Accelerator,
}

impl DeviceKind {
    pub const fn mask(&self) -> DeviceMask {
        match self {
            DeviceKind::Cpu => DeviceMask::CPU,
            DeviceKind::Accelerator => DeviceMask::ACCELERATOR,
        }
    }

    pub const fn is_accelerator(&self) -> bool {
        matches!(self, DeviceKind::Accelerator)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => f.write_str("cpu"),
            DeviceKind::Accelerator => f.write_str("accelerator"),
        }
    }
}

/// Bitmask over device families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceMask(u32);

impl DeviceMask {
    pub const NONE: DeviceMask = DeviceMask(0);
    pub const CPU: DeviceMask = DeviceMask(1);
    pub const ACCELERATOR: DeviceMask = DeviceMask(1 << 1);
    pub const ALL: DeviceMask = DeviceMask(0b11);

    pub const fn from_bits(bits: u32) -> Self {
        DeviceMask(bits & Self::ALL.0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, kind: DeviceKind) -> bool {
        self.0 & kind.mask().0 != 0
    }

    pub const fn intersect(&self, other: DeviceMask) -> DeviceMask {
        DeviceMask(self.0 & other.0)
    }

    pub const fn union(&self, other: DeviceMask) -> DeviceMask {
        DeviceMask(self.0 | other.0)
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl Default for DeviceMask {
    fn default() -> Self {
        DeviceMask::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_operations() {
        assert!(DeviceMask::ALL.contains(DeviceKind::Cpu));
        assert!(DeviceMask::ALL.contains(DeviceKind::Accelerator));
        assert!(!DeviceMask::CPU.contains(DeviceKind::Accelerator));
        assert_eq!(DeviceMask::CPU.intersect(DeviceMask::ACCELERATOR), DeviceMask::NONE);
        assert_eq!(DeviceMask::CPU.union(DeviceMask::ACCELERATOR), DeviceMask::ALL);
        assert_eq!(DeviceMask::from_bits(0xff), DeviceMask::ALL);
    }

    #[test]
    fn test_device_display() {
        assert_eq!(DeviceKind::Cpu.to_string(), "cpu");
        assert!(DeviceKind::Accelerator.is_accelerator());
    }
}
