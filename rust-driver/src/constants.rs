/// PCI vendor id of the capture cards
pub(crate) const VENDER_ID: u16 = 0x121a;
/// Sysfs directory holding PCI devices
pub(crate) const PCI_SYSFS_BUS_PATH: &str = "/sys/bus/pci/devices";
/// BAR holding the register window
pub(crate) const BAR_INDEX: usize = 0;
/// Length of the mapped register window
pub(crate) const BAR_MAP_RANGE_END: u64 = 0x10000;

/// Offset of the first enumeration table entry in the register window
pub(crate) const ENUM_TABLE_BASE: u64 = 0x0;
/// Upper bound on enumeration entries scanned
pub(crate) const MAX_ENUM_ENTRIES: usize = 256;
/// Module code terminating the enumeration table
pub(crate) const ENUM_TABLE_END: u8 = 0xff;
