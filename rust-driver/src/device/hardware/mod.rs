use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use pci_driver::{
    backends::vfio::VfioPciDevice,
    device::PciDevice,
    regions::{MappedOwningPciRegion, PciRegion, Permissions},
};
use pci_info::PciInfo;
use std::{
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    config::{PciBackend, PciConfig},
    constants::{BAR_MAP_RANGE_END, PCI_SYSFS_BUS_PATH, VENDER_ID},
};

use super::{DeviceAdaptor, SharedDevice};

/// Register window accessed through the VFIO backend
#[derive(Clone, Debug)]
pub struct VfioPciCsrAdaptor {
    bar: Arc<MappedOwningPciRegion>,
}

impl VfioPciCsrAdaptor {
    /// Opens the device through VFIO and maps BAR `bar_index`
    ///
    /// # Errors
    /// Returns an error if the device cannot be opened or has no such BAR
    pub fn new(sysfs_path: impl AsRef<Path>, bar_index: usize) -> io::Result<Self> {
        let path = sysfs_path.as_ref();
        let device = VfioPciDevice::open(path).map_err(|err| {
            io::Error::new(
                io::ErrorKind::Other,
                format!("Failed to open sysfs_path: {err}"),
            )
        })?;
        let bar = device.bar(bar_index).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "Expected device to have BAR")
        })?;
        let mapped_bar = bar.map(..BAR_MAP_RANGE_END, Permissions::ReadWrite)?;
        Ok(Self {
            bar: Arc::new(mapped_bar),
        })
    }
}

impl DeviceAdaptor for VfioPciCsrAdaptor {
    fn read_csr(&self, addr: u64) -> io::Result<u32> {
        self.bar.read_le_u32(addr)
    }

    fn write_csr(&self, addr: u64, data: u32) -> io::Result<()> {
        self.bar.write_le_u32(addr, data)
    }
}

/// Register window mapped from the sysfs `resourceN` file
#[derive(Clone, Debug)]
pub struct SysfsPciCsrAdaptor {
    bar: Arc<Mutex<MmapMut>>,
}

#[allow(unsafe_code)]
impl SysfsPciCsrAdaptor {
    /// Maps BAR `bar_index` of the device at `sysfs_path`
    ///
    /// # Errors
    /// Returns an error if the resource file cannot be opened or mapped
    pub fn new(sysfs_path: impl AsRef<Path>, bar_index: usize) -> io::Result<Self> {
        let bar_path = sysfs_path.as_ref().join(format!("resource{bar_index}"));
        let file = OpenOptions::new().read(true).write(true).open(&bar_path)?;
        // SAFETY: the resource file is a device BAR; it is never truncated while mapped
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        Ok(Self {
            bar: Arc::new(Mutex::new(mmap)),
        })
    }

    fn check(addr: u64, len: usize) -> io::Result<usize> {
        let offset = usize::try_from(addr)
            .map_err(|_err| io::Error::new(io::ErrorKind::InvalidInput, "address overflow"))?;
        if offset % 4 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unaligned access",
            ));
        }
        if offset.saturating_add(4) > len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "access outside register window",
            ));
        }
        Ok(offset)
    }
}

#[allow(unsafe_code, clippy::cast_ptr_alignment)]
impl DeviceAdaptor for SysfsPciCsrAdaptor {
    fn read_csr(&self, addr: u64) -> io::Result<u32> {
        let bar = self.bar.lock();
        let offset = Self::check(addr, bar.len())?;
        // SAFETY: offset is aligned and inside the mapping
        unsafe {
            let ptr = bar.as_ptr().add(offset);
            Ok(ptr.cast::<u32>().read_volatile())
        }
    }

    fn write_csr(&self, addr: u64, data: u32) -> io::Result<()> {
        let mut bar = self.bar.lock();
        let offset = Self::check(addr, bar.len())?;
        // SAFETY: offset is aligned and inside the mapping
        unsafe {
            let ptr = bar.as_mut_ptr().add(offset);
            ptr.cast::<u32>().write_volatile(data);
        }

        Ok(())
    }
}

/// A capture card located on the PCI bus
#[derive(Debug, Clone)]
pub struct PciHwDevice {
    sysfs_path: PathBuf,
    bar_index: usize,
}

impl PciHwDevice {
    /// Uses the device at `sysfs_path`
    pub fn new(sysfs_path: impl AsRef<Path>, bar_index: usize) -> Self {
        Self {
            sysfs_path: sysfs_path.as_ref().into(),
            bar_index,
        }
    }

    /// Opens the device selected by `config`, discovering one if no path is set
    ///
    /// # Errors
    /// Returns an error if enumeration fails or no card is present
    pub fn open(config: &PciConfig) -> io::Result<Self> {
        if let Some(ref path) = config.sysfs_path {
            return Ok(Self::new(path, config.bar_index));
        }
        let build_err = || io::Error::new(io::ErrorKind::NotFound, "Failed to open device");
        let info = PciInfo::enumerate_pci().map_err(|_err| build_err())?;
        let device = info
            .iter()
            .flatten()
            .find(|d| d.vendor_id() == VENDER_ID)
            .ok_or_else(build_err)?;
        let location = device.location().map_err(|_err| build_err())?;
        let sysfs_path = PathBuf::from(PCI_SYSFS_BUS_PATH).join(location.to_string());
        log::info!(
            "found capture card {:04x}:{:04x} at {}",
            device.vendor_id(),
            device.device_id(),
            sysfs_path.display()
        );

        Ok(Self {
            sysfs_path,
            bar_index: config.bar_index,
        })
    }

    /// Sysfs directory of the device
    pub fn sysfs_path(&self) -> &Path {
        &self.sysfs_path
    }

    /// Issues a PCI function reset
    ///
    /// # Errors
    /// Returns an error if the reset file cannot be written
    pub fn reset(&self) -> io::Result<()> {
        log::info!("resetting {}", self.sysfs_path.display());
        let path = self.sysfs_path.join("reset");
        fs::write(path, "1")
    }

    /// Maps the register window through `backend`
    ///
    /// # Errors
    /// Returns an error if the BAR cannot be mapped
    pub fn adaptor(&self, backend: PciBackend) -> io::Result<SharedDevice> {
        Ok(match backend {
            PciBackend::Sysfs => Arc::new(self.new_adaptor()?),
            PciBackend::Vfio => Arc::new(self.new_vfio_adaptor()?),
        })
    }

    /// Maps the register window
    ///
    /// # Errors
    /// Returns an error if the BAR cannot be mapped
    pub fn new_adaptor(&self) -> io::Result<SysfsPciCsrAdaptor> {
        SysfsPciCsrAdaptor::new(&self.sysfs_path, self.bar_index)
    }

    /// Maps the register window through VFIO
    ///
    /// # Errors
    /// Returns an error if the device is not bound to vfio-pci
    pub fn new_vfio_adaptor(&self) -> io::Result<VfioPciCsrAdaptor> {
        VfioPciCsrAdaptor::new(&self.sysfs_path, self.bar_index)
    }
}
