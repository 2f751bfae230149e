use std::{fmt, io, sync::Arc};

/// A trait for interacting with device hardware through CSR operations.
pub trait DeviceAdaptor: Send + Sync + fmt::Debug {
    /// Reads from a CSR at the specified address.
    ///
    /// # Arguments
    ///
    /// * `addr` - Byte offset of the CSR inside the register window
    ///
    /// # Errors
    ///
    /// Returns an error if the read operation fails
    fn read_csr(&self, addr: u64) -> io::Result<u32>;

    /// Writes data to a Control and Status Register at the specified address.
    ///
    /// # Arguments
    ///
    /// * `addr` - Byte offset of the CSR inside the register window
    /// * `data` - The 32-bit data value to write to the register
    ///
    /// # Errors
    ///
    /// Returns an error if the write operation fails
    fn write_csr(&self, addr: u64, data: u32) -> io::Result<()>;
}

/// Device adaptor shared by every accessor of one card
pub type SharedDevice = Arc<dyn DeviceAdaptor>;

impl<T: DeviceAdaptor + ?Sized> DeviceAdaptor for Arc<T> {
    fn read_csr(&self, addr: u64) -> io::Result<u32> {
        (**self).read_csr(addr)
    }

    fn write_csr(&self, addr: u64, data: u32) -> io::Result<()> {
        (**self).write_csr(addr, data)
    }
}

impl<T: DeviceAdaptor + ?Sized> DeviceAdaptor for &T {
    fn read_csr(&self, addr: u64) -> io::Result<u32> {
        (**self).read_csr(addr)
    }

    fn write_csr(&self, addr: u64, data: u32) -> io::Result<()> {
        (**self).write_csr(addr, data)
    }
}
