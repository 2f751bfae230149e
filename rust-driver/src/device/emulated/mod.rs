#![allow(clippy::module_name_repetitions)]

/// Csr client implementation
mod csr;

use std::{
    io,
    net::{SocketAddr, ToSocketAddrs},
};

use csr::RpcClient;

use super::DeviceAdaptor;

/// Register window of a simulated card, reached over UDP.
///
/// Each access is one JSON datagram; reads wait for the simulator's reply.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct EmulatedDevice(RpcClient);

impl EmulatedDevice {
    /// Connects to the register simulator at `rpc_server_addr`
    ///
    /// # Errors
    /// Returns an error if the local socket cannot be bound or connected
    pub fn connect(rpc_server_addr: impl ToSocketAddrs) -> io::Result<Self> {
        RpcClient::new(rpc_server_addr).map(Self)
    }

    /// Address of the simulator
    ///
    /// # Errors
    /// Returns an error if the socket is not connected
    pub fn server_addr(&self) -> io::Result<SocketAddr> {
        self.0.peer_addr()
    }
}

impl DeviceAdaptor for EmulatedDevice {
    fn read_csr(&self, addr: u64) -> io::Result<u32> {
        self.0.read_csr(addr)
    }

    fn write_csr(&self, addr: u64, data: u32) -> io::Result<()> {
        self.0.write_csr(addr, data)
    }
}
