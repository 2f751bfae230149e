use std::{
    io,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub(super) struct RpcClient(Arc<UdpSocket>);

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct CsrAccessRpcMessage {
    pub(super) is_write: bool,
    pub(super) addr: u64,
    pub(super) value: u32,
}

impl RpcClient {
    pub(super) fn new(server_addr: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(server_addr)?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        Ok(Self(socket.into()))
    }

    pub(super) fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.0.peer_addr()
    }

    pub(super) fn read_csr(&self, addr: u64) -> io::Result<u32> {
        let msg = CsrAccessRpcMessage {
            is_write: false,
            addr,
            value: 0,
        };

        let send_buf = serde_json::to_vec(&msg)?;
        let _: usize = self.0.send(&send_buf)?;

        let mut recv_buf = [0; 128];
        let recv_cnt = self.0.recv(&mut recv_buf)?;
        // the length of CsrAccessRpcMessage is bounded by the buffer
        #[allow(clippy::indexing_slicing)]
        let response = serde_json::from_slice::<CsrAccessRpcMessage>(&recv_buf[..recv_cnt])?;

        Ok(response.value)
    }

    pub(super) fn write_csr(&self, addr: u64, data: u32) -> io::Result<()> {
        let msg = CsrAccessRpcMessage {
            is_write: true,
            addr,
            value: data,
        };

        let send_buf = serde_json::to_vec(&msg)?;
        let _: usize = self.0.send(&send_buf)?;
        Ok(())
    }
}
