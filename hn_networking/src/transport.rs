// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use bytes::Bytes;
use hn_protocol::{wire::MAX_DATAGRAM, AddressFamily};
use std::{io, net::SocketAddr, sync::Arc};
use tokio::{net::UdpSocket, sync::mpsc};

/// Queue depth between the socket reader task and the driver.
const DATAGRAM_CHANNEL_SIZE: usize = 1024;

/// Outbound side of the datagram transport.
///
/// Sends are best-effort and non-blocking; a datagram that cannot be sent
/// right now is dropped and the protocol's timeout machinery recovers.
pub trait DatagramSender: Send + Sync {
    fn try_send_to(&self, datagram: &[u8], target: SocketAddr);
}

/// The UDP transport: a bound socket plus a reader task feeding the driver's
/// inbound channel.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Binds `addr` and spawns the reader task. The returned family is that
    /// of the bound socket; a running node speaks exactly one.
    pub async fn bind(
        addr: SocketAddr,
    ) -> io::Result<(
        Arc<Self>,
        mpsc::Receiver<(Bytes, SocketAddr)>,
        AddressFamily,
    )> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let family = AddressFamily::of(&socket.local_addr()?);

        let (datagram_tx, datagram_rx) = mpsc::channel(DATAGRAM_CHANNEL_SIZE);
        let reader = Arc::clone(&socket);
        let _handle = tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM];
            loop {
                match reader.recv_from(&mut buf).await {
                    Ok((len, from)) => {
                        if datagram_tx
                            .send((Bytes::copy_from_slice(&buf[..len]), from))
                            .await
                            .is_err()
                        {
                            // driver gone, stop reading
                            break;
                        }
                    }
                    Err(err) => {
                        // transient per-datagram errors (e.g. connection
                        // refused bounces) are not fatal to the socket
                        warn!("UDP receive error: {err}");
                    }
                }
            }
        });

        Ok((Arc::new(Self { socket }), datagram_rx, family))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl DatagramSender for UdpTransport {
    fn try_send_to(&self, datagram: &[u8], target: SocketAddr) {
        if let Err(err) = self.socket.try_send_to(datagram, target) {
            trace!("dropping outbound datagram to {target}: {err}");
        }
    }
}
