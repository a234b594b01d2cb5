//! Raw ICMPv6 and bound UDP datagram transport

use crate::icmp6_filter::Icmp6Filter;
use crate::transport::{ReplyFilter, Transport};
use parking_lot::Mutex;
use sixscan_core::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::mem::MaybeUninit;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

const RECV_BUF: usize = 4096;
const POLL_MS: libc::c_int = 1000;

/// Readable-poll with the shutdown-bounding one-second timeout.
fn poll_readable(sock: &Socket) -> std::io::Result<bool> {
    let mut fds = libc::pollfd {
        fd: sock.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let rc = unsafe { libc::poll(&mut fds, 1, POLL_MS) };
    match rc {
        -1 => {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                Ok(false)
            } else {
                Err(err)
            }
        }
        0 => Ok(false),
        _ => Ok(fds.revents & libc::POLLIN != 0),
    }
}

/// One datagram probe; `hop_limit` selects `IPV6_UNICAST_HOPS` for the send
#[derive(Debug, Clone)]
pub struct DgramProbe {
    pub addr: Ipv6Addr,
    pub port: u16,
    pub payload: Vec<u8>,
    pub hop_limit: Option<u8>,
}

impl DgramProbe {
    pub fn new(addr: Ipv6Addr, port: u16, payload: Vec<u8>) -> Self {
        Self {
            addr,
            port,
            payload,
            hop_limit: None,
        }
    }

    pub fn with_hop_limit(mut self, hop: u8) -> Self {
        self.hop_limit = Some(hop);
        self
    }
}

/// Source address, source port and payload of one received datagram
pub type DgramReply = (Ipv6Addr, u16, Vec<u8>);

/// Non-blocking IPv6 datagram socket
pub struct DgramTransport {
    sock: Socket,
}

impl DgramTransport {
    /// Raw ICMPv6 socket passing only the whitelisted types.
    pub fn icmp6(whitelist: &[u8]) -> Result<Self> {
        let sock = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6))
            .map_err(|e| Error::Network(format!("raw ICMPv6 socket: {}", e)))?;
        sock.set_nonblocking(true)?;
        let mut filter = Icmp6Filter::block_all();
        for ty in whitelist {
            filter.pass(*ty);
        }
        filter.apply(&sock)?;
        Ok(Self { sock })
    }

    /// UDP socket bound to the given address (DHCPv6 binds `[::]:547`).
    pub fn udp(bind: SocketAddrV6) -> Result<Self> {
        let sock = Socket::new(Domain::IPV6, Type::DGRAM, None)
            .map_err(|e| Error::Network(format!("UDP socket: {}", e)))?;
        sock.set_nonblocking(true)?;
        sock.set_reuse_address(true)?;
        sock.bind(&bind.into())
            .map_err(|e| Error::Network(format!("bind {}: {}", bind, e)))?;
        Ok(Self { sock })
    }
}

impl Transport for DgramTransport {
    type Probe = DgramProbe;
    type Reply = DgramReply;

    fn send(&self, probe: &Self::Probe) -> Result<()> {
        if let Some(hops) = probe.hop_limit {
            self.sock.set_unicast_hops_v6(hops as u32)?;
        }
        let dst = SocketAddrV6::new(probe.addr, probe.port, 0, 0);
        self.sock.send_to(&probe.payload, &dst.into())?;
        Ok(())
    }

    fn recv_loop(
        &self,
        done: &AtomicBool,
        filter: &ReplyFilter<Self::Reply>,
        sink: &Mutex<Vec<Self::Reply>>,
    ) -> Result<()> {
        while !done.load(Ordering::Acquire) {
            match poll_readable(&self.sock) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => return Err(Error::Network(format!("poll: {}", e))),
            }
            let mut buf = [MaybeUninit::<u8>::uninit(); RECV_BUF];
            match self.sock.recv_from(&mut buf) {
                Ok((len, src)) => {
                    let bytes: Vec<u8> = buf[..len]
                        .iter()
                        .map(|b| unsafe { b.assume_init() })
                        .collect();
                    let (addr, port) = match src.as_socket() {
                        Some(SocketAddr::V6(sa)) => (*sa.ip(), sa.port()),
                        _ => continue,
                    };
                    let reply = (addr, port, bytes);
                    if filter(&reply) {
                        sink.lock().push(reply);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => {
                    debug!("recv_from: {}", e);
                    continue;
                }
            }
        }
        Ok(())
    }
}
