//! Capture transport: raw IPv6 send plus BPF-filtered live capture
//!
//! Probes are fully serialized IPv6 packets. The send path pushes them
//! through a raw `IPPROTO_RAW` socket with `IPV6_HDRINCL`, bound to the scan
//! interface so the kernel cannot route them elsewhere; a probe the kernel
//! refuses to route over that interface is dropped with a warning. The
//! receive path opens a non-promiscuous pcap handle with the scanner's BPF
//! filter installed and hands raw frames to the results queue.

use crate::interface;
use crate::transport::{ReplyFilter, Transport};
use parking_lot::Mutex;
use sixscan_core::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv6Addr, SocketAddrV6};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

const POLL_MS: i32 = 1000;

/// BPF filter template with named `{placeholder}` substitution
#[derive(Debug, Clone, Copy)]
pub struct FilterTemplate(pub &'static str);

impl FilterTemplate {
    /// Render the template, replacing each `{name}` with its value.
    pub fn render(&self, context: &[(&str, String)]) -> String {
        let mut out = self.0.to_string();
        for (name, value) in context {
            out = out.replace(&format!("{{{}}}", name), value);
        }
        out
    }
}

/// Raw-send / live-capture transport bound to one interface
pub struct CaptureTransport {
    iface: String,
    filter: String,
    source: Ipv6Addr,
    sock: Socket,
}

impl CaptureTransport {
    pub fn new(iface: Option<&str>, filter: String) -> Result<Self> {
        let iface = match iface {
            Some(name) => name.to_string(),
            None => interface::default_interface()?,
        };
        let source = interface::source_addr(&iface)?;

        let sock = Socket::new(
            Domain::IPV6,
            Type::RAW,
            Some(Protocol::from(libc::IPPROTO_RAW)),
        )
        .map_err(|e| Error::Network(format!("raw IPv6 socket: {}", e)))?;
        set_hdrincl(&sock)?;
        sock.bind_device(Some(iface.as_bytes()))
            .map_err(|e| Error::Network(format!("bind to {}: {}", iface, e)))?;

        Ok(Self {
            iface,
            filter,
            source,
            sock,
        })
    }

    /// Interface the sniffer and the bound send socket use
    pub fn interface(&self) -> &str {
        &self.iface
    }

    /// Source address for crafted packets
    pub fn source(&self) -> Ipv6Addr {
        self.source
    }

    fn open_sniffer(&self) -> Result<pcap::Capture<pcap::Active>> {
        let mut cap = pcap::Capture::from_device(self.iface.as_str())
            .map_err(|e| Error::Network(format!("pcap device {}: {}", self.iface, e)))?
            .promisc(false)
            .snaplen(65535)
            .timeout(POLL_MS)
            .open()
            .map_err(|e| Error::Network(format!("pcap open {}: {}", self.iface, e)))?;
        cap.filter(&self.filter, true)
            .map_err(|e| Error::Network(format!("bpf filter {:?}: {}", self.filter, e)))?;
        Ok(cap)
    }
}

fn set_hdrincl(sock: &Socket) -> Result<()> {
    let on: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            sock.as_raw_fd(),
            libc::IPPROTO_IPV6,
            libc::IPV6_HDRINCL,
            &on as *const _ as *const libc::c_void,
            std::mem::size_of_val(&on) as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

fn packet_dest(packet: &[u8]) -> Option<Ipv6Addr> {
    if packet.len() < 40 || packet[0] >> 4 != 6 {
        return None;
    }
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&packet[24..40]);
    Some(Ipv6Addr::from(octets))
}

impl Transport for CaptureTransport {
    type Probe = Vec<u8>;
    type Reply = Vec<u8>;

    fn send(&self, probe: &Self::Probe) -> Result<()> {
        let dst = packet_dest(probe)
            .ok_or_else(|| Error::Packet("probe is not an IPv6 packet".to_string()))?;
        let sockaddr = SocketAddrV6::new(dst, 0, 0, 0);
        match self.sock.send_to(probe, &sockaddr.into()) {
            Ok(_) => Ok(()),
            Err(e)
                if matches!(
                    e.raw_os_error(),
                    Some(libc::ENETUNREACH) | Some(libc::EHOSTUNREACH)
                ) =>
            {
                warn!("dst not routed via {}: {}", self.iface, dst);
                Ok(())
            }
            Err(e) => Err(Error::Network(format!("raw send to {}: {}", dst, e))),
        }
    }

    fn recv_loop(
        &self,
        done: &AtomicBool,
        filter: &ReplyFilter<Self::Reply>,
        sink: &Mutex<Vec<Self::Reply>>,
    ) -> Result<()> {
        let mut sniffer = self.open_sniffer()?;
        while !done.load(Ordering::Acquire) {
            match sniffer.next_packet() {
                Ok(packet) => {
                    let frame = packet.data.to_vec();
                    if filter(&frame) {
                        sink.lock().push(frame);
                    }
                }
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(e) => {
                    debug!("capture on {}: {}", self.iface, e);
                    continue;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_render() {
        let template = FilterTemplate("ip6 and tcp dst port {port} and ip6 src {target}");
        let rendered = template.render(&[
            ("port", "4242".to_string()),
            ("target", "2001:db8::1".to_string()),
        ]);
        assert_eq!(rendered, "ip6 and tcp dst port 4242 and ip6 src 2001:db8::1");
    }

    #[test]
    fn test_packet_dest() {
        let mut packet = vec![0u8; 40];
        packet[0] = 0x60;
        packet[24..40].copy_from_slice(&"2001:db8::99".parse::<Ipv6Addr>().unwrap().octets());
        assert_eq!(
            packet_dest(&packet),
            Some("2001:db8::99".parse().unwrap())
        );
        assert_eq!(packet_dest(&packet[..20]), None);
        packet[0] = 0x40;
        assert_eq!(packet_dest(&packet), None);
    }
}
