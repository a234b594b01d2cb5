//! Kernel-side ICMPv6 type filter
//!
//! A 256-bit bitmap (eight 32-bit words) keyed by ICMPv6 type, installed on
//! raw ICMPv6 sockets with the `ICMP6_FILTER` socket option so that only
//! whitelisted types reach userspace. A set bit blocks the type.

use sixscan_core::Result;
use socket2::Socket;
use std::os::fd::AsRawFd;

pub const ICMP6_DEST_UNREACH: u8 = 1;
pub const ICMP6_PACKET_TOO_BIG: u8 = 2;
pub const ICMP6_TIME_EXCEEDED: u8 = 3;
pub const ICMP6_PARAM_PROB: u8 = 4;
pub const ICMP6_ECHO_REQUEST: u8 = 128;
pub const ICMP6_ECHO_REPLY: u8 = 129;

const ICMP6_FILTER: libc::c_int = 1;

/// 256-bit ICMPv6 type bitmap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icmp6Filter {
    data: [u32; 8],
}

impl Icmp6Filter {
    /// A filter passing every type
    pub fn pass_all() -> Self {
        Self { data: [0; 8] }
    }

    /// A filter blocking every type
    pub fn block_all() -> Self {
        Self {
            data: [0xffff_ffff; 8],
        }
    }

    pub fn pass(&mut self, icmp6_type: u8) {
        self.data[(icmp6_type >> 5) as usize] &= !(1u32 << (icmp6_type & 0x1f));
    }

    pub fn block(&mut self, icmp6_type: u8) {
        self.data[(icmp6_type >> 5) as usize] |= 1u32 << (icmp6_type & 0x1f);
    }

    pub fn will_pass(&self, icmp6_type: u8) -> bool {
        self.data[(icmp6_type >> 5) as usize] & (1u32 << (icmp6_type & 0x1f)) == 0
    }

    /// Install the bitmap on a raw ICMPv6 socket.
    pub fn apply(&self, sock: &Socket) -> Result<()> {
        let rc = unsafe {
            libc::setsockopt(
                sock.as_raw_fd(),
                libc::IPPROTO_ICMPV6,
                ICMP6_FILTER,
                self.data.as_ptr() as *const libc::c_void,
                std::mem::size_of_val(&self.data) as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }
}
