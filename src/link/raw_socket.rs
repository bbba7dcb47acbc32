//! AF_PACKET raw socket transport (Linux)
//!
//! The socket is bound to one interface and one ethertype, so the kernel only
//! delivers device-protocol frames; our own register frames still loop back and
//! are rejected by the ingestor's source check. Opening it requires CAP_NET_RAW.

use super::{LinkError, LinkSocket};
use nix::errno::Errno;
use nix::libc;
use nix::net::if_::if_nametoindex;
use nix::sys::socket::{
    AddressFamily, LinkAddr, MsgFlags, SockFlag, SockProtocol, SockType, SockaddrLike, bind,
    recv, send, setsockopt, socket, sockopt,
};
use nix::sys::time::{TimeVal, TimeValLike};
use std::os::fd::{AsRawFd, OwnedFd};
use std::time::Duration;

pub struct RawSocket {
    fd: OwnedFd,
}

impl RawSocket {
    /// Open a raw socket on `interface` receiving only `ethertype` frames
    ///
    /// Receives block for at most `receive_timeout` so callers can poll for
    /// shutdown between frames.
    pub fn open(
        interface: &str,
        ethertype: u16,
        receive_timeout: Duration,
    ) -> Result<Self, LinkError> {
        let ifindex = if_nametoindex(interface)
            .map_err(|_| LinkError::InterfaceNotFound(interface.to_string()))?;

        // Binding below replaces the catch-all protocol with `ethertype`
        let fd = socket(
            AddressFamily::Packet,
            SockType::Raw,
            SockFlag::SOCK_CLOEXEC,
            SockProtocol::EthAll,
        )?;

        let timeout = TimeVal::milliseconds(receive_timeout.as_millis().max(1) as i64);
        setsockopt(&fd, sockopt::ReceiveTimeout, &timeout)?;

        let address = link_address(ifindex, ethertype)?;
        bind(fd.as_raw_fd(), &address)?;

        log::info!(
            "Raw socket bound to {} (ifindex {}, ethertype {:#06X})",
            interface,
            ifindex,
            ethertype
        );

        Ok(Self { fd })
    }
}

fn sockaddr_ll(ifindex: libc::c_uint, ethertype: u16) -> libc::sockaddr_ll {
    libc::sockaddr_ll {
        sll_family: libc::AF_PACKET as libc::c_ushort,
        sll_protocol: ethertype.to_be(),
        sll_ifindex: ifindex as libc::c_int,
        sll_hatype: 0,
        sll_pkttype: 0,
        sll_halen: 0,
        sll_addr: [0; 8],
    }
}

fn link_address(ifindex: libc::c_uint, ethertype: u16) -> Result<LinkAddr, LinkError> {
    let raw = sockaddr_ll(ifindex, ethertype);

    // nix has no safe LinkAddr constructor. SAFETY: the pointer and length
    // describe the fully initialized sockaddr_ll above, which outlives the call.
    let address = unsafe {
        LinkAddr::from_raw(
            (&raw as *const libc::sockaddr_ll).cast::<libc::sockaddr>(),
            Some(std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t),
        )
    };
    address.ok_or(LinkError::Os(Errno::EINVAL))
}

impl LinkSocket for RawSocket {
    fn recv_frame(&self, buf: &mut [u8]) -> Result<Option<usize>, LinkError> {
        match recv(self.fd.as_raw_fd(), buf, MsgFlags::empty()) {
            Ok(len) => Ok(Some(len)),
            // Receive timeout elapsed or a signal interrupted the wait
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn send_frame(&self, frame: &[u8]) -> Result<(), LinkError> {
        let sent = send(self.fd.as_raw_fd(), frame, MsgFlags::empty())?;
        if sent != frame.len() {
            return Err(LinkError::ShortSend {
                sent,
                len: frame.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::ETHERTYPE;

    #[test]
    fn test_bind_address_carries_interface_and_ethertype() {
        let address = link_address(7, ETHERTYPE).unwrap();

        assert_eq!(address.family(), Some(AddressFamily::Packet));
        assert_eq!(address.ifindex(), 7);
        assert_eq!(address.protocol(), ETHERTYPE);
    }

    #[test]
    fn test_sockaddr_protocol_is_network_order() {
        let raw = sockaddr_ll(3, 0x88B5);
        assert_eq!(raw.sll_protocol.to_ne_bytes(), [0x88, 0xB5]);
        assert_eq!(raw.sll_family, libc::AF_PACKET as libc::c_ushort);
    }

    #[test]
    fn test_unknown_interface_is_reported() {
        let result = RawSocket::open("modpanel-none0", ETHERTYPE, Duration::from_millis(10));
        assert!(matches!(result, Err(LinkError::InterfaceNotFound(name)) if name == "modpanel-none0"));
    }
}
