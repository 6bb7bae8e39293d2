use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use pnet::{datalink, util::MacAddr};

use crate::error::ScanError;

// Any port works: connecting a datagram socket never puts bytes on the wire,
// it only runs the kernel's route lookup.
const PROBE_PORT: u16 = 12345;

pub(super) struct Egress {
    pub ip: Ipv4Addr,
    pub device: String,
    pub link_layer: bool,
}

/// Learns which local address the kernel would route towards the target and
/// which interface owns it. The interface match is exact on address.
pub(super) fn discover(target: Ipv4Addr) -> Result<Egress, ScanError> {
    let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .map_err(|e| ScanError::RouteProbeFailed(target, e))?;
    probe
        .connect((target, PROBE_PORT))
        .map_err(|e| ScanError::RouteProbeFailed(target, e))?;

    let ip = match probe
        .local_addr()
        .map_err(|e| ScanError::RouteProbeFailed(target, e))?
        .ip()
    {
        IpAddr::V4(ip) => ip,
        // A datagram socket connected to an IPv4 peer binds an IPv4 address.
        IpAddr::V6(_) => unreachable!(),
    };

    let board = datalink::interfaces()
        .into_iter()
        .find(|i| i.ips.iter().any(|net| net.ip() == IpAddr::V4(ip)))
        .ok_or(ScanError::InterfaceLookupFailed(ip))?;

    // TUN/TAP style devices carry no hardware address and deliver bare IPv4
    // frames on capture.
    let link_layer = board.mac.map_or(false, |mac| mac != MacAddr::zero());

    log::debug!(
        "Routing probes towards `{}` from `{}` through interface `{}`",
        target,
        ip,
        board.name
    );

    Ok(Egress {
        ip,
        device: board.name,
        link_layer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_route_resolves_to_loopback_device() {
        let egress = discover(Ipv4Addr::LOCALHOST).unwrap();

        assert_eq!(egress.ip, Ipv4Addr::LOCALHOST);
        assert!(!egress.device.is_empty());
    }
}
