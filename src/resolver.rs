use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::net::ToSocketAddrs;

use url::Host;

use crate::error::ScanError;

fn resolve_domain(dmn: &str) -> Result<Ipv4Addr, ScanError> {
    (dmn, 0 /* dummy port */)
        .to_socket_addrs()
        .map_err(ScanError::ResolverFailed)?
        .find_map(|saddr| match saddr {
            SocketAddr::V4(sip) => Some(*sip.ip()),
            SocketAddr::V6(_) => None,
        })
        .ok_or(ScanError::DomainLookupFailed(dmn.into()))
}

pub fn lookup(target: &str) -> Result<Ipv4Addr, ScanError> {
    match Host::parse(target).map_err(ScanError::HostParseFailed)? {
        Host::Ipv4(ip) => Ok(ip),
        Host::Domain(dmn) => {
            let ip = resolve_domain(&dmn)?;

            log::debug!("Found IPv4 `{}` mapped by target `{}`", ip, target);

            Ok(ip)
        }
        Host::Ipv6(_) => Err(ScanError::OnlyIpv4TargetSupported),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_ipv4_literals() {
        let ip = lookup("192.0.2.7").unwrap();

        assert_eq!(ip, Ipv4Addr::new(192, 0, 2, 7));
    }

    #[test]
    fn rejects_ipv6_literals() {
        let err = lookup("[2001:db8::1]").unwrap_err();

        assert!(matches!(err, ScanError::OnlyIpv4TargetSupported));
    }

    #[test]
    fn rejects_garbage() {
        assert!(lookup("not a host at all").is_err());
    }
}
