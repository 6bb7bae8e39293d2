use std::io;
use std::net::Ipv4Addr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Port `{0}` is invalid")]
    InvalidPort(String),
    #[error("Failed to check target kind (ensure it's a domain or IPv4). Origin: {0}")]
    HostParseFailed(#[source] url::ParseError),
    #[error("Failed to resolve the given target. Origin: {0}")]
    ResolverFailed(#[source] io::Error),
    #[error("Resolver didn't find any IPv4 address mapped by `{0}`")]
    DomainLookupFailed(String),
    #[error("Only supports IPv4 addresses or domains that map addresses with this IP version")]
    OnlyIpv4TargetSupported,
    #[error("You must run the scanner as sudo")]
    NormalUserRequired,
    #[error("Retries must be at least 1")]
    InvalidRetries,
    #[error("Rate must be greater than zero probes per second")]
    InvalidRate,
    #[error("Failed to probe a route towards `{0}`. Origin: {1}")]
    RouteProbeFailed(Ipv4Addr, #[source] io::Error),
    #[error("No network interface owns the source address `{0}`")]
    InterfaceLookupFailed(Ipv4Addr),
    #[error("Failed to open capture on interface `{0}`. Origin: {1}")]
    CaptureOpenFailed(String, #[source] pcap::Error),
    #[error("Failed to install the capture filter. Origin: {0}")]
    FilterInstallFailed(#[source] pcap::Error),
    #[error("Failed to reserve a source port for the scan. Origin: {0}")]
    PortReserveFailed(#[source] io::Error),
    #[error("Failed to open raw socket (TCP over IPv4). Origin: {0}")]
    RawSocketFailed(#[source] io::Error),
}
