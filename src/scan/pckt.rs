use std::net::Ipv4Addr;

use pnet::packet::{
    ip::IpNextHeaderProtocols,
    ipv4::{self, MutableIpv4Packet},
    tcp::{ipv4_checksum, MutableTcpPacket, TcpFlags, TcpOption},
};
use rand::{rngs::StdRng, Rng};

const IPV4_HDR_SZ: usize = 20;
const IPV4_HDR_WORDS: u8 = (IPV4_HDR_SZ / 4) as u8;
const IPV4_TTL: u8 = 255;

// 20 byte header plus one MSS option.
const TCP_HDR_SZ: usize = 24;
const TCP_HDR_WORDS: u8 = (TCP_HDR_SZ / 4) as u8;
const TCP_WINDOW: u16 = 1024;

// MSS payload bytes `0x12 0x34`, a small recognizable fingerprint.
const MSS_FINGERPRINT: u16 = 0x1234;

pub(super) const PROBE_SZ: usize = IPV4_HDR_SZ + TCP_HDR_SZ;

pub(super) struct ProbeForge {
    source: Ipv4Addr,
    target: Ipv4Addr,
    source_port: u16,
}

impl ProbeForge {
    pub(super) fn new(source: Ipv4Addr, target: Ipv4Addr, source_port: u16) -> Self {
        Self {
            source,
            target,
            source_port,
        }
    }

    /// Serializes one probe as a complete IPv4 datagram, ready for a raw IP
    /// socket. Lengths and both checksums are filled in.
    pub(super) fn serialize(&self, dst_port: u16, seq: u32) -> [u8; PROBE_SZ] {
        let mut raw = [0; PROBE_SZ];

        {
            let mut tcp_pckt = MutableTcpPacket::new(&mut raw[IPV4_HDR_SZ..]).unwrap();
            tcp_pckt.set_source(self.source_port);
            tcp_pckt.set_destination(dst_port);
            tcp_pckt.set_sequence(seq);
            tcp_pckt.set_acknowledgement(0);
            tcp_pckt.set_data_offset(TCP_HDR_WORDS);
            tcp_pckt.set_flags(TcpFlags::SYN);
            tcp_pckt.set_window(TCP_WINDOW);
            tcp_pckt.set_urgent_ptr(0);
            tcp_pckt.set_options(&[TcpOption::mss(MSS_FINGERPRINT)]);
            tcp_pckt.set_checksum(ipv4_checksum(
                &tcp_pckt.to_immutable(),
                &self.source,
                &self.target,
            ));
        }

        {
            let mut ipv4_pckt = MutableIpv4Packet::new(&mut raw).unwrap();
            ipv4_pckt.set_version(4);
            ipv4_pckt.set_header_length(IPV4_HDR_WORDS);
            ipv4_pckt.set_total_length(PROBE_SZ as u16);
            ipv4_pckt.set_ttl(IPV4_TTL);
            ipv4_pckt.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
            ipv4_pckt.set_source(self.source);
            ipv4_pckt.set_destination(self.target);
            ipv4_pckt.set_checksum(ipv4::checksum(&ipv4_pckt.to_immutable()));
        }

        raw
    }
}

/// Rolling sequence seed. Some firewalls drop probes whose sequence numbers
/// never move, so every probe advances a small random step from a random
/// 32-bit base.
pub(super) struct SequenceSeed {
    rng: StdRng,
    current: u32,
}

impl SequenceSeed {
    const LOW: u32 = 1_000_000_000;
    const HIGH: u32 = 4_000_000_000;

    pub(super) fn new(mut rng: StdRng) -> Self {
        let current = rng.gen_range(Self::LOW..Self::HIGH);

        Self { rng, current }
    }

    pub(super) fn advance(&mut self) -> u32 {
        self.current += 1 + self.rng.gen_range(0..5);
        self.current
    }
}
