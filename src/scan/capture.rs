use std::net::Ipv4Addr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::Sender,
    Arc,
};

use pcap::{Active, Capture};
use pnet::packet::{
    ethernet::{EtherTypes, EthernetPacket},
    ip::IpNextHeaderProtocols,
    ipv4::Ipv4Packet,
    tcp::{TcpFlags, TcpPacket},
    Packet,
};

pub(super) struct ResponseWatcher {
    target: Ipv4Addr,
    source: Ipv4Addr,
    source_port: u16,
    link_layer: bool,
}

impl ResponseWatcher {
    pub(super) fn new(
        target: Ipv4Addr,
        source: Ipv4Addr,
        source_port: u16,
        link_layer: bool,
    ) -> Self {
        Self {
            target,
            source,
            source_port,
            link_layer,
        }
    }

    /// Pulls frames until shutdown is requested or the handle reaches end of
    /// stream. Capture is best effort: read timeouts and decode failures are
    /// skipped without note. Dropping the handle on the way out releases the
    /// filter with it.
    pub(super) fn watch(
        &self,
        mut handle: Capture<Active>,
        open: Sender<u16>,
        shutdown: Arc<AtomicBool>,
    ) {
        while !shutdown.load(Ordering::Relaxed) {
            let frame = match handle.next_packet() {
                Ok(pckt) => pckt,
                Err(pcap::Error::NoMorePackets) => break,
                Err(_) => continue,
            };

            if let Some(port) = self.open_port(frame.data) {
                if open.send(port).is_err() {
                    break;
                }
            }
        }
    }

    /// Decodes one captured frame and applies the acceptance rules. The IPv4
    /// flow must run from the target back to the probe source and the TCP
    /// destination must be the probe source port. Only SYN/ACK counts as
    /// evidence of a listener; anything else yields `None`.
    fn open_port(&self, frame: &[u8]) -> Option<u16> {
        let ipv4_raw = if self.link_layer {
            let ethernet_pckt = EthernetPacket::new(frame)?;
            if ethernet_pckt.get_ethertype() != EtherTypes::Ipv4 {
                return None;
            }

            frame.get(EthernetPacket::minimum_packet_size()..)?
        } else {
            frame
        };

        let ipv4_pckt = Ipv4Packet::new(ipv4_raw)?;
        if !(ipv4_pckt.get_source() == self.target
            && ipv4_pckt.get_destination() == self.source)
        {
            return None;
        }
        if ipv4_pckt.get_next_level_protocol() != IpNextHeaderProtocols::Tcp {
            return None;
        }

        let tcp_pckt = TcpPacket::new(ipv4_pckt.payload())?;
        if tcp_pckt.get_destination() != self.source_port {
            return None;
        }

        let syn_ack = TcpFlags::SYN | TcpFlags::ACK;
        if tcp_pckt.get_flags() & syn_ack != syn_ack {
            return None;
        }

        Some(tcp_pckt.get_source())
    }
}

#[cfg(test)]
mod tests {
    use pnet::packet::{
        ethernet::MutableEthernetPacket,
        ipv4::{self, MutableIpv4Packet},
        tcp::{ipv4_checksum, MutableTcpPacket},
    };

    use super::*;

    const TARGET: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 4);
    const SOURCE: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);
    const SOURCE_PORT: u16 = 61234;

    fn watcher(link_layer: bool) -> ResponseWatcher {
        ResponseWatcher::new(TARGET, SOURCE, SOURCE_PORT, link_layer)
    }

    fn reply(src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16, flags: u8) -> Vec<u8> {
        let mut raw = vec![0; 40];

        {
            let mut tcp_pckt = MutableTcpPacket::new(&mut raw[20..]).unwrap();
            tcp_pckt.set_source(src_port);
            tcp_pckt.set_destination(dst_port);
            tcp_pckt.set_sequence(12_345_678);
            tcp_pckt.set_acknowledgement(87_654_321);
            tcp_pckt.set_data_offset(5);
            tcp_pckt.set_flags(flags.into());
            tcp_pckt.set_window(64240);
            tcp_pckt.set_checksum(ipv4_checksum(&tcp_pckt.to_immutable(), &src, &dst));
        }

        {
            let mut ipv4_pckt = MutableIpv4Packet::new(&mut raw).unwrap();
            ipv4_pckt.set_version(4);
            ipv4_pckt.set_header_length(5);
            ipv4_pckt.set_total_length(40);
            ipv4_pckt.set_ttl(64);
            ipv4_pckt.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
            ipv4_pckt.set_source(src);
            ipv4_pckt.set_destination(dst);
            ipv4_pckt.set_checksum(ipv4::checksum(&ipv4_pckt.to_immutable()));
        }

        raw
    }

    fn framed(raw: &[u8]) -> Vec<u8> {
        let mut frame = vec![0; 14 + raw.len()];

        let mut ethernet_pckt = MutableEthernetPacket::new(&mut frame).unwrap();
        ethernet_pckt.set_ethertype(EtherTypes::Ipv4);
        frame[14..].copy_from_slice(raw);

        frame
    }

    const SYN_ACK: u8 = 0x12;
    const RST: u8 = 0x04;
    const RST_ACK: u8 = 0x14;
    const SYN: u8 = 0x02;

    #[test]
    fn syn_ack_from_target_is_an_open_port() {
        let raw = reply(TARGET, SOURCE, 443, SOURCE_PORT, SYN_ACK);

        assert_eq!(watcher(false).open_port(&raw), Some(443));
    }

    #[test]
    fn syn_ack_inside_ethernet_frame_is_an_open_port() {
        let frame = framed(&reply(TARGET, SOURCE, 22, SOURCE_PORT, SYN_ACK));

        assert_eq!(watcher(true).open_port(&frame), Some(22));
    }

    #[test]
    fn negative_flag_replies_are_dropped() {
        let watcher = watcher(false);

        for flags in [RST, RST_ACK, SYN] {
            let raw = reply(TARGET, SOURCE, 80, SOURCE_PORT, flags);

            assert_eq!(watcher.open_port(&raw), None);
        }
    }

    #[test]
    fn foreign_flow_is_dropped() {
        let stranger = Ipv4Addr::new(203, 0, 113, 77);

        // Wrong talker, and wrong direction.
        let from_stranger = reply(stranger, SOURCE, 80, SOURCE_PORT, SYN_ACK);
        let to_stranger = reply(TARGET, stranger, 80, SOURCE_PORT, SYN_ACK);

        let watcher = watcher(false);
        assert_eq!(watcher.open_port(&from_stranger), None);
        assert_eq!(watcher.open_port(&to_stranger), None);
    }

    #[test]
    fn foreign_destination_port_is_dropped() {
        let raw = reply(TARGET, SOURCE, 80, SOURCE_PORT.wrapping_add(1), SYN_ACK);

        assert_eq!(watcher(false).open_port(&raw), None);
    }

    #[test]
    fn non_ipv4_ethertype_is_dropped() {
        let mut frame = framed(&reply(TARGET, SOURCE, 80, SOURCE_PORT, SYN_ACK));

        {
            let mut ethernet_pckt = MutableEthernetPacket::new(&mut frame).unwrap();
            ethernet_pckt.set_ethertype(EtherTypes::Arp);
        }

        assert_eq!(watcher(true).open_port(&frame), None);
    }

    #[test]
    fn non_tcp_payload_is_dropped() {
        let mut raw = reply(TARGET, SOURCE, 80, SOURCE_PORT, SYN_ACK);

        {
            let mut ipv4_pckt = MutableIpv4Packet::new(&mut raw).unwrap();
            ipv4_pckt.set_next_level_protocol(IpNextHeaderProtocols::Udp);
            ipv4_pckt.set_checksum(ipv4::checksum(&ipv4_pckt.to_immutable()));
        }

        assert_eq!(watcher(false).open_port(&raw), None);
    }

    #[test]
    fn truncated_frames_are_dropped() {
        let raw = reply(TARGET, SOURCE, 80, SOURCE_PORT, SYN_ACK);

        assert_eq!(watcher(false).open_port(&raw[..12]), None);
        assert_eq!(watcher(true).open_port(&raw[..8]), None);
    }
}
