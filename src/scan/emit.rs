use std::{
    net::{IpAddr, Ipv4Addr},
    sync::mpsc::Receiver,
    thread,
    time::{Duration, Instant},
};

use pnet::{packet::ipv4::Ipv4Packet, transport::TransportSender};

use super::pckt::{ProbeForge, SequenceSeed};

/// Fixed interval pacer. Every send consumes one token; at most one token is
/// ever stored, so a slow consumer never earns a burst.
pub(super) struct Pacer {
    interval: Duration,
    next: Instant,
}

impl Pacer {
    pub(super) fn new(rate: u32) -> Self {
        let interval = Duration::from_secs(1) / rate;

        Self {
            interval,
            next: Instant::now() + interval,
        }
    }

    pub(super) fn wait(&mut self) {
        let now = Instant::now();
        if let Some(gap) = self.next.checked_duration_since(now) {
            thread::sleep(gap);
        }

        self.next += self.interval;

        // Ticks that went unconsumed are gone.
        let now = Instant::now();
        if self.next < now {
            self.next = now + self.interval;
        }
    }
}

/// Paced, retrying probe transmitter. Ports are handled strictly one after
/// another; the pacer is the only source of backpressure.
pub(super) struct Emitter {
    forge: ProbeForge,
    seq: SequenceSeed,
    pacer: Pacer,
    socket: TransportSender,
    target: IpAddr,
    retries: usize,
}

impl Emitter {
    pub(super) fn new(
        forge: ProbeForge,
        seq: SequenceSeed,
        pacer: Pacer,
        socket: TransportSender,
        target: Ipv4Addr,
        retries: usize,
    ) -> Self {
        Self {
            forge,
            seq,
            pacer,
            socket,
            target: IpAddr::V4(target),
            retries,
        }
    }

    /// Drains the port stream. Each failed attempt burns one retry and one
    /// rate token; a port whose budget runs out is abandoned without note.
    /// Every attempt carries a freshly advanced sequence number.
    pub(super) fn run(mut self, ports: Receiver<u16>) {
        for port in ports {
            for _ in 0..self.retries {
                self.pacer.wait();

                let raw = self.forge.serialize(port, self.seq.advance());
                let probe = match Ipv4Packet::new(&raw) {
                    Some(pckt) => pckt,
                    None => break,
                };

                match self.socket.send_to(probe, self.target) {
                    Ok(written) if written > 0 => break,
                    _ => (),
                }
            }
        }
    }
}
