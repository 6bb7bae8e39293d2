use std::{
    collections::HashSet,
    net::{Ipv4Addr, TcpListener},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread,
    time::Duration,
};

use pcap::Capture;
use pnet::{
    packet::ip::IpNextHeaderProtocols,
    transport::{transport_channel, TransportChannelType::Layer3},
};
use rand::{rngs::StdRng, SeedableRng};

use crate::error::ScanError;

mod capture;
mod emit;
mod pckt;
mod route;

use self::capture::ResponseWatcher;
use self::emit::{Emitter, Pacer};
use self::pckt::{ProbeForge, SequenceSeed};

const SNAP_LEN: i32 = 65536;
const READ_TIMEOUT_MS: i32 = 1500;
const RAW_SOCKET_BUFFER_SZ: usize = 4096;

// Same convention as masscan: late SYN/ACKs get a fixed window to land.
const GRACE_PERIOD: Duration = Duration::from_secs(10);

fn bpf_program(source_port: u16, target: Ipv4Addr) -> String {
    format!("tcp and port {} and ip host {}", source_port, target)
}

#[derive(Debug)]
pub struct Scanner {
    target: Ipv4Addr,
    source: Ipv4Addr,
    device: String,
    link_layer: bool,
    timeout: Duration,
    retries: usize,
    rate: u32,
}

impl Scanner {
    pub fn new(
        target: Ipv4Addr,
        timeout: Duration,
        retries: usize,
        rate: u32,
    ) -> Result<Self, ScanError> {
        if retries == 0 {
            return Err(ScanError::InvalidRetries);
        }
        if rate == 0 {
            return Err(ScanError::InvalidRate);
        }

        let egress = route::discover(target)?;

        Ok(Self {
            target,
            source: egress.ip,
            device: egress.device,
            link_layer: egress.link_layer,
            timeout,
            retries,
            rate,
        })
    }

    #[inline]
    pub fn source(&self) -> Ipv4Addr {
        self.source
    }

    #[inline]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Probes every port of the wordlist and returns the subset that
    /// answered with SYN/ACK. Ports that stayed silent or replied with
    /// anything else are simply absent from the result.
    pub fn scan(&self, wordlist: &HashSet<u16>) -> Result<HashSet<u16>, ScanError> {
        // The reservation pins the probe source port until the scan is done,
        // keeping the capture filter unique to this scan.
        let reservation =
            TcpListener::bind((self.source, 0)).map_err(ScanError::PortReserveFailed)?;
        let source_port = reservation
            .local_addr()
            .map_err(ScanError::PortReserveFailed)?
            .port();

        let mut handle = Capture::from_device(self.device.as_str())
            .map_err(|e| ScanError::CaptureOpenFailed(self.device.clone(), e))?
            .snaplen(SNAP_LEN)
            .timeout(READ_TIMEOUT_MS)
            .immediate_mode(true)
            .open()
            .map_err(|e| ScanError::CaptureOpenFailed(self.device.clone(), e))?;

        handle
            .filter(&bpf_program(source_port, self.target), true)
            .map_err(ScanError::FilterInstallFailed)?;

        let (raw_socket, _) = transport_channel(
            RAW_SOCKET_BUFFER_SZ,
            Layer3(IpNextHeaderProtocols::Tcp),
        )
        .map_err(ScanError::RawSocketFailed)?;

        log::debug!(
            "Scanning {} from {}:{} through `{}`",
            self.target,
            self.source,
            source_port,
            self.device
        );

        let shutdown = Arc::new(AtomicBool::new(false));
        let (open_tx, open_rx) = mpsc::channel();

        let watcher =
            ResponseWatcher::new(self.target, self.source, source_port, self.link_layer);
        let stop = Arc::clone(&shutdown);
        let capture_task = thread::spawn(move || watcher.watch(handle, open_tx, stop));

        let target = self.target;
        let probed = wordlist.clone();
        let collector_task = thread::spawn(move || {
            let mut results = HashSet::new();
            for open in open_rx {
                if !probed.contains(&open) {
                    continue;
                }

                log::debug!("Found active port {} on {}", open, target);

                results.insert(open);
            }
            results
        });

        let forge = ProbeForge::new(self.source, self.target, source_port);
        let seq = SequenceSeed::new(StdRng::from_entropy());
        let emitter = Emitter::new(
            forge,
            seq,
            Pacer::new(self.rate),
            raw_socket,
            self.target,
            self.retries,
        );

        let (ports_tx, ports_rx) = mpsc::channel();
        let emitter_task = thread::spawn(move || emitter.run(ports_rx));

        for &port in wordlist {
            let _ = ports_tx.send(port);
        }
        drop(ports_tx);

        // The raw socket dies with the emitter.
        let _ = emitter_task.join();

        if !self.timeout.is_zero() {
            thread::sleep(GRACE_PERIOD);
        }
        shutdown.store(true, Ordering::Relaxed);

        // The watcher notices the flag within one read timeout and drops the
        // capture handle, which releases the BPF program with it. Its side of
        // the open channel closes with it, letting the collector drain out.
        let _ = capture_task.join();
        let results = collector_task.join().unwrap_or_default();

        drop(reservation);

        Ok(results)
    }
}
