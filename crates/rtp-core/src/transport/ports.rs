//! Reservation of consecutive local ports
//!
//! Downstream media tooling assumes RTCP lives on RTP port + 1, so ports are
//! always handed out as contiguous runs. A run that cannot be completed is
//! thrown away whole and the search restarts from a new base port.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, UdpSocket};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::constants::MAX_RESERVATION_ATTEMPTS;
use crate::error::{Error, Result};

/// Socket type the ports are reserved for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    Udp,
    Tcp,
}

/// Source of truth for port availability
pub trait PortScanner: Send + Sync {
    /// Pick a port the OS currently considers free
    fn pick_free(&self, port_type: PortType) -> std::io::Result<u16>;

    /// Whether a specific port can be bound right now
    fn is_free(&self, port: u16, port_type: PortType) -> bool;
}

/// Scanner that asks the OS by binding throwaway sockets on all interfaces
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPortScanner;

impl PortScanner for SystemPortScanner {
    fn pick_free(&self, port_type: PortType) -> std::io::Result<u16> {
        let any = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        match port_type {
            PortType::Udp => Ok(UdpSocket::bind(any)?.local_addr()?.port()),
            PortType::Tcp => Ok(TcpListener::bind(any)?.local_addr()?.port()),
        }
    }

    fn is_free(&self, port: u16, port_type: PortType) -> bool {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        match port_type {
            PortType::Udp => UdpSocket::bind(addr).is_ok(),
            PortType::Tcp => TcpListener::bind(addr).is_ok(),
        }
    }
}

/// Hands out runs of consecutive ports and remembers them until released,
/// so two sessions in one process never receive the same run.
pub struct PortReserver<P: PortScanner = SystemPortScanner> {
    scanner: P,
    reserved: Mutex<HashSet<u16>>,
    max_attempts: usize,
}

impl PortReserver<SystemPortScanner> {
    pub fn new() -> Self {
        Self::with_scanner(SystemPortScanner)
    }
}

impl<P: PortScanner> PortReserver<P> {
    pub fn with_scanner(scanner: P) -> Self {
        Self {
            scanner,
            reserved: Mutex::new(HashSet::new()),
            max_attempts: MAX_RESERVATION_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Reserve `count` numerically consecutive ports
    pub fn reserve_ports(&self, count: usize, port_type: PortType) -> Result<Vec<u16>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        for attempt in 1..=self.max_attempts {
            let base = match self.scanner.pick_free(port_type) {
                Ok(port) => port,
                Err(e) => {
                    debug!("Port scan failed on attempt {}: {}", attempt, e);
                    continue;
                }
            };

            if let Some(ports) = self.try_run(base, count, port_type) {
                debug!("Reserved {:?} ports {:?} after {} attempt(s)", port_type, ports, attempt);
                return Ok(ports);
            }
            trace!("Port run starting at {} unavailable, retrying", base);
        }

        warn!("Gave up reserving {} consecutive {:?} ports", count, port_type);
        Err(Error::PortExhausted {
            attempts: self.max_attempts,
        })
    }

    fn try_run(&self, base: u16, count: usize, port_type: PortType) -> Option<Vec<u16>> {
        let last = base as usize + count - 1;
        if last > u16::MAX as usize {
            return None;
        }
        let ports: Vec<u16> = (base..=last as u16).collect();

        let mut reserved = self.reserved.lock();
        if ports.iter().any(|p| reserved.contains(p)) {
            return None;
        }
        // The base came from pick_free; the rest must be checked individually
        if ports[1..].iter().any(|p| !self.scanner.is_free(*p, port_type)) {
            return None;
        }
        reserved.extend(ports.iter().copied());
        Some(ports)
    }

    /// Return ports to the pool
    pub fn release(&self, ports: &[u16]) {
        let mut reserved = self.reserved.lock();
        for port in ports {
            reserved.remove(port);
        }
    }

    pub fn reserved_count(&self) -> usize {
        self.reserved.lock().len()
    }
}

/// One-shot reservation against the OS without process-level bookkeeping
pub fn reserve_ports(count: usize, port_type: PortType) -> Result<Vec<u16>> {
    PortReserver::new().reserve_ports(count, port_type)
}
