//! Local transport resources for RTP sessions

mod ports;

pub use ports::{reserve_ports, PortScanner, PortReserver, PortType, SystemPortScanner};
