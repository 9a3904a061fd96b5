// src/io/serial/mod.rs
//
// Serial link driver for the dongle.
//
// Features:
// - Link: one serial port with a read path and a mutex-serialised write path
// - FrameAssembler: byte stream to frames, with resynchronisation after corruption
// - Port discovery by name or USB VID/PID

pub mod framer;
pub mod link;
pub mod ports;

pub use framer::{AssemblerStats, FrameAssembler};
pub use link::{Link, LinkControl};
pub use ports::{find_ports_by_usb_id, list_serial_ports, DonglePortInfo};
