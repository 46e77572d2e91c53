//! Collects sFlow v5 datagrams and builds a switch and port topology from the
//! OpenFlow counter extension, with example packet headers per port.

#[macro_use]
extern crate tracing;

pub mod collector;
pub mod config;
pub mod correlator;
pub mod source;
pub mod trace;
