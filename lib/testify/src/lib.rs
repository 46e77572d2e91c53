mod addr;
pub mod wait;
pub mod wire;

// re-export
pub use addr::{Port, is_free_udp, next_addr, next_addr_for_ip, pick_unused_port};
