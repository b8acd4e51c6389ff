//! Command transport to the robot controller.
//!
//! - `link`: the `CommandLink` seam, send outcomes and echo decoding
//! - `serial`: serial port link and controller port discovery
//! - `worker`: the transport worker and its session

mod link;
pub mod serial;
mod worker;

pub use link::{decode_echo, CommandLink, LinkOpener, SendOutcome};
pub use serial::{
    discover_port, find_controller_port, list_ports, PortCandidate, SerialConfig, SerialLink,
    SerialOpener,
};
pub use worker::{
    SerialSession, SessionMonitor, SessionState, TransportHandle, TransportSettings,
    TransportSummary, TransportWorker,
};
