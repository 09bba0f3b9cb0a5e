pub mod link;
pub mod params;
pub mod reader;
pub mod sampler;
pub mod session;

pub use link::{available_ports, LinkOpener, SerialLink, SystemPorts};
pub use params::{Parity, SerialParams, StopBits};
pub use sampler::{extract_candidates, SamplerConfig, WeightReading, WindowTally};
pub use session::{WeighbridgeSession, WeighbridgeStatus, WeightSource};
