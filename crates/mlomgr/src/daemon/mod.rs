//! Daemon event loop and the simulated driver it runs against.

mod mlodaemon;
mod sim;

pub use mlodaemon::{MloDaemon, MloDaemonConfig, MloDaemonHandle, MloEvent};
pub use sim::SimulatedDriver;
