//! `tracing` subscriber setup shared by services built on `solwatch-connector`.

mod logging;

pub use logging::{init, LogConfig, LogFormat, LogOutput};
