pub mod clienv;
pub mod error;
pub mod fleet_config;
pub mod supervisor;

pub use error::{Result, SupervisorError};
pub use fleet_config::FleetConfig;
pub use supervisor::{build_server, SupervisorServer};
