//! CLI command implementations.

mod config;
mod inspect;
mod lookup;
mod rebuild;
mod start;

pub use config::{run_config, ConfigArgs, ConfigCommand};
pub use inspect::{run_inspect, InspectArgs};
pub use lookup::{run_lookup, LookupArgs};
pub use rebuild::{run_rebuild, RebuildArgs};
pub use start::{run_start, StartArgs};
