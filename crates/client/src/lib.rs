pub mod config;
pub mod driver;
pub mod remote;

pub use config::{ClientConfig, ConfigError};
pub use driver::run_load;
pub use remote::{CatalogSummary, HttpRemote, ListResponse, RemoteError};
