pub mod audio;
pub mod config;
pub mod datapath;
pub mod error;
pub mod hal;
pub mod sync;
pub mod timing;

#[cfg(feature = "simulation")]
pub mod sim;

pub use config::DatapathConfig;
pub use datapath::{BlockDriver, Datapath, DatapathStats};
pub use error::{BridgeError, Result};
