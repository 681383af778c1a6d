// Macros (must be first for visibility)
#[macro_use]
pub mod macros;

pub mod cli;
pub mod common;
pub mod config;
pub mod context;
pub mod error;
pub mod protocol;
pub mod registers;
pub mod tools;

pub use config::HostConfig;
pub use context::{Context, Devices};
pub use error::{PlctlError, Result};
pub use protocol::{Command, Outcome, Snapshot};
pub use registers::{MmioPowerLimit, MsrPowerLimit, PowerLimitAccess};
