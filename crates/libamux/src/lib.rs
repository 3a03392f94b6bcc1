pub mod command;
pub mod config;
pub mod env;
pub mod error;
pub mod registry;
pub mod service;
pub mod stream;
pub mod supervisor;

pub use command::{CommandSpec, assemble};
pub use config::RunnerConfig;
pub use error::AmuxError;
pub use registry::{Session, SessionRegistry};
pub use service::AgentService;
pub use supervisor::TerminationOutcome;
