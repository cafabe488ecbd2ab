pub mod compile;
pub mod config;
pub mod error;
pub mod lockfile;
pub mod operation;
pub mod presets;
pub mod registry;
pub mod sandbox;
pub mod validation;
pub mod wrapper;

pub use compile::{CompiledSuite, compile};
pub use config::CiConfig;
pub use error::{CompileError, ConfigError, OperationError};
pub use operation::{CommandSequence, Operation, SequenceBuilder};
pub use registry::{Check, CheckRegistry, build_registry};
pub use sandbox::{SandboxPolicy, sandbox};
pub use wrapper::{Executable, HarnessInvocation, generate, wrap};
