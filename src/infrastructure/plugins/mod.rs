//! Plugin execution runtimes.

pub mod builtin;
pub mod loader;
pub mod process;

pub use builtin::{BuiltinPlugins, BuiltinRuntime};
pub use loader::RuntimeLauncher;
pub use process::{resolve_command, ProcessRuntime, ProcessTimeouts};
