//! Agent side of the session relay.
//!
//! Provides:
//! - `AgentBridge` - Registers a session with the hub and serves its commands
//! - `run_command` - Spawns one shell command and streams stdout/stderr/exit
//! - `Shell` - Host shell selection
//!
//! Command text is handed to the shell verbatim. The hub performs no
//! authentication, so anyone able to reach it can run arbitrary commands as
//! the agent's user. Only expose a hub to fully trusted operators.

pub mod bridge;
pub mod exec;
pub mod shell;

pub use bridge::{AgentBridge, BridgeConfig, BridgeError};
pub use exec::{ChunkDecoder, run_command};
pub use shell::{Shell, ShellError};
