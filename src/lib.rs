//! Chat Relay - Main Library
//!
//! Thin application layer over the `chatsocket` client library.
//!
//! ## Architecture
//!
//! - **bin_common**: Common utilities for binary executables (config, logging, runners)
//! - **chatsocket**: Resilient messaging client (re-exported from workspace)
//!
//! ## Usage in Binaries
//!
//! ```rust,ignore
//! use chat_relay::bin_common::{init_tracing, load_config_from_env, load_settings, ConfigType};
//! use chat_relay::chatsocket::{ChatSocket, JsonFraming};
//! ```

// Re-export workspace libraries for convenience
pub use chatsocket;

// Binary common utilities
pub mod bin_common {
    //! Common utilities for binary executables
    //!
    //! Configuration loading, logging setup and the runner trait shared by
    //! every binary.

    pub mod cli;
    pub mod logging;
    pub mod runner;

    pub use cli::{load_config_from_env, load_settings, parse_args, ConfigType, ProbeArgs};
    pub use logging::init_tracing;
    pub use runner::{BinaryRunner, RunConfig};
}
