//! # XBean Kernel
//!
//! The `kernel` module ties the service machinery together behind
//! [`StandaloneKernel`], the handle applications use to register, start, stop
//! and look up services.
//!
//! ## Key Components:
//!
//! - **Kernel facade**: [`StandaloneKernel`] and its weak [`KernelRef`], in the
//!   `standalone` submodule.
//! - **Configuration**: [`KernelConfig`] loaded from JSON, YAML or TOML via
//!   [`ConfigFormat`], in the `config` submodule.
//! - **Core Constants**: defaults shared by configuration and the binary, in
//!   the `constants` submodule.
//! - **Error Handling**: the kernel-wide [`Error`](error::Error) and its
//!   `Result` alias, in the `error` submodule.
pub mod config;
pub mod constants;
pub mod error;
pub mod standalone;

pub use config::{ConfigFormat, KernelConfig};
pub use error::{Error, Result};
pub use standalone::{KernelRef, StandaloneKernel};
