//! Controller side of testbench.
//!
//! [`ControllerService`] is the command surface a client drives. It keeps
//! the single [`ActiveSession`], provisions a worker through a
//! [`WorkerLauncher`], waits for its two-part sign-on and relays the
//! worker's progress back to the caller.

pub mod config;
pub mod error;
pub mod handshake;
pub mod service;
pub mod session;
pub mod supervisor;

pub use config::ControllerConfig;
pub use error::{ControllerError, Result};
pub use handshake::await_sign_on;
pub use service::ControllerService;
pub use session::ActiveSession;
pub use supervisor::{
    LaunchRequest, ProcessLauncher, WorkerControl, WorkerExit, WorkerLauncher, WorkerOutcome,
    WorkerProcess,
};
