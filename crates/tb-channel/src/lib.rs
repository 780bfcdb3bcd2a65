//! # tb-channel
//!
//! Addressable endpoints exchanging commands (remote calls returning a
//! value) and notifications (fire-and-forget events) over a pluggable
//! transport, plus the upload broker that moves files by token instead of
//! inlining them in messages.
//!
//! A process owns one [`ChannelHost`]. Hosts connect to each other over TCP
//! or a local socket, greet each other with their [`EndpointId`]s and then
//! sign in the capabilities they expose. Peers observe those sign-ins
//! through the per-capability [`SignInRegistry`].
//!
//! [`EndpointId`]: tb_core::EndpointId

pub mod broker;
pub mod client;
pub mod codec;
pub mod error;
pub mod host;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use broker::{download, UploadBroker};
pub use client::{ControllerClient, WorkerClient};
pub use error::{ChannelError, Result};
pub use host::{ChannelHost, CommandHandler, IncomingNotification};
pub use protocol::{Capability, Command, Frame, Notification, Reply};
pub use registry::SignInRegistry;
pub use transport::{connect, ChannelType, Listener};
