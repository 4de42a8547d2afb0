// SPDX-License-Identifier: Apache-2.0

//! Collector-facing side of the agent: wire messages, framing, the
//! authentication handshake, and the connection supervisor that owns the
//! socket lifecycle.

pub mod auth;
pub mod errors;
pub mod frame;
pub mod message;
pub mod retry;
pub mod supervisor;
pub mod tls;

pub use auth::AgentIdentity;
pub use errors::ExporterError;
pub use frame::FrameCodec;
pub use message::Message;
pub use retry::{Backoff, RetryConfig};
pub use supervisor::{ConnectionSupervisor, SupervisorConfig};
