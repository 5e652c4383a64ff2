//! # Service Layer
//!
//! Execution contexts for handlers and the multi-namespace network manager.
//!
//! ## Components
//! - **Executor**: `ExecutionContext` trait and the `WorkQueue` context
//! - **Network**: `NetworkManager`, registration and routing across channels

pub mod executor;
pub mod network;
