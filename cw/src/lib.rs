//! coursewatch - progress automation for Moodle video activities
//!
//! Resolves the session context of a video page and drives the site's AJAX
//! service with timed progress updates until the server reports the video
//! as completed.
//!
//! # Modules
//!
//! - [`transport`] - HTTP backend trait, reqwest implementation, retry policy
//! - [`extract`] - Session-context extraction from page HTML
//! - [`rpc`] - JSON-RPC envelope and gateway for the service endpoint
//! - [`watch`] - Progress engine, batch driver and probe
//! - [`discovery`] - Course and video listings
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod discovery;
pub mod extract;
pub mod rpc;
pub mod transport;
pub mod watch;

pub use config::Config;
pub use discovery::{Course, Discovery, VideoItem};
pub use extract::{ContextExtractor, SessionContext, extract_context};
pub use rpc::{RpcEnvelope, RpcError, RpcGateway, RpcResult};
pub use transport::{HttpBackend, NetworkError, ReqwestBackend, RetryPolicy, Transport};
pub use watch::{ProgressTemplate, StopSignal, WatchConfig, WatchEngine, WatchOutcome, WatchReport};
