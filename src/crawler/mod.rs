//! Crawler module: the collector and everything a fetch passes through
//!
//! This module contains the core crawling logic, including:
//! - Admission control and the fetch pipeline (`Collector`)
//! - The HTTP backend with its on-disk cache and redirect handling
//! - Request, response and element types handed to callbacks
//! - Per-host limits, the join-group and the debug sink

mod backend;
mod callbacks;
mod charset;
mod collector;
mod context;
mod debug;
mod element;
mod limiter;
mod redirect;
mod request;
mod response;
mod wait_group;

pub use backend::{
    encode_form, multipart_body, HttpBackend, HttpTrace, OutboundRequest, RequestBody,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use callbacks::{CallbackId, ElementCallback, ErrorCallback, RequestCallback, ResponseCallback};
pub use charset::{charset_param, normalize_body};
pub use collector::{Collector, CollectorBuilder};
pub use context::Context;
pub use debug::{Debugger, Event, EventKind, LogDebugger, RecordingDebugger};
pub use element::Element;
pub use limiter::{LimitPermit, LimitRule, Limiter, RuleLimiter};
pub use redirect::{RedirectDecision, RedirectHandler, MAX_REDIRECTS};
pub use request::Request;
pub use response::{sanitize_file_name, Response};
pub use wait_group::{WaitGroup, WaitGuard};
