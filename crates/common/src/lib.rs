//! Common utilities for usbctrl
//!
//! Shared between the `usbctrl` library and the `usbctrl-test` harness:
//! error types for the ambient plumbing and the tracing subscriber setup.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::{VALID_LOG_LEVELS, setup_logging};
