//! Shared infrastructure for the CRM import service.
//!
//! Currently this is the logging layer; it lives in its own crate so any
//! future binaries (batch tools, maintenance jobs) initialize logging the
//! same way the server does.

pub mod logging;
