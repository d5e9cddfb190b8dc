//! Embed a Windows service in any long-running program.
//!
//! A [`WinService`] pairs a service name with a work routine. The embedding
//! executable probes [`is_windows_service`] at startup: when the process was
//! launched by the service control manager it calls [`WinService::run`] to
//! enter the control dispatch loop, otherwise it uses the lifecycle methods
//! (install, uninstall, start, stop, status) to administer the registered
//! service from the command line.
//!
//! The crate compiles to nothing on non-Windows targets.
#![cfg(windows)]

mod error;
mod gensvc;
mod manager;
mod service_control;
mod svc;

pub use error::{Error, Result};
pub use gensvc::{Handler, ServiceControl, ServiceControlAccept, ServiceState};
pub use service_control::is_windows_service;
pub use svc::WinService;
