use crate::error::Result;

// windows_service type aliases, re-exported so callers of the dispatch loop
// don't need a direct windows-service dependency.
pub type ServiceControl = windows_service::service::ServiceControl;
pub type ServiceControlAccept = windows_service::service::ServiceControlAccept;
pub type ServiceState = windows_service::service::ServiceState;

/// Seam between the dispatch loop and the service control manager.
///
/// The real implementation lives in `service_control` and talks to the SCM;
/// tests substitute a mock that records status reports and feeds controls
/// through the channel.
pub trait Handler {
    /// The stream of inbound control requests. The dispatch loop blocks on
    /// exactly "next control request" and nothing else.
    fn chan(&self) -> &crossbeam_channel::Receiver<ServiceControl>;

    /// Report the current state and the set of controls it accepts.
    fn update(&self, status: ServiceState, controls_accepted: ServiceControlAccept) -> Result<()>;
}
