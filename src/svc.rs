use crate::error::{Error, Result};
use crate::gensvc::{Handler, ServiceControl, ServiceControlAccept, ServiceState};
use crate::{manager, service_control};

use log::{debug, info};
use std::ffi::OsStr;
use std::thread;

/// A service identity: a name unique within the SCM registry and the work
/// routine to run while the service is up.
///
/// The work routine is launched exactly once per service-mode run, on a
/// detached thread. This code never joins it and never observes its failures.
pub struct WinService {
    name: String,
    work: Box<dyn FnOnce() + Send + 'static>,
}

impl WinService {
    pub fn new<N, F>(name: N, work: F) -> Self
    where
        N: Into<String>,
        F: FnOnce() + Send + 'static,
    {
        WinService {
            name: name.into(),
            work: Box::new(work),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand this service to the SCM dispatcher. Only valid when the process
    /// was launched by the SCM (see [`crate::is_windows_service`]); blocks
    /// until the service stops.
    pub fn run(self) -> Result<()> {
        service_control::run(self)
    }

    /// Run the work routine directly in the foreground, without any SCM
    /// involvement. The administrative fallthrough path.
    pub fn run_foreground(self) {
        (self.work)()
    }

    /// Register this service with the SCM and start it. `launch_arguments`
    /// are passed to every future invocation of the service executable.
    pub fn install<S: AsRef<OsStr>>(&self, launch_arguments: &[S]) -> Result<()> {
        let args = launch_arguments
            .iter()
            .map(|s| s.as_ref().to_owned())
            .collect();
        manager::install(&self.name, args)
    }

    /// Stop the service and remove its registration from the SCM.
    pub fn uninstall(&self) -> Result<()> {
        manager::uninstall(&self.name)
    }

    pub fn start(&self) -> Result<()> {
        manager::start(&self.name)
    }

    /// Ask the SCM to stop the service and wait briefly for the process to
    /// exit. Best-effort: returns without error even if it is still running
    /// once the poll budget is spent.
    pub fn stop(&self) -> Result<()> {
        manager::stop(&self.name)
    }

    pub fn status(&self) -> Result<ServiceState> {
        manager::status(&self.name)
    }

    /// The control dispatch loop.
    ///
    /// Reports StartPending, launches the work routine detached, reports
    /// Running accepting {Stop, Shutdown}, then processes control requests
    /// one at a time until Stop or Shutdown arrives. Interrogate echoes the
    /// current status without any state change.
    pub(crate) fn execute(self, handler: &dyn Handler) -> Result<()> {
        handler.update(ServiceState::StartPending, ServiceControlAccept::empty())?;

        thread::spawn(self.work);
        debug!("work routine launched for {}", self.name);

        let accepts = ServiceControlAccept::STOP | ServiceControlAccept::SHUTDOWN;
        handler.update(ServiceState::Running, accepts)?;

        loop {
            let control = handler
                .chan()
                .recv()
                .map_err(|_| Error::ControlsDisconnected)?;
            match control {
                ServiceControl::Stop | ServiceControl::Shutdown => {
                    info!("{} received {:?}, shutting down", self.name, control);
                    return Ok(());
                }
                ServiceControl::Interrogate => {
                    handler.update(ServiceState::Running, accepts)?;
                }
                // The SCM callback only forwards the three controls above.
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver, Sender};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct MockScm {
        rx: Receiver<ServiceControl>,
        reports: Mutex<Vec<(ServiceState, ServiceControlAccept)>>,
    }

    impl MockScm {
        fn new() -> (Sender<ServiceControl>, Self) {
            let (tx, rx) = unbounded();
            (
                tx,
                MockScm {
                    rx,
                    reports: Mutex::new(Vec::new()),
                },
            )
        }

        fn reports(&self) -> Vec<(ServiceState, ServiceControlAccept)> {
            self.reports.lock().unwrap().clone()
        }
    }

    impl Handler for MockScm {
        fn chan(&self) -> &Receiver<ServiceControl> {
            &self.rx
        }

        fn update(
            &self,
            status: ServiceState,
            controls_accepted: ServiceControlAccept,
        ) -> crate::Result<()> {
            self.reports.lock().unwrap().push((status, controls_accepted));
            Ok(())
        }
    }

    fn running_accepts() -> ServiceControlAccept {
        ServiceControlAccept::STOP | ServiceControlAccept::SHUTDOWN
    }

    #[test]
    fn reports_start_pending_before_running() {
        let (tx, scm) = MockScm::new();
        tx.send(ServiceControl::Stop).unwrap();

        WinService::new("svc", || {}).execute(&scm).unwrap();

        let reports = scm.reports();
        assert_eq!(
            reports,
            vec![
                (ServiceState::StartPending, ServiceControlAccept::empty()),
                (ServiceState::Running, running_accepts()),
            ]
        );
    }

    #[test]
    fn launches_work_routine_exactly_once() {
        let launches = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = unbounded();
        let counter = launches.clone();
        let svc = WinService::new("svc", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            done_tx.send(()).unwrap();
        });

        let (tx, scm) = MockScm::new();
        // An interrogate must not relaunch the work routine.
        tx.send(ServiceControl::Interrogate).unwrap();
        tx.send(ServiceControl::Stop).unwrap();
        svc.execute(&scm).unwrap();

        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(launches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn interrogate_echoes_status_without_exiting() {
        let (tx, scm) = MockScm::new();
        tx.send(ServiceControl::Interrogate).unwrap();
        tx.send(ServiceControl::Interrogate).unwrap();
        tx.send(ServiceControl::Shutdown).unwrap();

        WinService::new("svc", || {}).execute(&scm).unwrap();

        let reports = scm.reports();
        assert_eq!(reports.len(), 4);
        assert_eq!(reports[2], (ServiceState::Running, running_accepts()));
        assert_eq!(reports[3], (ServiceState::Running, running_accepts()));
    }

    #[test]
    fn returns_on_shutdown() {
        let (tx, scm) = MockScm::new();
        tx.send(ServiceControl::Shutdown).unwrap();
        assert!(WinService::new("svc", || {}).execute(&scm).is_ok());
    }

    #[test]
    fn disconnected_control_channel_is_fatal() {
        let (tx, scm) = MockScm::new();
        drop(tx);
        let result = WinService::new("svc", || {}).execute(&scm);
        assert!(matches!(result, Err(Error::ControlsDisconnected)));
    }
}
