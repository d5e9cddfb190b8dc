//! Lifecycle operations against the SCM registry: install, uninstall, start,
//! stop, status.
//!
//! Every operation acquires its own manager connection and service handle and
//! releases them before returning; nothing is cached across calls. The SCM
//! applies deletions and process termination asynchronously, so install and
//! the stop paths poll for the registry to catch up instead of trusting the
//! first answer.

use crate::error::{self, Error, Result};

use log::debug;
use std::ffi::{OsStr, OsString};
use std::os::windows::ffi::OsStrExt;
use std::time::Duration;
use std::{io, iter, ptr, thread};
use winapi::shared::minwindef::LPVOID;
use winapi::um::winsvc;
use windows_service::service::{
    Service, ServiceAccess, ServiceErrorControl, ServiceInfo, ServiceStartType, ServiceState,
    ServiceType,
};
use windows_service::service_manager::{ServiceManager, ServiceManagerAccess};

/// Fixed interval between registry polls. No backoff or jitter; the original
/// protocol polls at a flat third of a second.
const POLL_INTERVAL: Duration = Duration::from_millis(333);

/// How many times the stop paths poll for the service process to exit before
/// giving up (~1 second total).
const EXIT_POLL_ATTEMPTS: u32 = 3;

/// Register `name` with the SCM and start it.
///
/// A stale registration under the same name is deleted first, but only if it
/// is stopped or already mid-deletion; a live one fails with
/// [`Error::AlreadyRunning`]. The new entry points at the current executable
/// with `launch_arguments` appended, starts automatically at boot, and runs
/// in its own process with an unrestricted service SID.
pub(crate) fn install(name: &str, launch_arguments: Vec<OsString>) -> Result<()> {
    let scm = ServiceManager::local_computer(
        None::<&str>,
        ServiceManagerAccess::CONNECT | ServiceManagerAccess::CREATE_SERVICE,
    )?;
    let executable_path = std::env::current_exe()?;

    // Any open failure is treated as "no existing entry": creation will
    // surface whatever was actually wrong.
    if let Ok(existing) = scm.open_service(name, ServiceAccess::QUERY_STATUS | ServiceAccess::DELETE)
    {
        match existing.query_status() {
            Ok(status) if status.current_state != ServiceState::Stopped => {
                return Err(Error::AlreadyRunning(name.to_owned()));
            }
            Ok(_) => {}
            Err(ref err) if error::is_marked_for_delete(err) => {}
            Err(err) => return Err(err.into()),
        }
        match existing.delete() {
            Ok(()) => {}
            Err(ref err) if error::is_marked_for_delete(err) => {}
            Err(err) => return Err(err.into()),
        }
        drop(existing);
        debug!("waiting for stale registration of {name} to be removed");
        wait_until_removed(&scm, name);
    }

    let info = ServiceInfo {
        name: OsString::from(name),
        display_name: OsString::from(name),
        service_type: ServiceType::OWN_PROCESS,
        start_type: ServiceStartType::AutoStart,
        error_control: ServiceErrorControl::Normal,
        executable_path,
        launch_arguments,
        dependencies: vec![],
        account_name: None,
        account_password: None,
    };
    let service = scm.create_service(&info, ServiceAccess::CHANGE_CONFIG | ServiceAccess::START)?;
    service.set_description(format!("{name} Service"))?;
    set_unrestricted_sid_type(name)?;
    let started = service.start::<&OsStr>(&[]);
    // The handle closes whether or not start succeeded.
    drop(service);
    started?;
    Ok(())
}

/// Stop `name` and delete its registration. Fails if the service is absent;
/// tolerates a registration that is already marked for deletion. Actual
/// removal may still be pending on the SCM side when this returns.
pub(crate) fn uninstall(name: &str) -> Result<()> {
    let scm = ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)?;
    let service = scm.open_service(
        name,
        ServiceAccess::QUERY_STATUS | ServiceAccess::STOP | ServiceAccess::DELETE,
    )?;
    // Best-effort: the service may well be stopped already.
    let _ = service.stop();
    wait_for_process_exit(&service)?;
    match service.delete() {
        Ok(()) => Ok(()),
        Err(ref err) if error::is_marked_for_delete(err) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn start(name: &str) -> Result<()> {
    let scm = ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)?;
    let service = scm.open_service(name, ServiceAccess::START)?;
    service.start::<&OsStr>(&[])?;
    Ok(())
}

/// Send a stop control and wait briefly for the service process to exit.
/// Best-effort: exhausting the poll budget is not an error.
pub(crate) fn stop(name: &str) -> Result<()> {
    let scm = ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)?;
    let service = scm.open_service(name, ServiceAccess::QUERY_STATUS | ServiceAccess::STOP)?;
    let _ = service.stop();
    wait_for_process_exit(&service)
}

pub(crate) fn status(name: &str) -> Result<ServiceState> {
    let scm = ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)?;
    let service = scm.open_service(name, ServiceAccess::QUERY_STATUS)?;
    Ok(service.query_status()?.current_state)
}

/// Poll until the SCM has fully removed the registration: reopening by name
/// keeps succeeding (or failing with marked-for-delete) until the deletion
/// lands. Deliberately unbounded; the SCM finishes cleanup on its own
/// schedule. Reopened handles are dropped immediately.
fn wait_until_removed(scm: &ServiceManager, name: &str) {
    loop {
        match scm.open_service(name, ServiceAccess::QUERY_STATUS) {
            Ok(stale) => drop(stale),
            Err(ref err) if error::is_marked_for_delete(err) => {}
            Err(_) => break,
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Poll up to [`EXIT_POLL_ATTEMPTS`] times for the service process to exit
/// (reported process id of zero). Query errors propagate; running out of
/// attempts does not.
fn wait_for_process_exit(service: &Service) -> Result<()> {
    for _ in 0..EXIT_POLL_ATTEMPTS {
        thread::sleep(POLL_INTERVAL);
        let status = service.query_status()?;
        if status.process_id.unwrap_or(0) == 0 {
            break;
        }
    }
    Ok(())
}

/// `windows-service` has no surface for the service SID type, so the
/// unrestricted SID is applied with a raw `ChangeServiceConfig2W` on a
/// freshly opened handle.
fn set_unrestricted_sid_type(name: &str) -> io::Result<()> {
    let wide_name: Vec<u16> = OsStr::new(name).encode_wide().chain(iter::once(0)).collect();
    let scm = ScHandle::new(unsafe {
        winsvc::OpenSCManagerW(ptr::null(), ptr::null(), winsvc::SC_MANAGER_CONNECT)
    })?;
    let service = ScHandle::new(unsafe {
        winsvc::OpenServiceW(scm.0, wide_name.as_ptr(), winsvc::SERVICE_CHANGE_CONFIG)
    })?;
    let mut info = winsvc::SERVICE_SID_INFO {
        dwServiceSidType: winsvc::SERVICE_SID_TYPE_UNRESTRICTED,
    };
    let ok = unsafe {
        winsvc::ChangeServiceConfig2W(
            service.0,
            winsvc::SERVICE_CONFIG_SERVICE_SID_INFO,
            &mut info as *mut _ as LPVOID,
        )
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

struct ScHandle(winsvc::SC_HANDLE);

impl ScHandle {
    fn new(raw: winsvc::SC_HANDLE) -> io::Result<Self> {
        if raw.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(ScHandle(raw))
    }
}

impl Drop for ScHandle {
    fn drop(&mut self) {
        unsafe { winsvc::CloseServiceHandle(self.0) };
    }
}
