use crate::error::{Error, Result};
use crate::gensvc::{Handler, ServiceControl, ServiceControlAccept, ServiceState};
use crate::svc::WinService;

use log::error;
use once_cell::sync::OnceCell;
use std::ffi::OsString;
use std::io;
use std::sync::Mutex;
use std::time::Duration;
use winapi::shared::minwindef::DWORD;
use winapi::shared::ntdef;
use winapi::um::handleapi::{self, INVALID_HANDLE_VALUE};
use winapi::um::processthreadsapi::{GetCurrentProcessId, ProcessIdToSessionId};
use winapi::um::tlhelp32::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
    TH32CS_SNAPPROCESS,
};
use windows_service::define_windows_service;
use windows_service::service::{ServiceExitCode, ServiceStatus, ServiceType};
use windows_service::service_control_handler::{
    self, ServiceControlHandlerResult, ServiceStatusHandle,
};
use windows_service::service_dispatcher;

define_windows_service!(ffi_service_main, service_main);

/// The service handed to the dispatcher. The dispatcher invokes
/// `service_main` on its own thread, so the entry has to go through a global.
/// One process hosts one service, hence a singleton rather than a table.
static SERVICE_TABLE: OnceCell<Mutex<Option<WinService>>> = OnceCell::new();

fn service_main(_args: Vec<OsString>) {
    let service = match SERVICE_TABLE.get() {
        Some(cell) => cell.lock().unwrap().take(),
        None => None,
    };
    let service = match service {
        Some(service) => service,
        None => return,
    };
    let handler = match ScmHandler::new(service.name()) {
        Ok(handler) => handler,
        Err(err) => {
            error!("failed to register control handler: {err}");
            return;
        }
    };
    let result = service.execute(&handler);
    // The loop reports nothing after Running; the final Stopped report is
    // this glue's job, mirroring what the SCM dispatch infrastructure owes
    // the manager once the control callback returns.
    let _ = handler.update(ServiceState::Stopped, ServiceControlAccept::empty());
    if let Err(err) = result {
        error!("dispatch loop failed: {err}");
    }
}

/// Park the calling thread in the SCM dispatcher and run `service` when the
/// SCM asks for it. Blocks until the service stops.
pub(crate) fn run(service: WinService) -> Result<()> {
    let name = service.name().to_owned();
    SERVICE_TABLE
        .set(Mutex::new(Some(service)))
        .map_err(|_| Error::AlreadyDispatched)?;
    service_dispatcher::start(&name, ffi_service_main)?;
    Ok(())
}

/// Was this process launched by the service control manager?
///
/// True only when the parent process is `services.exe` running in session 0,
/// the same check the .NET runtime uses. Any error while probing collapses to
/// `false`: a broken probe means "treat as interactive", never a failure.
pub fn is_windows_service() -> bool {
    launched_by_scm().unwrap_or(false)
}

fn launched_by_scm() -> io::Result<bool> {
    let snapshot = Snapshot::new()?;
    let me = snapshot.find_process(unsafe { GetCurrentProcessId() })?;
    let parent = snapshot.find_process(me.th32ParentProcessID)?;
    if !exe_name(&parent.szExeFile).eq_ignore_ascii_case("services.exe") {
        return Ok(false);
    }
    let mut session: DWORD = 0;
    if unsafe { ProcessIdToSessionId(parent.th32ProcessID, &mut session) } == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(session == 0)
}

fn exe_name(wide: &[u16]) -> String {
    let len = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..len])
}

struct Snapshot {
    handle: ntdef::HANDLE,
}

impl Snapshot {
    fn new() -> io::Result<Self> {
        let handle = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) };
        if handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }
        Ok(Snapshot { handle })
    }

    fn find_process(&self, pid: DWORD) -> io::Result<PROCESSENTRY32W> {
        let mut entry: PROCESSENTRY32W = unsafe { std::mem::zeroed() };
        entry.dwSize = std::mem::size_of::<PROCESSENTRY32W>() as DWORD;
        // Process32FirstW rewinds the snapshot, so repeated lookups are fine.
        let mut more = unsafe { Process32FirstW(self.handle, &mut entry) };
        while more != 0 {
            if entry.th32ProcessID == pid {
                return Ok(entry);
            }
            more = unsafe { Process32NextW(self.handle, &mut entry) };
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("pid {pid} not found in process snapshot"),
        ))
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        unsafe { handleapi::CloseHandle(self.handle) };
    }
}

struct ScmHandler {
    rx: crossbeam_channel::Receiver<ServiceControl>,
    handle: ServiceStatusHandle,
}

impl ScmHandler {
    fn new(name: &str) -> Result<Self> {
        // Unbounded so the SCM callback thread can never block on a send
        // after the dispatch loop has already returned.
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = service_control_handler::register(name, move |control| {
            Self::handle(&tx, control)
        })?;
        Ok(ScmHandler { rx, handle })
    }

    fn handle(
        tx: &crossbeam_channel::Sender<ServiceControl>,
        control: ServiceControl,
    ) -> ServiceControlHandlerResult {
        match control {
            ServiceControl::Stop | ServiceControl::Shutdown | ServiceControl::Interrogate => {
                let _ = tx.send(control);
                ServiceControlHandlerResult::NoError
            }
            _ => ServiceControlHandlerResult::NotImplemented,
        }
    }
}

impl Handler for ScmHandler {
    fn chan(&self) -> &crossbeam_channel::Receiver<ServiceControl> {
        &self.rx
    }

    fn update(&self, status: ServiceState, controls_accepted: ServiceControlAccept) -> Result<()> {
        self.handle.set_service_status(ServiceStatus {
            service_type: ServiceType::OWN_PROCESS,
            current_state: status,
            controls_accepted,
            exit_code: ServiceExitCode::Win32(0),
            checkpoint: 0,
            wait_hint: Duration::default(),
            process_id: None,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::exe_name;

    #[test]
    fn exe_name_stops_at_nul() {
        let mut wide = [0u16; 8];
        for (i, c) in "svc.exe".encode_utf16().enumerate() {
            wide[i] = c;
        }
        assert_eq!(exe_name(&wide), "svc.exe");
    }

    #[test]
    fn exe_name_without_nul_takes_whole_buffer() {
        let wide: Vec<u16> = "services.exe".encode_utf16().collect();
        assert!(exe_name(&wide).eq_ignore_ascii_case("SERVICES.EXE"));
    }
}
