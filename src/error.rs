use thiserror::Error;
use winapi::shared::winerror::ERROR_SERVICE_MARKED_FOR_DELETE;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Install refuses to clobber a registration that is not stopped.
    #[error("service `{0}` is already installed and running")]
    AlreadyRunning(String),

    /// A service has already been handed to the dispatcher in this process.
    #[error("a service has already been started in this process")]
    AlreadyDispatched,

    /// The control channel disconnected while the dispatch loop was waiting.
    /// Cannot happen under the real SCM handler, which holds the sender for
    /// the life of the process.
    #[error("service control channel disconnected")]
    ControlsDisconnected,

    #[error(transparent)]
    Scm(#[from] windows_service::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn raw_os_error(err: &windows_service::Error) -> Option<i32> {
    match err {
        windows_service::Error::Winapi(io) => io.raw_os_error(),
        _ => None,
    }
}

/// True when the SCM reports the registration as marked for deletion: the
/// transient state between a delete request and actual removal. Install and
/// uninstall tolerate it instead of failing.
pub(crate) fn is_marked_for_delete(err: &windows_service::Error) -> bool {
    raw_os_error(err) == Some(ERROR_SERVICE_MARKED_FOR_DELETE as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use winapi::shared::winerror::ERROR_SERVICE_DOES_NOT_EXIST;

    fn winapi_err(code: u32) -> windows_service::Error {
        windows_service::Error::Winapi(std::io::Error::from_raw_os_error(code as i32))
    }

    #[test]
    fn classifies_marked_for_delete() {
        assert!(is_marked_for_delete(&winapi_err(
            ERROR_SERVICE_MARKED_FOR_DELETE
        )));
        assert!(!is_marked_for_delete(&winapi_err(
            ERROR_SERVICE_DOES_NOT_EXIST
        )));
    }

    #[test]
    fn already_running_names_the_service() {
        let err = Error::AlreadyRunning("svcA".to_string());
        assert!(err.to_string().contains("svcA"));
    }
}
