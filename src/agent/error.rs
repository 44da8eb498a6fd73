use crate::protocol::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- protocol errors -------------------------------------------
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    // --------------------------------- collaborator errors ---------------------------------------
    #[error("remote backend: {0}")]
    Backend(anyhow::Error),
    #[error("hook: {0}")]
    Hook(anyhow::Error),
}

impl Error {
    /// Return a hint to an interface - continue the session after error or drop it.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Protocol(_) => false,
            Error::Hook(_) => false,

            // connection with remote side is lost
            Error::Backend(_) => true,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "agent", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "agent", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
