/*!
 * Error Types
 * Centralized error handling with thiserror and miette
 *
 * Two kinds of failure exist in this crate:
 * - Recoverable: named lock creation and configuration loading return `Result`
 * - Invariant violations: unexpected OS results from wait/wake primitives are
 *   routed through [`fatal`], which reports and aborts the process
 */

use miette::Diagnostic;
use thiserror::Error;

/// Result alias for fallible operations in this crate
pub type FutexResult<T> = Result<T, FutexError>;

/// Errors raised by the wait/wake primitives and their companions
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum FutexError {
    #[error("Unexpected result from {op}: {code} ({message})")]
    #[diagnostic(
        code(futex::unexpected_os_error),
        help("The OS wait primitive returned a code outside its documented contract. This is a bug or an unsupported environment.")
    )]
    UnexpectedOsError {
        op: &'static str,
        code: i64,
        message: String,
    },

    #[error("Unsupported atomic width: {0} bytes")]
    #[diagnostic(
        code(futex::unsupported_width),
        help("Only 1, 2, 4 and 8 byte atomics can be waited on.")
    )]
    UnsupportedWidth(usize),

    #[error("Mutex misuse: {0}")]
    #[diagnostic(
        code(mutex::misuse),
        help("A mutex was re-locked by its owner, unlocked by another thread, dropped while held, or nested too deeply.")
    )]
    MutexMisuse(&'static str),

    #[error("Invalid lock name: {0}")]
    #[diagnostic(
        code(ipc_lock::invalid_name),
        help("Lock names must be non-empty, shorter than 250 bytes and contain no NUL bytes.")
    )]
    InvalidLockName(String),

    #[error("Failed to create inter-process lock '{name}': {message}")]
    #[diagnostic(
        code(ipc_lock::creation_failed),
        help("Check permissions on the named semaphore/mutex namespace and the per-process limit of open handles.")
    )]
    IpcLockCreation { name: String, message: String },

    #[error("Stress run stalled: thread {thread} waited {waited_ms}ms on a {width}-byte word")]
    #[diagnostic(
        code(stress::stalled),
        help("A waiter never observed its wakeup. This indicates a lost notification.")
    )]
    Stalled {
        width: usize,
        thread: usize,
        waited_ms: u64,
    },

    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code(config::invalid),
        help("Check the FUTEX_* environment variables and the stress configuration file.")
    )]
    InvalidConfig(String),
}

impl FutexError {
    /// Build an [`FutexError::UnexpectedOsError`] from a raw errno/status value
    pub fn os(op: &'static str, code: i64) -> Self {
        let message = i32::try_from(code)
            .map(|c| std::io::Error::from_raw_os_error(c).to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        FutexError::UnexpectedOsError { op, code, message }
    }
}

impl From<serde_json::Error> for FutexError {
    fn from(err: serde_json::Error) -> Self {
        FutexError::InvalidConfig(err.to_string())
    }
}

impl From<std::io::Error> for FutexError {
    fn from(err: std::io::Error) -> Self {
        FutexError::InvalidConfig(err.to_string())
    }
}

/// Report an invariant violation and abort the process
///
/// Wait/wake primitives have no recoverable error path: a result outside the
/// OS contract means the environment or the caller is broken.
#[cold]
#[inline(never)]
pub fn fatal(err: FutexError) -> ! {
    tracing::error!(error = %err, "fatal synchronization error");
    eprintln!("{:?}", miette::Report::new(err));
    std::process::abort()
}
