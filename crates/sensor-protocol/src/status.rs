//! Status values carried by `DONE` replies.
//!
//! Zero (or a positive value) is success; failures are negated errno codes so
//! the numbers stay meaningful to any client that only knows libc.

use sensor_core::ModuleError;

pub const OK: i64 = 0;
/// Client lacks the permission the sensor requires.
pub const PERMISSION_DENIED: i64 = -(libc::EACCES as i64);
/// Malformed or out-of-range argument.
pub const INVALID_ARGUMENT: i64 = -(libc::EINVAL as i64);
/// Unknown sensor, or no sensor bound to this connection yet.
pub const NO_DEVICE: i64 = -(libc::ENODEV as i64);
pub const IO_ERROR: i64 = -(libc::EIO as i64);
/// No data available yet.
pub const BUSY: i64 = -(libc::EBUSY as i64);
pub const NOT_SUPPORTED: i64 = -(libc::ENOTSUP as i64);

pub fn is_ok(value: i64) -> bool {
    value >= 0
}

/// Maps a module failure to the status reported to the client.
pub fn from_module_error(err: &ModuleError) -> i64 {
    match err {
        ModuleError::StartFailed(_) | ModuleError::Io(_) => IO_ERROR,
        ModuleError::NotStarted => INVALID_ARGUMENT,
        ModuleError::Unsupported => NOT_SUPPORTED,
        ModuleError::NoData => BUSY,
        ModuleError::InvalidArgument(_) => INVALID_ARGUMENT,
    }
}

/// Short description of a status value for logs and client errors.
pub fn describe(value: i64) -> String {
    if is_ok(value) {
        return "ok".to_string();
    }
    let code = value.checked_neg().unwrap_or(i64::MAX);
    let errno = i32::try_from(code).unwrap_or(i32::MAX);
    std::io::Error::from_raw_os_error(errno).to_string()
}
