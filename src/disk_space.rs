//! Disk space reporting (§4.8 `disk_remaining`, §9 "informational").
//!
//! The engine never refuses work on low space; this is report-only
//! telemetry.

use std::path::Path;

/// Available disk space at `path` in bytes, or `None` if the check fails
/// (nonexistent path, unsupported platform, OS error).
pub fn disk_remaining(path: &Path) -> Option<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;

        // SAFETY: c_path is a valid, null-terminated C string; stat is
        // zeroed before the call and only read after it succeeds.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return None;
            }
            Some(stat.f_bavail.saturating_mul(stat.f_frsize))
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide_path is a valid, null-terminated wide string; the
        // output pointers reference valid, aligned u64 locals and are only
        // read after the call reports success.
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut total_bytes: u64 = 0;
            let mut total_free_bytes: u64 = 0;

            let ok = GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut total_bytes as *mut u64 as *mut _,
                &mut total_free_bytes as *mut u64 as *mut _,
            );
            if ok == 0 { None } else { Some(free_bytes_available) }
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        None
    }
}
