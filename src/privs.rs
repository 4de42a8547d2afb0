// SPDX-License-Identifier: Apache-2.0

//! One-shot privilege drop, invoked once after startup when the agent was
//! launched with elevated rights it no longer needs.

use std::error::Error;
use std::ffi::CString;
use tracing::{info, warn};

/// Switch the process to the given unprivileged user (group first, then
/// user, so the user switch cannot lock us out of the group switch). A
/// no-op when not running as root.
pub fn drop_privileges(user: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
    if unsafe { libc::geteuid() } != 0 {
        warn!(user, "not running as root, nothing to drop");
        return Ok(());
    }

    let name = CString::new(user).map_err(|e| format!("invalid user name: {}", e))?;
    let pw = unsafe { libc::getpwnam(name.as_ptr()) };
    if pw.is_null() {
        return Err(format!("unknown user: {}", user).into());
    }
    let (uid, gid) = unsafe { ((*pw).pw_uid, (*pw).pw_gid) };

    if unsafe { libc::setgroups(0, std::ptr::null()) } != 0 {
        return Err(last_errno("setgroups"));
    }
    if unsafe { libc::setgid(gid) } != 0 {
        return Err(last_errno("setgid"));
    }
    if unsafe { libc::setuid(uid) } != 0 {
        return Err(last_errno("setuid"));
    }

    info!(user, uid, gid, "dropped privileges");
    Ok(())
}

fn last_errno(op: &str) -> Box<dyn Error + Send + Sync> {
    format!("{} failed: {}", op, std::io::Error::last_os_error()).into()
}
