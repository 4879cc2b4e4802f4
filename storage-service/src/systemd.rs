// SPDX-License-Identifier: GPL-3.0-only

//! systemd readiness notification

use sd_notify::NotifyState;

const NOTIFY_SOCKET: &str = "NOTIFY_SOCKET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Notified,
    /// `NOTIFY_SOCKET` is unset: not started as a `Type=notify` unit
    NotSupervised,
}

/// Tell the service manager that startup finished.
pub fn notify_ready() -> std::io::Result<Readiness> {
    if std::env::var_os(NOTIFY_SOCKET).is_none() {
        return Ok(Readiness::NotSupervised);
    }
    sd_notify::notify(false, &[NotifyState::Ready])?;
    Ok(Readiness::Notified)
}
