#![forbid(unsafe_code)]

//! Built-in process tables.
//!
//! Both tables hold lower-case names and are merged into every
//! [`Whitelist`](super::Whitelist).

use std::path::Path;

/// Processes that are never terminated, whatever the user whitelisted.
pub const CRITICAL_PROCESSES: &[&str] = &[
    // Windows
    "system",
    "smss.exe",
    "csrss.exe",
    "wininit.exe",
    "services.exe",
    "lsass.exe",
    "winlogon.exe",
    "svchost.exe",
    "explorer.exe",
    "dwm.exe",
    "taskmgr.exe",
    "conhost.exe",
    "fontdrvhost.exe",
    // Linux
    "systemd",
    "init",
    "kthreadd",
    "bash",
    "sh",
    "zsh",
    "fish",
    "ssh",
    "sshd",
    "dbus-daemon",
    "dbus-broker",
    "systemd-logind",
    "login",
    "agetty",
    "xorg",
    "xwayland",
    "gnome-shell",
    "gnome-session-binary",
    "kwin_x11",
    "kwin_wayland",
    "plasmashell",
    "gdm",
    "sddm",
    "lightdm",
    // macOS
    "launchd",
    "kernel_task",
    "loginwindow",
    "windowserver",
    "dock",
    "finder",
    "systemuiserver",
    // ourselves
    "lockin",
];

/// Background services that are left alone by default.
pub const SYSTEM_WHITELIST: &[&str] = &[
    // Windows security and services
    "antimalware service executable",
    "windows defender",
    "securityhealthservice.exe",
    "msmpeng.exe",
    "runtimebroker.exe",
    "searchindexer.exe",
    "spoolsv.exe",
    "audiodg.exe",
    "consent.exe",
    "ctfmon.exe",
    // Linux services
    "networkmanager",
    "wpa_supplicant",
    "polkitd",
    "pipewire",
    "pipewire-pulse",
    "wireplumber",
    "pulseaudio",
    "bluetoothd",
    "cupsd",
    "cron",
    "rsyslogd",
    "udisksd",
    "upowerd",
    "accounts-daemon",
    "avahi-daemon",
    "fwupd",
    "thermald",
];

/// Installation directories whose executables belong to the OS. Compared
/// against lower-cased paths with `/` separators.
const SYSTEM_DIRS: &[&str] = &[
    "/usr/libexec/",
    "/usr/lib/systemd/",
    "/lib/systemd/",
    "/usr/sbin/",
    "/sbin/",
    "c:/windows/",
    "/system/library/",
];

const SYSTEM_KEYWORDS: &[&str] = &[
    "service", "helper", "updater", "daemon", "agent", "gvfs", "at-spi", "xdg-",
];

/// Lower-case and use `/` as the only path separator.
pub(crate) fn normalize(value: &str) -> String {
    value.replace('\\', "/").to_lowercase()
}

pub fn is_critical(name: &str) -> bool {
    let name = normalize(name);
    CRITICAL_PROCESSES.contains(&name.as_str())
}

pub fn is_system_whitelisted(name: &str) -> bool {
    let name = normalize(name);
    SYSTEM_WHITELIST.contains(&name.as_str())
}

/// Whether a process looks like part of the OS rather than something the
/// user launched.
///
/// Only decides what an app picker shows. Termination decisions go through
/// [`Whitelist::decide`](super::Whitelist::decide).
pub fn is_system_process(name: &str, exe: Option<&Path>) -> bool {
    if is_critical(name) || is_system_whitelisted(name) {
        return true;
    }

    if let Some(exe) = exe {
        let path = normalize(&exe.to_string_lossy());
        if SYSTEM_DIRS.iter().any(|dir| path.starts_with(dir)) {
            return true;
        }
    }

    let name = normalize(name);
    SYSTEM_KEYWORDS.iter().any(|keyword| name.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_normalized() {
        for name in CRITICAL_PROCESSES.iter().chain(SYSTEM_WHITELIST) {
            assert_eq!(*name, normalize(name), "{name} is not normalized");
        }
    }

    #[test]
    fn critical_lookup_ignores_case() {
        assert!(is_critical("WindowServer"));
        assert!(is_critical("SYSTEMD"));
        assert!(!is_critical("firefox"));
    }

    #[test]
    fn system_process_heuristics() {
        assert!(is_system_process("tracker-miner-fs-3", Some(Path::new("/usr/libexec/tracker-miner-fs-3"))));
        assert!(is_system_process("GoogleUpdater", None));
        assert!(is_system_process("evolution-data-server-helper", None));
        assert!(is_system_process("svchost.exe", Some(Path::new(r"C:\Windows\System32\svchost.exe"))));
        assert!(!is_system_process("firefox", Some(Path::new("/usr/lib/firefox/firefox"))));
        assert!(!is_system_process("code", Some(Path::new("/usr/share/code/code"))));
    }
}
