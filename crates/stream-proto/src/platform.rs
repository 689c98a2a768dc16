use std::path::PathBuf;

pub const DAEMON_TCP_PORT: u16 = 9877;

const DAEMON_TCP_HOST: &str = "127.0.0.1";

pub fn daemon_address() -> String {
    format!("{}:{}", DAEMON_TCP_HOST, DAEMON_TCP_PORT)
}

/// Each transport gets its own socket so a lingering process from the
/// previous load can never answer for the new one.
#[cfg(unix)]
pub fn mpv_socket_name(generation: u64) -> String {
    format!(
        "{}/publicstream-mpv-{}-{}.sock",
        std::env::temp_dir().display(),
        std::process::id(),
        generation
    )
}

#[cfg(windows)]
pub fn mpv_socket_name(generation: u64) -> String {
    format!("publicstream-mpv-{}-{}", std::process::id(), generation)
}

#[cfg(unix)]
pub fn mpv_socket_arg(name: &str) -> String {
    format!("--input-ipc-server={}", name)
}

#[cfg(windows)]
pub fn mpv_socket_arg(name: &str) -> String {
    format!("--input-ipc-server=\\\\.\\pipe\\{}", name)
}

pub fn data_dir() -> PathBuf {
    // ~/.local/share/publicstream on both Linux and macOS
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("publicstream")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("publicstream")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("publicstream")
    }
    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("publicstream")
    }
}

#[cfg(unix)]
pub fn mpv_binary_name() -> &'static str {
    "mpv"
}

#[cfg(windows)]
pub fn mpv_binary_name() -> &'static str {
    "mpv.exe"
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var("PATH").ok()?;
    #[cfg(unix)]
    let sep = ":";
    #[cfg(windows)]
    let sep = ";";
    path.split(sep)
        .map(|dir| PathBuf::from(dir).join(name))
        .find(|p| p.exists())
}

/// Find mpv: `MPV_PATH` override, beside the current exe, then PATH.
pub fn find_mpv_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("MPV_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    let exe_name = mpv_binary_name();
    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(dir) = current_exe.parent() {
            let local_mpv = dir.join(exe_name);
            if local_mpv.exists() {
                return Some(local_mpv);
            }
        }
    }

    find_on_path(exe_name)
}

/// `systemd-inhibit` backs the keep-awake leases on Linux.
pub fn find_inhibit_binary() -> Option<PathBuf> {
    find_on_path("systemd-inhibit")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_names_differ_per_generation() {
        assert_ne!(mpv_socket_name(1), mpv_socket_name(2));
        assert!(mpv_socket_arg(&mpv_socket_name(1)).starts_with("--input-ipc-server="));
    }

    #[test]
    fn test_daemon_address() {
        assert!(daemon_address().ends_with(&DAEMON_TCP_PORT.to_string()));
    }
}
