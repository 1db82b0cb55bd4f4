use std::sync::{Mutex, PoisonError};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

/// Placeholder reported for anything the platform could not tell us.
pub const UNKNOWN: &str = "Unknown";

/// Foreground window title and the executable name of its owning process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundWindow {
    pub title: String,
    pub process: String,
}

impl ForegroundWindow {
    pub fn new(title: impl Into<String>, process: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            process: process.into(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN, UNKNOWN)
    }

    /// True when either the title or the process could not be determined.
    pub fn is_unknown(&self) -> bool {
        self.title == UNKNOWN || self.process == UNKNOWN
    }
}

/// Reports the current foreground window.
///
/// Implementations never fail: anything that goes wrong is reported as
/// [`ForegroundWindow::unknown`].
pub trait ForegroundProbe {
    fn foreground(&self) -> ForegroundWindow;
}

/// Best-effort probe for the running platform.
///
/// - Windows: Win32 foreground window, process name via `sysinfo`.
/// - X11: `xdotool` for the active window and its pid, process name via `sysinfo`.
/// - Wayland, macOS and anything else: always unknown.
pub struct SystemProbe {
    system: Mutex<System>,
}

impl SystemProbe {
    pub fn new() -> Self {
        if !platform::SUPPORTED {
            warn!(
                target: "keyweave::window",
                "Foreground window detection is not supported here; macros will not fire"
            );
        }
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn process_name(&self, pid: u32) -> Option<String> {
        let pid = Pid::from_u32(pid);
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system
            .process(pid)
            .map(|process| process.name().to_string_lossy().into_owned())
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ForegroundProbe for SystemProbe {
    fn foreground(&self) -> ForegroundWindow {
        match platform::foreground_window() {
            Ok((title, pid)) => {
                let process = self
                    .process_name(pid)
                    .unwrap_or_else(|| UNKNOWN.to_string());
                let title = if title.is_empty() {
                    UNKNOWN.to_string()
                } else {
                    title
                };
                ForegroundWindow { title, process }
            }
            Err(err) => {
                debug!(target: "keyweave::window", error = %err, "Foreground lookup failed");
                ForegroundWindow::unknown()
            }
        }
    }
}

#[cfg(windows)]
#[allow(unsafe_code)]
mod platform {
    use anyhow::{Result, bail};
    use windows::Win32::UI::WindowsAndMessaging::{
        GetForegroundWindow, GetWindowTextW, GetWindowThreadProcessId,
    };

    pub const SUPPORTED: bool = true;

    /// Title and pid of the foreground window.
    pub fn foreground_window() -> Result<(String, u32)> {
        // SAFETY: plain Win32 queries on a window handle; the text buffer outlives the call.
        unsafe {
            let hwnd = GetForegroundWindow();
            if hwnd.0.is_null() {
                bail!("no foreground window");
            }
            let mut buf = [0u16; 512];
            let len = GetWindowTextW(hwnd, &mut buf).max(0) as usize;
            let title = String::from_utf16_lossy(&buf[..len]);
            let mut pid = 0u32;
            GetWindowThreadProcessId(hwnd, Some(&mut pid));
            if pid == 0 {
                bail!("foreground window has no owning process");
            }
            Ok((title, pid))
        }
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
mod platform {
    use anyhow::{Context, Result, bail};
    use std::io::Read;
    use std::process::{Command, Stdio};
    use std::time::Duration;
    use wait_timeout::ChildExt;

    pub const SUPPORTED: bool = true;

    /// Upper bound for one `xdotool` call; the dispatch loop waits on it.
    const XDOTOOL_TIMEOUT: Duration = Duration::from_secs(1);

    /// Title and pid of the active X11 window, via `xdotool`.
    pub fn foreground_window() -> Result<(String, u32)> {
        if is_wayland() {
            bail!("window detection is unavailable on Wayland");
        }
        let window_id = xdotool(&["getactivewindow"])?;
        let title = xdotool(&["getwindowname", &window_id]).unwrap_or_default();
        let pid = xdotool(&["getwindowpid", &window_id])?
            .parse::<u32>()
            .context("xdotool returned a non-numeric pid")?;
        Ok((title, pid))
    }

    fn is_wayland() -> bool {
        let session = std::env::var("XDG_SESSION_TYPE").unwrap_or_default();
        session.eq_ignore_ascii_case("wayland") || std::env::var_os("WAYLAND_DISPLAY").is_some()
    }

    fn xdotool(args: &[&str]) -> Result<String> {
        run_bounded("xdotool", args, XDOTOOL_TIMEOUT)
    }

    /// Run `program` and return its trimmed stdout, killing it after `timeout`.
    fn run_bounded(program: &str, args: &[&str], timeout: Duration) -> Result<String> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("{program} not found; install it to enable window detection"))?;

        let Some(status) = child.wait_timeout(timeout)? else {
            let _ = child.kill();
            let _ = child.wait();
            bail!("{program} {} timed out after {timeout:?}", args.join(" "));
        };
        if !status.success() {
            bail!("{program} {} failed with {status}", args.join(" "));
        }

        let mut stdout = String::new();
        if let Some(mut pipe) = child.stdout.take() {
            pipe.read_to_string(&mut stdout)?;
        }
        Ok(stdout.trim().to_string())
    }

}

#[cfg(not(any(windows, all(unix, not(target_os = "macos")))))]
mod platform {
    use anyhow::{Result, bail};

    pub const SUPPORTED: bool = false;

    pub fn foreground_window() -> Result<(String, u32)> {
        bail!("foreground window detection is not implemented on this platform")
    }
}
