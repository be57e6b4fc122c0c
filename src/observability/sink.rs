//! Operator-facing log sinks.
//!
//! Lifecycle messages ("started reverse proxy", "could not stop proxy
//! server: ...") are written through a [`LogSink`]. In the foreground and in
//! service debug mode that is the console; under the Windows service manager
//! it is the event log registered for the service name.

use std::sync::Arc;

/// Destination for lifecycle log entries.
pub trait LogSink: Send + Sync {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Writes entries as tracing events.
#[derive(Debug, Clone)]
pub struct ConsoleSink {
    source: String,
}

impl ConsoleSink {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl LogSink for ConsoleSink {
    fn info(&self, message: &str) {
        tracing::info!(source = %self.source, "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(source = %self.source, "{}", message);
    }
}

/// Open the sink for a service: console in debug mode, event log otherwise.
pub fn open(name: &str, debug: bool) -> std::io::Result<Arc<dyn LogSink>> {
    if debug {
        return Ok(Arc::new(ConsoleSink::new(name)));
    }
    open_system(name)
}

#[cfg(windows)]
fn open_system(name: &str) -> std::io::Result<Arc<dyn LogSink>> {
    Ok(Arc::new(eventlog::EventLogSink::open(name)?))
}

#[cfg(not(windows))]
fn open_system(name: &str) -> std::io::Result<Arc<dyn LogSink>> {
    Ok(Arc::new(ConsoleSink::new(name)))
}

#[cfg(windows)]
pub use eventlog::EventLogSink;

#[cfg(windows)]
mod eventlog {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use std::ptr;

    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::System::EventLog::{
        DeregisterEventSource, RegisterEventSourceW, ReportEventW, EVENTLOG_ERROR_TYPE,
        EVENTLOG_INFORMATION_TYPE, REPORT_EVENT_TYPE,
    };

    use super::LogSink;

    const EVENT_ID: u32 = 1;

    fn wide(s: &str) -> Vec<u16> {
        OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
    }

    /// Windows event log source registered under the service name.
    ///
    /// The handle is kept as an integer; event log handles are valid on any
    /// thread.
    #[derive(Debug)]
    pub struct EventLogSink {
        handle: isize,
    }

    impl EventLogSink {
        pub fn open(source: &str) -> std::io::Result<Self> {
            let source = wide(source);
            let handle = unsafe { RegisterEventSourceW(ptr::null(), source.as_ptr()) };
            if handle.is_null() {
                return Err(std::io::Error::last_os_error());
            }
            Ok(Self {
                handle: handle as isize,
            })
        }

        fn raw(&self) -> HANDLE {
            self.handle as HANDLE
        }

        fn report(&self, kind: REPORT_EVENT_TYPE, message: &str) {
            let message = wide(message);
            let strings = [message.as_ptr()];
            let ok = unsafe {
                ReportEventW(
                    self.raw(),
                    kind,
                    0,
                    EVENT_ID,
                    ptr::null_mut(),
                    strings.len() as u16,
                    0,
                    strings.as_ptr(),
                    ptr::null(),
                )
            };
            if ok == 0 {
                tracing::warn!(
                    error = %std::io::Error::last_os_error(),
                    "Failed to write event log entry"
                );
            }
        }
    }

    impl LogSink for EventLogSink {
        fn info(&self, message: &str) {
            self.report(EVENTLOG_INFORMATION_TYPE, message);
        }

        fn error(&self, message: &str) {
            self.report(EVENTLOG_ERROR_TYPE, message);
        }
    }

    impl Drop for EventLogSink {
        fn drop(&mut self) {
            unsafe {
                DeregisterEventSource(self.raw());
            }
        }
    }
}
