// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Leveled, tagged kernel logging for trap diagnostics
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests (capture sink on host)
//! PUBLIC API: log_* macros, emit(level,target,args), Level
//! DEPENDS_ON: uart::KernelUart (bare metal), in-memory capture (host)
//! INVARIANTS: Debug/Trace only in debug builds or with `debug_uart`; single-line emission; never used on trap success paths
//! ADR: docs/adr/0001-trap-layer-boundaries.md

use core::fmt::Arguments;

/// Logging severity used by the kernel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Level {
    pub const fn tag(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn enabled(self) -> bool {
        match self {
            Level::Debug | Level::Trace => cfg!(any(debug_assertions, feature = "debug_uart")),
            _ => true,
        }
    }
}

/// Emits a structured log line if the level is enabled for the current build.
pub fn emit(level: Level, target: &'static str, args: Arguments<'_>) {
    if !level.enabled() {
        return;
    }

    #[cfg(all(target_arch = "loongarch64", target_os = "none"))]
    {
        use core::fmt::Write;

        let mut uart = crate::uart::KernelUart::lock();
        let writer = &mut *uart;
        let _ = writer.write_fmt(format_args!("[{} {}] ", level.tag(), target));
        let _ = writer.write_fmt(args);
        let _ = writer.write_char('\n');
    }

    #[cfg(not(all(target_arch = "loongarch64", target_os = "none")))]
    capture::push(level, target, args);
}

/// Host-side sink: keeps the most recent lines so tests can assert on diagnostics.
#[cfg(not(all(target_arch = "loongarch64", target_os = "none")))]
pub mod capture {
    use alloc::{collections::VecDeque, string::String};
    use core::fmt::{Arguments, Write};

    use spin::Mutex;

    use super::Level;

    const CAPTURE_LINES: usize = 1024;

    /// One captured line.
    #[derive(Clone, Debug)]
    pub struct Line {
        pub level: Level,
        pub target: &'static str,
        pub text: String,
    }

    static LINES: Mutex<VecDeque<Line>> = Mutex::new(VecDeque::new());

    pub(super) fn push(level: Level, target: &'static str, args: Arguments<'_>) {
        let mut text = String::new();
        let _ = text.write_fmt(args);
        let mut lines = LINES.lock();
        if lines.len() == CAPTURE_LINES {
            lines.pop_front();
        }
        lines.push_back(Line { level, target, text });
    }

    /// Returns true if any captured line at `level` contains `needle`.
    pub fn contains(level: Level, needle: &str) -> bool {
        LINES.lock().iter().any(|l| l.level == level && l.text.contains(needle))
    }

    /// Number of captured lines whose text contains `needle`, at any level.
    pub fn count(needle: &str) -> usize {
        LINES.lock().iter().filter(|l| l.text.contains(needle)).count()
    }
}

#[macro_export]
macro_rules! log_error {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Error, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Error, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_warn {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Warn, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Warn, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_info {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Info, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Info, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_debug {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Debug, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Debug, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_trace {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Trace, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Trace, module_path!(), format_args!($($arg)+));
    }};
}

#[cfg(test)]
mod tests {
    use super::{capture, Level};

    #[test]
    fn error_lines_are_captured_with_level() {
        crate::log_error!(target: "log-test", "marker {}", 0x5a5a_u32);
        assert!(capture::contains(Level::Error, "marker 23130"));
        assert!(!capture::contains(Level::Warn, "marker 23130"));
    }
}
