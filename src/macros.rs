
/// Logs a line tagged with a component, routed through the log target so
/// filters and the dispatcher's `[target]` field pick it up. Timestamp, pid,
/// and tid come from the dispatcher format, not from each call site.
/// Usage:
/// ```rust
/// use vigil::vigil_log;
/// use log::Level;
/// let err = "disk full";
/// vigil_log!(Level::Info, "engine", "Scan started");
/// vigil_log!(Level::Error, "cache", "Persist failed: {}", err);
/// ```
/// Logs like:
/// [2026-07-30T09:12:44+02:00][ERROR][vigil::cache][pid=4411][tid=12] Persist failed: ...
#[macro_export]
macro_rules! vigil_log {
    ($level:expr, $component:expr, $fmt:expr $(, $($arg:tt)+)?) => {
        log::log!(
            target: concat!("vigil::", $component),
            $level,
            $fmt
            $(, $($arg)+)?
        );
    };
}
