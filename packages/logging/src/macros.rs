/// Logs the first argument list at `debug` level, or the second one at
/// `trace` level when trace logging is enabled.
///
/// Used where the trace form carries a full frame body that is too noisy
/// for debug output.
#[macro_export]
macro_rules! debug_or_trace {
    (($($debug:tt)+), ($($trace:tt)+)) => {
        if $crate::log::log_enabled!($crate::log::Level::Trace) {
            $crate::log::trace!($($trace)*);
        } else {
            $crate::log::debug!($($debug)*);
        }
    }
}
