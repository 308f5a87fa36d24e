/// Like `tracing::info!`, but takes the starting time of a phase as its first argument
/// and attaches how long the phase took, in seconds, as the `runtime_secs` field.
/// ```
/// use chrono::Local;
/// use nist_scrap::info_time;
///
/// let start = Local::now();
/// info_time!(start, "Done with {} {}", 12, "formulas");
/// ```
#[macro_export]
macro_rules! info_time {
    ($time:expr, $strfm:literal $(,)? $($arg:expr),*) => {{
        let run_time = (::chrono::Local::now() - $time)
            .num_microseconds()
            .map(|n| n as f64 / 1_000_000.0)
            .unwrap_or(0.0);
        let message = format!($strfm, $($arg),*);
        ::tracing::info!(runtime_secs = run_time, "{}", message);
    }};
}
