//! Helper macros for logging (console printing).

use std::sync::OnceLock;

use env_logger::Env;

/// Global variable holding the process identity string used as the logging
/// prefix. Set once at startup, e.g. to "server" or "client".
pub static IDENT: OnceLock<String> = OnceLock::new();

/// Log TRACE message with parenthesized identity prefix.
///
/// Example:
/// ```no_compile
/// pi_trace!("sent {} bytes", len);
/// ```
#[macro_export]
macro_rules! pi_trace {
    ($($fmt_args:tt)*) => {
        log::trace!(
            "({}) {}",
            $crate::IDENT.get().map_or("-", |me| me.as_str()),
            format!($($fmt_args)*)
        )
    };
}

/// Log DEBUG message with parenthesized identity prefix.
#[macro_export]
macro_rules! pi_debug {
    ($($fmt_args:tt)*) => {
        log::debug!(
            "({}) {}",
            $crate::IDENT.get().map_or("-", |me| me.as_str()),
            format!($($fmt_args)*)
        )
    };
}

/// Log INFO message with parenthesized identity prefix.
#[macro_export]
macro_rules! pi_info {
    ($($fmt_args:tt)*) => {
        log::info!(
            "({}) {}",
            $crate::IDENT.get().map_or("-", |me| me.as_str()),
            format!($($fmt_args)*)
        )
    };
}

/// Log WARN message with parenthesized identity prefix.
#[macro_export]
macro_rules! pi_warn {
    ($($fmt_args:tt)*) => {
        log::warn!(
            "({}) {}",
            $crate::IDENT.get().map_or("-", |me| me.as_str()),
            format!($($fmt_args)*)
        )
    };
}

/// Log ERROR message with parenthesized identity prefix.
#[macro_export]
macro_rules! pi_error {
    ($($fmt_args:tt)*) => {
        log::error!(
            "({}) {}",
            $crate::IDENT.get().map_or("-", |me| me.as_str()),
            format!($($fmt_args)*)
        )
    };
}

/// Initialize `env_logger` to desired configuration if haven't.
pub fn logger_init() {
    let _ =
        env_logger::Builder::from_env(Env::default().default_filter_or("info"))
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .try_init();
}

/// Log an error string to logger and then return a `ShardKvError`
/// containing the string.
///
/// Example:
/// ```no_compile
/// let e = logged_err!("got {} parse failures", cnt);
/// ```
#[macro_export]
macro_rules! logged_err {
    ($($fmt_args:tt)*) => {
        {
            $crate::pi_error!($($fmt_args)*);
            Err($crate::ShardKvError::msg(format!($($fmt_args)*)))
        }
    };
}
