//! Logging shortcuts for an injected [`Logger`](crate::logging::Logger).
//!
//! `log_info!(self.log, "opened {}", path)` mirrors `log::info!` but routes the
//! record through the component's own logger handle.

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log($crate::logging::Level::Error, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log($crate::logging::Level::Warn, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log($crate::logging::Level::Info, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log($crate::logging::Level::Debug, format_args!($($arg)+))
    };
}
