//! ---
//! mbs_section: "03-logging"
//! mbs_subsection: "module"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Log sinks and structured logging macros."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
#[doc(hidden)]
#[macro_export]
macro_rules! __mbs_event {
    ($level:expr, context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::tracing::event!(
            $level,
            instance = ctx.instance,
            worker = ctx.worker,
            phase = ctx.phase,
            message = %format_args!($($arg)+)
        );
    }};
    ($level:expr, $($arg:tt)+) => {{
        $crate::tracing::event!(
            $level,
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit a debug log enriched with stressor context.
#[macro_export]
macro_rules! mbs_debug {
    ($($arg:tt)+) => {
        $crate::__mbs_event!($crate::tracing::Level::DEBUG, $($arg)+)
    };
}

/// Emit an informational log enriched with stressor context.
#[macro_export]
macro_rules! mbs_info {
    ($($arg:tt)+) => {
        $crate::__mbs_event!($crate::tracing::Level::INFO, $($arg)+)
    };
}

/// Emit an error log enriched with stressor context.
#[macro_export]
macro_rules! mbs_error {
    ($($arg:tt)+) => {
        $crate::__mbs_event!($crate::tracing::Level::ERROR, $($arg)+)
    };
}
