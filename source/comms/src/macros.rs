#![allow(unused_macros)]

#[cfg(feature = "defmt-logging")]
macro_rules! link_log {
    (trace,   $($arg:expr),*) => { defmt::trace!($($arg),*) };
    (debug,   $($arg:expr),*) => { defmt::debug!($($arg),*) };
    (info,    $($arg:expr),*) => { defmt::info!($($arg),*) };
    (warn,    $($arg:expr),*) => { defmt::warn!($($arg),*) };
    (error,   $($arg:expr),*) => { defmt::error!($($arg),*) };
}

#[cfg(not(feature = "defmt-logging"))]
macro_rules! link_log {
    ($level:ident, $($arg:expr),*) => {{ $( let _ = $arg; )* }}
}

macro_rules! link_trace {
    ($($arg:expr),*) => (link_log!(trace, $($arg),*));
}

macro_rules! link_debug {
    ($($arg:expr),*) => (link_log!(debug, $($arg),*));
}

macro_rules! link_info {
    ($($arg:expr),*) => (link_log!(info, $($arg),*));
}

macro_rules! link_warn {
    ($($arg:expr),*) => (link_log!(warn, $($arg),*));
}

macro_rules! link_error {
    ($($arg:expr),*) => (link_log!(error, $($arg),*));
}
