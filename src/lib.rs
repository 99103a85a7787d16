#![allow(
    clippy::let_unit_value,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::semicolon_if_nothing_returned,
    clippy::used_underscore_binding
)]
#![deny(
    clippy::all,
    clippy::missing_const_for_fn,
    clippy::pedantic,
    future_incompatible,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
    unsafe_code,
    unused,
    warnings
)]
#![doc = include_str!("../README.md")]

pub mod backoff;
pub mod close;
pub mod codec;
pub mod compression;
pub mod config;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod intents;
pub mod limiter;
pub mod presence;
pub mod session;
pub mod stage;
pub mod supervisor;

#[doc(no_inline)]
pub use self::{
    config::{Config, ConfigBuilder},
    intents::Intents,
    stage::Stage,
    supervisor::{Observer, Supervisor, TerminationError},
};

/// Discord API version this crate negotiates by default.
pub const API_VERSION: u8 = 10;

#[cfg(not(any(
    feature = "native",
    feature = "rustls-native-roots",
    feature = "rustls-webpki-roots"
)))]
compile_error!("Either the `native`, `rustls-native-roots` or `rustls-webpki-roots` feature must be enabled.");
