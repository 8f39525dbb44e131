//! Network layer helpers.
//!
//! TLS termination for the inbound listener. Upstream TLS lives in
//! `upstream::tls`.

pub mod tls;

pub use tls::load_tls_config;
