/* Store-and-forward NNTP proxy: one upstream server, optional credential injection. */

pub mod auth;
pub mod config;
pub mod error;
pub mod line;
pub mod logging;
pub mod proxy;
pub mod relay;
pub mod session;
#[cfg(feature = "tls")]
pub mod tls;
pub mod upstream;
