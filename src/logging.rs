/* Connection and error logging. RUST_LOG overrides the default filter. */

use env_logger::{Builder, Env};

pub const DEFAULT_FILTER: &str = "warn,newsgate=info";

pub fn init() {
    Builder::from_env(Env::default().default_filter_or(DEFAULT_FILTER))
        .format_timestamp_millis()
        .init();
}
