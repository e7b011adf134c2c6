//! Process-wide tracing setup for the binaries.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVES: &str = "homecloud=info,homecloudd=info,homecloud_push=info";

/// Pick the filter: `-v` forces debug, `-vv` trace; otherwise `RUST_LOG`
/// wins over the built-in default.
pub fn filter_for(verbosity: u8) -> EnvFilter {
    match verbosity {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES)),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    }
}

/// Install the global subscriber. Calling it twice is harmless.
pub fn init_logging(verbosity: u8) {
    let _ = tracing_subscriber::registry()
        .with(filter_for(verbosity))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_overrides_environment() {
        assert_eq!(filter_for(1).to_string(), "debug");
        assert_eq!(filter_for(5).to_string(), "trace");
    }

    #[test]
    fn init_twice_does_not_panic() {
        init_logging(0);
        init_logging(2);
    }
}
