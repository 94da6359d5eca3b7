use std::env;

/// Initializes tracing using the provided log level as the default filter.
///
/// `RUST_LOG` overrides the directive when set. Repeated calls are ignored,
/// so tests can call this freely.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("freightlink={},sea_orm=warn,sqlx=warn", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::try_new(&filter_directive).unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_tracing("debug", false);
        init_tracing("info", true);
    }
}
