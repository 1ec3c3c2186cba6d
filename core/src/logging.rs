use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Install the stderr log subscriber. Reads `IMPACT_LOG` for filter
/// directives (for example `impact_core=debug`) and falls back to
/// `impact_core=warn`. Safe to call more than once.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("IMPACT_LOG")
            .unwrap_or_else(|_| EnvFilter::new("impact_core=warn"));

        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .with(filter)
            .init();
    });
}
