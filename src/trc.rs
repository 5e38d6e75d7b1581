//! Tracing configuration and initialization.

use tracing_subscriber::{
    EnvFilter,
    fmt::format::FmtSpan,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

enum TrcMode {
    /// Plain, verbose logging with span events.
    Verbose,
    /// Compact, untimed format for the out-of-the-box experience.
    Compact,
}

pub struct Trc {
    mode: TrcMode,
    env_filter: EnvFilter,
}

impl Default for Trc {
    fn default() -> Self {
        let maybe_env_filter = EnvFilter::try_from_env("FAIRSERVE_LOG")
            .or_else(|_| EnvFilter::try_from_default_env());

        match maybe_env_filter {
            Ok(env_filter) => Self {
                // If the user provided an env_filter, they are debugging
                // something and want the full picture, not compact output.
                mode: TrcMode::Verbose,
                env_filter,
            },
            Err(_) => Self {
                // If the user didn't provide an env_filter, we assume they just want a nice
                // out-of-the-box experience, and default to compact mode with an info level filter.
                mode: TrcMode::Compact,
                env_filter: EnvFilter::new("info"),
            },
        }
    }
}

impl Trc {
    pub fn init(self) -> Result<(), TryInitError> {
        match self.mode {
            TrcMode::Verbose => self.init_verbose_mode(),
            TrcMode::Compact => self.init_compact_mode(),
        }
    }

    fn init_verbose_mode(self) -> Result<(), TryInitError> {
        tracing_subscriber::registry()
            .with(self.env_filter)
            .with(
                tracing_subscriber::fmt::layer().with_span_events(FmtSpan::ENTER | FmtSpan::CLOSE),
            )
            .try_init()
    }

    fn init_compact_mode(self) -> Result<(), TryInitError> {
        tracing_subscriber::registry()
            .with(self.env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .without_time()
                    .compact(),
            )
            .try_init()
    }
}
