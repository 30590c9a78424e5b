// ABOUTME: Library half of the orkee-run binary: logging setup, source loading and rendering
// ABOUTME: The binary's subcommands stay thin wrappers around these functions

pub mod render;
pub mod source;

/// Install the global tracing subscriber. `RUST_LOG` overrides the `info` default.
/// Logs go to stderr so program output on stdout stays clean.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
