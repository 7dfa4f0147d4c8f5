use tracing_subscriber::{filter::Directive, EnvFilter};

/// Install the global subscriber. `RUST_LOG` adds to the default `solar_pipeline=info`.
pub fn init_tracing() {
    let filter = match "solar_pipeline=info".parse::<Directive>() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::new("info"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
