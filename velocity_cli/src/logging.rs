use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber from the `VELOCITY_LOG` environment variable; errors only
/// by default.
pub fn initialize() -> velocity_vm::Result<()> {
    let filter = EnvFilter::try_from_env("VELOCITY_LOG")
        .unwrap_or_else(|_| EnvFilter::new("error"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| velocity_vm::Error::InternalError(error.to_string()))
}
