use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable that overrides `--log-level`, it takes any
/// `EnvFilter` directive, e.g. `sflow=trace,sflow_topology=debug`.
pub const LOG_ENV: &str = "SFLOW_TOPOLOGY_LOG";

/// Install the global subscriber. Calling it twice is harmless, the second
/// call is ignored.
pub fn init(color: bool, json: bool, levels: &str) {
    let filter = EnvFilter::try_new(levels).unwrap_or_else(|err| {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("invalid log level {levels:?}, {err}, fallback to info");
        }

        EnvFilter::new("info")
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(color)
        .with_writer(std::io::stderr);

    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder.finish().try_init()
    };
}
