use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use argh::FromArgs;
use exitcode::ExitCode;
use sflow::{Datagram, DecodeOptions};
use sflow_topology::collector::Collector;
use sflow_topology::config::Config;
use sflow_topology::correlator::{Correlator, EthernetDecoder};
use sflow_topology::source::UdpPacketSource;
use sflow_topology::trace;
use tracing::{error, info};

const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(FromArgs)]
#[argh(
    description = "Collect sFlow datagrams and build the OpenFlow switch and port topology",
    help_triggers("-h", "--help")
)]
pub struct RootCommand {
    #[argh(switch, short = 'v', description = "show version")]
    version: bool,

    #[argh(option, default = "\"info\".to_string()", description = "log level")]
    log_level: String,

    #[argh(
        option,
        short = 'c',
        long = "config",
        description = "read configuration from a YAML file"
    )]
    config: Option<PathBuf>,

    #[argh(
        option,
        short = 'l',
        description = "address to receive datagrams on, overrides the config file"
    )]
    listen: Option<SocketAddr>,

    #[argh(switch, description = "print the topology as JSON on shutdown")]
    dump: bool,

    #[argh(subcommand)]
    sub_commands: Option<SubCommands>,
}

impl RootCommand {
    #![allow(clippy::print_stdout)]
    fn show_version(&self) {
        println!("sflow-topology {PKG_VERSION}");
    }

    fn load_config(&self) -> Result<Config, ExitCode> {
        let mut config = match &self.config {
            Some(path) => Config::load(path).map_err(|err| {
                error!(
                    message = "Load config failed",
                    path = ?path,
                    %err
                );

                exitcode::CONFIG
            })?,
            None => Config::default(),
        };

        if let Some(listen) = self.listen {
            config.listen = listen;
        }

        Ok(config)
    }

    pub fn run(&self) -> Result<(), ExitCode> {
        if self.version {
            self.show_version();
            return Ok(());
        }

        let log_level = std::env::var(trace::LOG_ENV).unwrap_or(self.log_level.clone());
        let color = std::io::stderr().is_terminal();
        trace::init(color, false, &log_level);

        if let Some(sub_command) = &self.sub_commands {
            return sub_command.run(self);
        }

        let config = self.load_config()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("sflow-worker")
            .enable_io()
            .enable_time()
            .build()
            .map_err(|err| {
                error!(message = "Build tokio runtime failed", %err);

                exitcode::OSERR
            })?;

        runtime.block_on(async move {
            let source = UdpPacketSource::bind(config.listen, config.receive_buffer_bytes)
                .await
                .map_err(|err| {
                    error!(
                        message = "Bind UDP socket failed",
                        listen = %config.listen,
                        %err
                    );

                    exitcode::UNAVAILABLE
                })?;

            info!(
                message = "Start sflow-topology",
                version = PKG_VERSION,
                listen = %config.listen,
                decode = ?config.decode,
                correlator = ?config.correlator
            );

            let correlator = Correlator::new(EthernetDecoder, config.correlator);
            let collector =
                Collector::new(source, config.decode, correlator, config.report_interval);
            let registry = collector.registry();

            let stats = collector.run(shutdown_signal()).await;
            info!(
                message = "Collector stopped",
                datagrams = stats.datagrams,
                decode_errors = stats.decode_errors
            );

            if self.dump {
                let snapshot = registry.read().snapshot();
                write_json(&snapshot)?;
            }

            Ok::<(), ExitCode>(())
        })?;

        runtime.shutdown_timeout(Duration::from_secs(5));

        Ok(())
    }
}

fn write_json<T: serde::Serialize>(value: &T) -> Result<(), ExitCode> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)
        .map_err(std::io::Error::from)
        .and_then(|_| std::io::Write::write_all(&mut stdout, b"\n"))
        .map_err(|err| {
            error!(message = "Write JSON to stdout failed", %err);

            exitcode::IOERR
        })
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut interrupt, mut terminate) =
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(interrupt), Ok(terminate)) => (interrupt, terminate),
            (Err(err), _) | (_, Err(err)) => {
                error!(message = "Install signal handler failed", %err);

                return std::future::pending().await;
            }
        };

    tokio::select! {
        _ = interrupt.recv() => info!(message = "Signal received", signal = "SIGINT"),
        _ = terminate.recv() => info!(message = "Signal received", signal = "SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(message = "Install signal handler failed", %err);

        std::future::pending::<()>().await;
    }

    info!(message = "Signal received", signal = "ctrl-c");
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum SubCommands {
    Decode(Decode),
    Validate(Validate),
}

impl SubCommands {
    fn run(&self, root: &RootCommand) -> Result<(), ExitCode> {
        match self {
            SubCommands::Decode(decode) => decode.run(root),
            SubCommands::Validate(validate) => validate.run(root),
        }
    }
}

#[derive(Debug, FromArgs)]
#[argh(
    subcommand,
    name = "decode",
    description = "Decode sFlow datagrams saved as files and print them as JSON",
    help_triggers("-h", "--help")
)]
struct Decode {
    #[argh(positional, description = "files holding one UDP payload each")]
    paths: Vec<PathBuf>,
}

impl Decode {
    fn decode_file(path: &Path, options: &DecodeOptions) -> Result<Datagram, ExitCode> {
        let data = std::fs::read(path).map_err(|err| {
            error!(message = "Read datagram file failed", ?path, %err);

            exitcode::NOINPUT
        })?;

        Datagram::decode_with(data, options).map_err(|err| {
            error!(message = "Decode datagram failed", ?path, %err);

            exitcode::DATAERR
        })
    }

    fn run(&self, root: &RootCommand) -> Result<(), ExitCode> {
        let config = root.load_config()?;

        let mut result = Ok(());
        for path in &self.paths {
            match Self::decode_file(path, &config.decode) {
                Ok(datagram) => write_json(&datagram)?,
                Err(code) => result = Err(code),
            }
        }

        result
    }
}

#[derive(Debug, FromArgs)]
#[argh(
    subcommand,
    name = "validate",
    description = "Validate the configuration file and exit",
    help_triggers("-h", "--help")
)]
struct Validate {}

impl Validate {
    #![allow(clippy::print_stdout)]
    fn run(&self, root: &RootCommand) -> Result<(), ExitCode> {
        let config = root.load_config()?;

        let path = root.config.as_deref().unwrap_or(Path::new("<default>"));
        println!("Loaded {}", path.display());
        println!("  listen: {}", config.listen);
        println!("  report_interval: {:?}", config.report_interval);
        println!("{:>20}", "Validated");

        Ok(())
    }
}
