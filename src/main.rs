use anyhow::Context;
use clap::Parser;
use log::info;
use scriptdbg::config::Config;
use scriptdbg::console::backend::TcpBackend;
use scriptdbg::console::TerminalApplication;
use scriptdbg::transport;
use scriptdbg::transport::FileTracer;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address of the VM debugger agent (default: 127.0.0.1:5858)
    #[clap(long)]
    connect: Option<String>,

    /// Configuration file (default: ~/.config/scriptdbg/config.toml)
    #[clap(long)]
    config: Option<PathBuf>,

    /// Inspected context, scripts from other contexts are ignored
    #[clap(long)]
    context_id: Option<String>,

    /// Continue execution when an exception is thrown
    #[clap(long)]
    no_pause_on_exceptions: bool,

    /// Trace debugger protocol traffic into a file
    #[clap(long)]
    trace_file: Option<PathBuf>,

    /// Log file written by the VM profiler (`--prof --logfile=<path>`)
    #[clap(long)]
    profiler_log: Option<PathBuf>,
}

impl Args {
    /// Command line arguments override configuration file.
    fn merge_into(self, config: &mut Config) {
        if let Some(connect) = self.connect {
            config.connect = connect;
        }
        if let Some(id) = self.context_id {
            config.context_id = Some(id.into());
        }
        if self.no_pause_on_exceptions {
            config.pause_on_exceptions = false;
        }
        if let Some(log) = self.profiler_log {
            config.profiler.log_file = Some(log);
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    let tracer = match &args.trace_file {
        Some(path) => Some(FileTracer::new(path)?),
        None => None,
    };
    args.merge_into(&mut config);

    let addr: SocketAddr = config.connect.parse().context("Invalid connect address")?;
    let (reader, writer) = transport::connect(addr, tracer)?;
    info!(target: "console", "session with {addr} started");

    let backend = TcpBackend::new(
        writer,
        config.context_id(),
        config.profiler.log_file.clone(),
    );
    let app = TerminalApplication::new(backend, config.agent_config())?;
    app.run(reader)
}
