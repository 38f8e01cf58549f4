//! Worker process entry point.
//!
//! Speaks the control protocol on stdin/stdout; logs go to stderr.

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use distworker::{ProcessHost, StdioChannel, Worker, WorkerConfig, run_session};

/// `debug` is the bootstrap option: it raises the default level and always
/// enables channel mirroring, even under an explicit `RUST_LOG`.
fn init_tracing(debug: bool) {
    let mut filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("DISTWORKER_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ if debug => "debug",
            _ => "info",
        };

        EnvFilter::new(format!("distworker={base_level}"))
    };
    if debug && let Ok(directive) = "distworker::channel=debug".parse() {
        filter = filter.add_directive(directive);
    }

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("Failed to determine working directory")?;

    let mut channel = StdioChannel::stdio();
    let bootstrap = channel
        .receive_bootstrap()
        .await
        .context("Failed to receive bootstrap from controller")?;
    let config = WorkerConfig::from_bootstrap(bootstrap, &cwd);

    init_tracing(config.debug);
    tracing::debug!(
        worker_id = %config.worker_id,
        testrun_uid = %config.testrun_uid,
        program = %config.program,
        "Bootstrap received"
    );

    let mut worker = Worker::from_config(&config, channel);
    let mut host = ProcessHost::new(&config, &cwd);

    let exit_status = run_session(&mut worker, &mut host)
        .await
        .context("Worker session aborted")?;

    std::process::exit(exit_status.code());
}
