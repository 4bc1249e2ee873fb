use std::path::Path;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

use rm01_connector::app::App;
use rm01_connector::auth;
use rm01_connector::cli::output::Output;
use rm01_connector::cli::{Cli, CliPrompt, Lang, Runner};
use rm01_connector::config;
use rm01_connector::network::executor::{Elevation, PrivilegedExecutor};
use rm01_connector::network::NativeBackend;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    color_eyre::install()?;

    if cli.print_default_config {
        print!("{}", config::default_config_toml());
        return Ok(());
    }

    let mut config = config::load(cli.config.as_deref()).wrap_err("Failed to load configuration")?;
    if cli.verbose {
        config.general.log_level = "debug".into();
    }

    // Held until exit so the file writer flushes.
    let log_guard = init_logging(&config.general.log_level, cli.log.as_deref())?;
    info!("rm01 {} starting", env!("CARGO_PKG_VERSION"));

    let lang = Lang::resolve(cli.lang);
    let text = lang.strings();
    let out = Output::detect();

    let permission = auth::check_permissions();
    info!("Permission level: {}", permission.label());
    let executor = PrivilegedExecutor::new(Elevation::from(permission), config.script_timeout());
    let backend = NativeBackend::new(&config, executor);
    let prompt = CliPrompt::select(cli.password.clone(), text, out, config.prompt_timeout());
    let app = App::new(backend, prompt, &config);

    let runner = Runner::new(&app, &config, text, out, cli.json);
    let code = tokio::select! {
        code = runner.run(cli.command) => code,
        _ = tokio::signal::ctrl_c() => {
            out.warning(text.interrupted);
            app.shutdown().await;
            1
        }
    };

    info!("rm01 exiting with {}", code);
    drop(log_guard);
    std::process::exit(code);
}

/// stderr by default; a plain-text file when `--log` is given.
/// `RUST_LOG` overrides the configured level.
fn init_logging(level: &str, log_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match log_path {
        Some(path) => {
            let file = std::fs::File::create(path)
                .wrap_err_with(|| format!("Failed to create log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}
