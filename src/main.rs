use std::path::PathBuf;
use std::process::ExitCode;

use webserv::config::Config;
use webserv::server::Runtime;

fn main() -> ExitCode {
    let mut args = std::env::args_os().skip(1);
    let (Some(path), None) = (args.next(), args.next()) else {
        eprintln!("usage: webserv <config-file>");
        return ExitCode::FAILURE;
    };

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    match run(PathBuf::from(path)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "server stopped");
            eprintln!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(path: PathBuf) -> anyhow::Result<()> {
    let config = Config::load(&path)?;
    let mut runtime = Runtime::new(config)?;
    runtime.shutdown_handle().register_signals()?;
    runtime.run()
}
