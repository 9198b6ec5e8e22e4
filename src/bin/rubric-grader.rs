use clap::Parser;
use log::LevelFilter;

use rubric_grader::app::App;
use rubric_grader::cli::Cli;
use rubric_grader::gateway::GatewayConfig;
use rubric_grader::store::DataDir;

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        LevelFilter::Error
    } else {
        match cli.verbosity {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_target(false)
        .format_timestamp(None)
        .init();

    // Environment first, then CLI overrides
    let data = DataDir::from_env().with_override(cli.data_dir.clone());
    let gateway_config = GatewayConfig::from_env()
        .with_overrides(cli.gateway.gateway_key.clone(), cli.gateway.gateway_timeout);

    let app = App::new(data, gateway_config);
    if let Err(err) = app.run(cli.command) {
        log::error!("{}", err);
        std::process::exit(1);
    }
}
