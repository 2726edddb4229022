use banadoctor::cli::{Args, build_config, execute, init_logging, open_client, validate_api_url};
use clap::Parser;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(api_url) = validate_api_url(&args.api_url) else {
        std::process::exit(1);
    };

    let config = build_config(api_url, args.store, args.timeout);

    let Some(session) = open_client(&config).await else {
        std::process::exit(1);
    };

    let state = session.load().await;
    info!(status = ?state.status(), "Session loaded");

    if let Err(e) = execute(&session, args.command).await {
        error!(error = %e, "Command failed");
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
