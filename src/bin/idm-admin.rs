use clap::Parser;
use identity_directory::cli::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match identity_directory::cli::run(cli).await {
        Ok(output) => print!("{output}"),
        Err(e) => {
            match std::env::var("IDM_VERBOSE").as_deref() {
                Ok("true") | Ok("1") => eprintln!("Error: {e:?}"),
                _ => eprintln!("Error: {e:#}"),
            }
            std::process::exit(e.exit_code());
        }
    }
}
