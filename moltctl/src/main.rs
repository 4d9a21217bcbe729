use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = moltctl::Cli::parse();
    moltctl::init_tracing(cli.log_level.as_deref());
    if let Err(err) = moltctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
