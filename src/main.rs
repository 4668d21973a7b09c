use clap::Parser;
use dsrgraph::{cli, logging};

#[tokio::main]
async fn main() -> dsrgraph::Result<()> {
    let args = cli::Args::parse();
    let _guard = logging::init(&args.command)?;
    cli::run(args).await
}
