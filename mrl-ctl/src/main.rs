mod args;
use args::{parse_args, Commands};

mod core;

use mrl_client::MrlClient;
use tracing::Level;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    if let Commands::Sample { kind, path } = &args.command {
        return core::sample(*kind, path);
    }

    let client = MrlClient::open(args.client_config())?;

    let outcome = match args.command {
        Commands::Status => core::status(&client).await,
        Commands::Submit(submit) => core::submit(&client, submit).await,
        Commands::Monitor { job_id, watch } => core::monitor(&client, job_id, watch).await,
        Commands::Cancel { job_id } => core::cancel(&client, job_id).await,
        Commands::Logs { job_id } => core::logs(&client, job_id).await,
        Commands::Sample { .. } => Ok(()),
    };

    client.close();
    outcome
}
