//! rtloop CLI binary entry point.

use rtloop::cli::{chat, Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    rtloop::cli::init_tracing(&cli.log_level);

    let result = match cli.command {
        Commands::Chat(args) => chat::handle_chat(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
