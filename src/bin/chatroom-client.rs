//! chatroom terminal client.

use chatroom::client::{run_session, SessionEnd};
use chatroom::config::{parse_port, DEFAULT_PORT};
use clap::Parser;
use tokio::net::TcpStream;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the chat client
#[derive(Parser, Debug)]
#[command(name = "chatroom-client")]
#[command(version = "0.1.0")]
#[command(about = "Terminal client for the chatroom server", long_about = None)]
struct ClientArgs {
    /// Server port (falls back to 8000 if missing or not a number)
    port: Option<String>,

    /// Server address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ClientArgs::parse();

    // Logs go to stderr so they never interleave with chat lines
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(chat(args));
    // A pending stdin read holds a blocking thread; do not wait for it
    runtime.shutdown_background();
    result
}

async fn chat(args: ClientArgs) -> Result<(), Box<dyn std::error::Error>> {
    let port = args.port.as_deref().and_then(parse_port).unwrap_or(DEFAULT_PORT);

    let stream = TcpStream::connect((args.host.as_str(), port)).await?;
    let local = stream.local_addr()?;
    info!(server = %stream.peer_addr()?, local = %local, "Connected");

    match run_session(stream, local, tokio::io::stdin(), tokio::io::stdout()).await {
        Ok(SessionEnd::ServerClosed) => {
            eprintln!("The server closed the connection");
            Ok(())
        }
        Ok(SessionEnd::InputClosed) => Ok(()),
        Err(e) => {
            error!(error = %e, "Session failed");
            eprintln!("disconnected from chat room server");
            Err(e.into())
        }
    }
}
