use clap::{Parser, Subcommand};
use mcp_sse_client::client::McpClient;
use mcp_sse_client::config::ClientConfig;

/// Talk to an MCP server over its SSE transport.
#[derive(Debug, Parser)]
#[command(name = "mcp-sse-client", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the server's tool catalog.
    ListTools,
    /// Call a tool with JSON arguments.
    Call {
        name: String,
        #[arg(default_value = "{}")]
        arguments: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match ClientConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("mcp-sse-client: configuration error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(args.command, config).await {
        eprintln!("mcp-sse-client: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Command, config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = McpClient::connect(config).await?;
    client.initialize().await?;

    match command {
        Command::ListTools => {
            let tools = client.list_tools().await?;
            println!("{}", serde_json::to_string_pretty(&tools)?);
        }
        Command::Call { name, arguments } => {
            let arguments: serde_json::Value = serde_json::from_str(&arguments)?;
            client.list_tools().await?;
            let result = client.call_tool(&name, arguments).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.is_error {
                client.shutdown().await;
                std::process::exit(2);
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
