//! toolshed - lifecycle manager for locally installed tools
//!
//! See `toolshed --help` for the subcommands.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    toolshed_cli::run().await
}
