mod audit;
mod cli;
mod pipeline;
mod registry;
mod runner;
mod store;
mod types;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    cli::main().await
}
