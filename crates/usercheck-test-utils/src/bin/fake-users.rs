//! Standalone fake users service, used to exercise the cold-start path.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use usercheck_test_utils::FakeUserService;

#[derive(Parser, Debug)]
#[command(name = "fake-users", about = "Fake users CRUD service for harness tests")]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 5000)]
    port: u16,

    /// Seed this many visible users before serving.
    #[arg(long, default_value_t = 0)]
    seed: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.bind, args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    println!("fake users service listening on http://{addr}");

    FakeUserService::new()
        .with_users(args.seed)
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
