use clap::Parser;
use tracing_subscriber::EnvFilter;

use wallcast::cameras::CameraStore;
use wallcast::scenes::SceneStore;
use wallcast::server::HttpServer;

#[derive(Parser, Debug)]
#[command(author, version, about = "Video wall orchestration server", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "1982")]
    port: u16,

    /// Camera capability file
    #[arg(long, default_value = "cameras/cameras.json")]
    cameras: std::path::PathBuf,

    /// Scene storage file
    #[arg(long, default_value = "scenes/scenes.json")]
    scenes: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting wallcast server v{}", env!("CARGO_PKG_VERSION"));

    for path in [&args.cameras, &args.scenes] {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    let cameras = CameraStore::load(&args.cameras);
    if cameras.is_empty() {
        tracing::warn!("No cameras configured");
    }
    let scenes = SceneStore::load(&args.scenes);

    let server = HttpServer::new(cameras, scenes);
    server.run(args.port).await?;

    Ok(())
}
