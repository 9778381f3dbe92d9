use clap::Parser;
use tracing_subscriber::EnvFilter;

use wallcast::client::sink::{preview_router, MjpegPreviewSink, MosaicSink, NullSink};
use wallcast::client::{ClientConfig, DisplayClient};

#[derive(Parser, Debug)]
#[command(author, version, about = "Video wall display node", long_about = None)]
struct Args {
    /// Orchestration server base URL (overrides the config file)
    #[arg(short, long)]
    server: Option<String>,

    /// Name this display announces (defaults to the hostname)
    #[arg(short, long)]
    name: Option<String>,

    /// JSON configuration file
    #[arg(long, default_value = "display_config.json")]
    config: std::path::PathBuf,

    /// Port for the MJPEG mosaic preview (overrides the config file)
    #[arg(long)]
    preview_port: Option<u16>,

    /// Run without any mosaic output
    #[arg(long)]
    headless: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting wallcast display node v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ClientConfig::load(Some(args.config.as_path()));
    if let Some(server) = args.server {
        config.server_url = server;
    }
    if let Some(name) = args.name {
        config.name = Some(name);
    }
    if let Some(port) = args.preview_port {
        config.preview_port = port;
    }
    if config.name.is_none() {
        config.name = hostname::get().ok().map(|h| h.to_string_lossy().into_owned());
    }

    let sink: Box<dyn MosaicSink> = if args.headless || config.preview_port == 0 {
        Box::new(NullSink)
    } else {
        let preview = MjpegPreviewSink::new();
        let router = preview_router(preview.sender());
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.preview_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Mosaic preview on http://{}/stream", addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::warn!("Preview server stopped: {}", e);
            }
        });
        Box::new(preview)
    };

    let client = DisplayClient::new(config);
    client.run(sink).await?;

    Ok(())
}
