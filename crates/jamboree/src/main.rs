use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jamboree::{
    health, telemetry, AudioFormat, CatalogClient, ChannelTarget, CodecEncoderFactory,
    ControlAction, Controller, DestinationId, FfmpegSourceFactory, RegistryOptions, SessionEvent,
    SessionRegistry, Track, UdpTransport,
};
use jamconf::JamConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Jamboree - stream music into voice channels
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (replaces ./jamboree.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search the catalog
    Search {
        /// Song name or artist
        #[arg(required = true)]
        query: Vec<String>,
    },

    /// Play a track and read controls (pause, resume, stop, leave, status, quit) from stdin
    Play {
        /// Catalog track id
        track_id: String,

        /// Destination key; one session per destination
        #[arg(short, long)]
        destination: String,

        /// Channel to stream to (host:port)
        #[arg(short, long)]
        channel: String,

        /// Who asked for the track
        #[arg(long, default_value = "@cli")]
        requested_by: String,

        /// Play this URL directly instead of resolving the track through the catalog
        #[arg(long)]
        url: Option<String>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = JamConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    if let Commands::Config = cli.command {
        for file in &sources.files {
            println!("# loaded: {}", file.display());
        }
        for var in &sources.env_overrides {
            println!("# env: {}", var);
        }
        print!("{}", config.to_toml());
        return Ok(());
    }

    let guard = telemetry::init(&config.telemetry).context("Failed to initialize telemetry")?;

    let result = match cli.command {
        Commands::Search { query } => run_search(&config, &query.join(" ")).await,
        Commands::Play {
            track_id,
            destination,
            channel,
            requested_by,
            url,
        } => {
            run_play(
                &config,
                &track_id,
                DestinationId::new(destination),
                ChannelTarget::new(channel),
                &requested_by,
                url,
            )
            .await
        }
        Commands::Config => Ok(()),
    };

    guard.shutdown();
    result
}

async fn run_search(config: &JamConfig, query: &str) -> Result<()> {
    let catalog = CatalogClient::from_config(&config.catalog)?;
    let tracks = catalog
        .search_tracks(query.trim())
        .await
        .context("Catalog search failed")?;

    if tracks.is_empty() {
        println!("No results found.");
        return Ok(());
    }
    let tracks: Vec<Track> = tracks.into_iter().take(config.catalog.search_limit).collect();
    for (i, option) in jamboree::search_options(&tracks).iter().enumerate() {
        println!("{:>2}. {}  [{}]", i + 1, option.label, option.value);
    }
    Ok(())
}

async fn run_play(
    config: &JamConfig,
    track_id: &str,
    destination: DestinationId,
    channel: ChannelTarget,
    requested_by: &str,
    url: Option<String>,
) -> Result<()> {
    let format = AudioFormat::from(&config.playback);
    let registry = SessionRegistry::new(
        Arc::new(UdpTransport::new(&config.transport, &format, config.playback.codec)),
        Arc::new(FfmpegSourceFactory::new(config.decoder.clone())),
        Arc::new(CodecEncoderFactory::new(config.playback.codec)),
        RegistryOptions::from_config(&config.playback),
    );
    let controller = Controller::new(registry.clone(), CatalogClient::from_config(&config.catalog)?);

    info!("🎶 Jamboree starting");
    info!("   Destination: {}", destination);
    info!("   Channel: {}", channel);
    info!("   Codec: {}", config.playback.codec.as_str());

    let shutdown = CancellationToken::new();
    let health_task = tokio::spawn(health::serve(
        config.bind.health_host.clone(),
        config.bind.health_port,
        registry.clone(),
        shutdown.clone().cancelled_owned(),
    ));

    let result = control_loop(&controller, track_id, &destination, &channel, requested_by, url).await;

    registry.stop_all().await;
    shutdown.cancel();
    match health_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Health endpoint stopped: {:#}", e),
        Err(e) => warn!("Health task failed: {}", e),
    }

    info!("Shutdown complete");
    result
}

async fn control_loop(
    controller: &Controller,
    track_id: &str,
    destination: &DestinationId,
    channel: &ChannelTarget,
    requested_by: &str,
    url: Option<String>,
) -> Result<()> {
    // Subscribe before starting so the end of a short track is not missed.
    let mut events = controller.registry().subscribe();

    let (session_id, view) = match url {
        Some(url) => {
            let track = Track {
                stream_url: Some(url),
                ..Track::new(track_id, track_id)
            };
            controller.play_track(destination, channel, track, requested_by).await?
        }
        None => controller.play(destination, channel, track_id, requested_by).await?,
    };
    println!("{}", view);

    let signal = shutdown_signal();
    tokio::pin!(signal);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = &mut signal => break,

            event = events.recv() => match event {
                Ok(SessionEvent::Ended { session_id: ended, outcome, .. }) if ended == session_id => {
                    match outcome.error() {
                        Some(error) => println!("Playback failed: {}", error),
                        None => println!("Playback ended ({} frames)", outcome.frames()),
                    }
                    break;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },

            line = lines.next_line(), if stdin_open => match line.context("Failed to read stdin")? {
                None => stdin_open = false,
                Some(line) => {
                    let input = line.trim();
                    match input {
                        "" => {}
                        "quit" | "exit" => break,
                        "status" => println!("{}", controller.view(destination)),
                        other => match other.parse::<ControlAction>() {
                            Ok(action) => println!("{}", controller.apply(destination, action)),
                            Err(e) => println!("{} (try pause, resume, stop, leave, status, quit)", e),
                        },
                    }
                }
            },
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
