use anyhow::Result;
use api::request::CreateLivestream;
use api::response::Livestream;
use broadcaster::{AuthContext, Config, SessionStatus, Streamer, StreamerEvent};
use clap::{ArgAction, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn, Level};

mod log;
mod utils;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Set config file path
    #[arg(short, long)]
    config: Option<String>,
    /// Verbose mode [default: "log.level" of the config, -v "info", -vv "debug", -vvv "trace"]
    #[arg(short = 'v', action = ArgAction::Count, default_value_t = 0)]
    verbose: u8,
    /// Authentication token, sent to the backend as 'Bearer ' and to the relay on connect
    #[arg(short, long)]
    token: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Go live on an existing livestream, Ctrl-C stops the stream
    Live {
        /// Livestream id
        #[arg(long)]
        id: String,
        /// Stream key of the livestream
        #[arg(long)]
        key: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Create a livestream record
    Create {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Go live with the new record right away
        #[arg(long)]
        live: bool,
    },
    /// List your livestreams
    List {
        /// List every active livestream instead
        #[arg(long)]
        active: bool,
    },
    /// Mark a livestream as ended
    End {
        /// Stream key of the livestream
        #[arg(long)]
        key: String,
    },
    /// Check the backend is reachable
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut cfg: Config = utils::load("liveshop".to_string(), args.config);
    cfg.validate()?;

    let level = match args.verbose {
        0 => cfg.log.level.clone(),
        1 => Level::INFO.to_string(),
        2 => Level::DEBUG.to_string(),
        _ => Level::TRACE.to_string(),
    };
    log::set(format!(
        "liveshop={},broadcaster={},socketio={},backend={},webrtc=error",
        level, level, level, level
    ));
    warn!("set log level : {}", level);
    debug!("config : {:?}", cfg);

    if args.token.is_some() {
        cfg.backend.token = args.token;
    }
    let auth = AuthContext::new(cfg.backend.token.clone());
    let client = backend::Client::new(&cfg.backend.url, auth.clone())?;

    match args.command {
        Command::Live {
            id,
            key,
            title,
            description,
        } => live(&cfg, auth, &client, &id, &key, &title, &description).await,
        Command::Create {
            title,
            description,
            live: go_live,
        } => {
            let stream = client
                .create_livestream(&CreateLivestream::new(title, description))
                .await?;
            info!("[{}] livestream created", stream.id);
            print(&stream);
            if go_live {
                let description = stream.description.clone().unwrap_or_default();
                live(
                    &cfg,
                    auth,
                    &client,
                    &stream.id,
                    &stream.stream_key,
                    &stream.title,
                    &description,
                )
                .await?;
            }
            Ok(())
        }
        Command::List { active } => {
            let streams = if active {
                client.active_livestreams().await?
            } else {
                client.vendor_livestreams().await?
            };
            for stream in streams.iter() {
                print(stream);
            }
            Ok(())
        }
        Command::End { key } => {
            client.end_livestream(&key).await?;
            info!("livestream {} ended", key);
            Ok(())
        }
        Command::Health => {
            let health = client.health().await?;
            println!(
                "{}",
                health.message.unwrap_or_else(|| "backend is up".to_string())
            );
            Ok(())
        }
    }
}

fn print(stream: &Livestream) {
    println!(
        "{}\t{}\t{}\t{}",
        stream.id, stream.status, stream.stream_key, stream.title
    );
}

async fn live(
    cfg: &Config,
    auth: AuthContext,
    client: &backend::Client,
    id: &str,
    key: &str,
    title: &str,
    description: &str,
) -> Result<()> {
    let streamer = Streamer::new(cfg, auth)?;
    let mut events = streamer.subscribe_event();
    streamer.open().await?;

    if let Err(e) = client.start_livestream(key).await {
        warn!("[{}] backend start failed: {}", id, e);
    }
    if let Err(e) = streamer.start_stream(id, key, title, description).await {
        error!("[{}] start failed: {}", id, e);
        streamer.disconnect().await;
        return Err(e.into());
    }

    let shutdown = utils::shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("[{}] shutdown requested", id);
                break;
            }
            event = events.recv() => match event {
                Ok(StreamerEvent::StreamStart { stream_id, .. }) => info!("[{}] on air", stream_id),
                Ok(StreamerEvent::ViewerCountChange(count)) => info!("[{}] viewers: {}", id, count),
                Ok(StreamerEvent::StreamEnd { stream_id }) => info!("[{}] stream ended", stream_id),
                Ok(StreamerEvent::Error(e)) => error!("[{}] {}", id, e),
                Ok(StreamerEvent::StatusChanged(SessionStatus::Idle)) => break,
                Ok(event) => debug!("[{}] {:?}", id, event),
                Err(RecvError::Lagged(n)) => warn!("[{}] {} events skipped", id, n),
                Err(RecvError::Closed) => break,
            }
        }
    }

    streamer.disconnect().await;
    debug!("metrics :\n{}", broadcaster::metrics::gather());
    Ok(())
}
