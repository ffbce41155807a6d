use std::{io, process, sync::Arc, time::Duration};

use clap::{command, Parser, Subcommand, ValueHint};
use log::{debug, error, info, warn, LevelFilter};
use tokio::{sync::mpsc, time::Instant};
use url::Url;

use remoteplay::{
    auth::{Authorization, Callback},
    catalog::Catalog,
    config::Config,
    connect::ConnectSdk,
    controller::Controller,
    error::{Error, ErrorKind, Result},
    events::Event,
    player::Status,
    remote::{DeviceControl, WebApi},
    sdk::PlaybackSdk,
    settings::{PlaylistRef, Settings},
    signal,
    tokens::{Credentials, TokenHolder},
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// How long before expiry the access token is refreshed.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Shortest wait between two token refreshes.
const REFRESH_RETRY: Duration = Duration::from_secs(10);

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// Holds the client credentials of the application, so keep it private.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("config.toml"), env = "REMOTEPLAY_CONFIG")]
    config: String,

    /// Credentials file
    ///
    /// Written on login and on every token refresh. Grants access to your
    /// account: keep it private.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("credentials.json"), env = "REMOTEPLAY_CREDENTIALS")]
    credentials: String,

    /// Settings file with the playlists to draw random tracks from
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("settings.json"), env = "REMOTEPLAY_SETTINGS")]
    settings: String,

    /// Name of the Connect device to play on
    ///
    /// [default: player name from the configuration file]
    #[arg(short, long)]
    name: Option<String>,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Log in to your account
    ///
    /// Without options, prints the authorization URL and waits for the URL
    /// you are redirected to.
    Login {
        /// Authorization code from the redirect
        #[arg(long, conflicts_with = "callback")]
        code: Option<String>,

        /// Full URL of the redirect
        #[arg(long, value_hint = ValueHint::Url)]
        callback: Option<Url>,
    },

    /// Refresh the access token
    Refresh,

    /// List your playlists or manage the ones to play from
    Playlists {
        #[command(subcommand)]
        action: Option<PlaylistsAction>,
    },

    /// Play a track on the Connect device
    Play {
        /// Track URI, for example `spotify:track:4uLU6hMCjMI75M1A2tKUQC`
        ///
        /// [default: a random track from the configured playlists]
        uri: Option<String>,
    },
}

#[derive(Clone, Debug, Subcommand)]
enum PlaylistsAction {
    /// Add a playlist to play from
    Add { id: String },

    /// Remove a playlist to play from
    Remove { id: String },

    /// Restore the default playlist
    Reset,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(args: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if args.quiet || args.verbose > 0 {
        let level = match args.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module("remoteplay", level);
    }

    logger.init();
}

/// Restores the tokens from the credentials file, if there is one.
fn load_credentials(holder: &mut TokenHolder, path: &str) -> Result<()> {
    match Credentials::load(path) {
        Ok(credentials) => {
            holder.restore(credentials);
            Ok(())
        }
        Err(e) if e.kind == ErrorKind::NotFound => {
            info!("no credentials in {path}, log in first");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Refreshes the tokens and persists the outcome, which is an empty
/// credentials file when the refresh token was rejected.
async fn refresh(
    holder: &mut TokenHolder,
    authorization: &Authorization,
    path: &str,
) -> Result<()> {
    let result = holder.refresh(authorization).await;
    holder.credentials().save(path)?;
    result
}

/// Makes sure there is a valid access token, refreshing it if needed.
async fn authorize(
    holder: &mut TokenHolder,
    authorization: &Authorization,
    path: &str,
) -> Result<()> {
    if holder.is_valid() {
        return Ok(());
    }

    if holder.refresh_token().is_none() {
        return Err(Error::unauthenticated("not logged in: run the login command"));
    }

    refresh(holder, authorization, path).await
}

/// Reads the redirect URL from standard input.
async fn read_callback() -> Result<Url> {
    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        io::stdin().read_line(&mut line).map(|_| line)
    })
    .await
    .map_err(Error::internal)??;

    Url::parse(line.trim()).map_err(|e| Error::invalid_argument(format!("invalid url: {e}")))
}

async fn login(
    holder: &mut TokenHolder,
    authorization: &Authorization,
    path: &str,
    code: Option<String>,
    callback: Option<Url>,
) -> Result<()> {
    let code = match (code, callback) {
        (Some(code), _) => code,
        (None, Some(callback)) => Callback::parse(&callback).into_code(None)?,
        (None, None) => {
            let state = uuid::Uuid::new_v4().to_string();
            println!(
                "Open this URL and grant access:\n\n{}\n",
                authorization.authorize_url(&state)
            );
            println!("Then paste the URL you were redirected to:");
            Callback::parse(&read_callback().await?).into_code(Some(&state))?
        }
    };

    let response = authorization.exchange_code(&code).await?;
    holder.apply(response);
    holder.credentials().save(path)?;

    info!("logged in, credentials saved to {path}");
    Ok(())
}

async fn playlists(
    catalog: &Catalog,
    settings_path: &str,
    action: Option<PlaylistsAction>,
) -> Result<()> {
    let mut settings = Settings::load(settings_path)?;

    match action {
        None => {
            let playlists = catalog.user_playlists().await?;
            for playlist in playlists {
                let marker = if settings.playlists.iter().any(|known| known.id == playlist.id) {
                    '*'
                } else {
                    ' '
                };
                println!(
                    "{marker} {}  {} ({} tracks)",
                    playlist.id, playlist.name, playlist.tracks.total
                );
            }
            return Ok(());
        }

        Some(PlaylistsAction::Add { id }) => {
            let playlist = catalog.playlist(&id).await?;
            if settings.add_playlist(PlaylistRef::from(&playlist)) {
                info!("added playlist {}", playlist.name);
            } else {
                warn!("playlist {} was already added", playlist.name);
            }
        }

        Some(PlaylistsAction::Remove { id }) => {
            if !settings.remove_playlist(&id) {
                warn!("playlist {id} was not added");
            }
        }

        Some(PlaylistsAction::Reset) => settings.reset(),
    }

    settings.save(settings_path)
}

fn log_status(status: &Status) {
    if let Some(track) = &status.current_track {
        info!(
            "{} {track} [{}/{}]",
            if status.is_paused { "paused" } else { "playing" },
            format_time(status.position),
            format_time(status.duration)
        );
    }
}

fn format_time(duration: Duration) -> String {
    let seconds = duration.as_secs();
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

async fn play(
    config: &Config,
    args: &Args,
    holder: &mut TokenHolder,
    authorization: &Authorization,
    api: Arc<WebApi>,
    uri: Option<String>,
) -> Result<()> {
    let uri = match uri {
        Some(uri) => uri,
        None => {
            let settings = Settings::load(&args.settings)?;
            let catalog = Catalog::new(Arc::clone(&api));
            let tracks = catalog.random_tracks(&settings.playlist_ids()).await?;
            let track = tracks
                .into_iter()
                .next()
                .ok_or_else(|| Error::not_found("configured playlists have no tracks"))?;
            info!("picked {track}");
            track.uri
        }
    };

    let mut player_config = config.player.clone();
    if let Some(name) = &args.name {
        player_config.name.clone_from(name);
    }

    let sdk = Arc::new(ConnectSdk::new(
        Arc::clone(&api),
        player_config.device_poll_interval,
    ));
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let mut controller = Controller::new(
        player_config,
        sdk as Arc<dyn PlaybackSdk>,
        api as Arc<dyn DeviceControl>,
        holder.subscribe(),
    )
    .with_events(event_tx);

    controller.start().await?;

    let mut signals = signal::Handler::new()?;
    let mut pending = Some(uri);

    let refresh_timer = tokio::time::sleep_until(holder.refresh_due(REFRESH_MARGIN));
    tokio::pin!(refresh_timer);

    let result = loop {
        tokio::select! {
            // Prioritize shutdown signals.
            biased;

            signal = signals.recv() => {
                info!("{signal} received, shutting down");
                break Ok(());
            }

            Some(event) = events.recv() => match event {
                Event::Ready => {
                    if let Some(uri) = pending.take() {
                        if !controller.play(&uri).await {
                            break Err(Error::unavailable(format!("could not play {uri}")));
                        }
                    }
                }
                Event::StateChanged => log_status(&controller.status()),
                Event::AuthorizationFailed => {
                    if let Err(e) = refresh(holder, authorization, &args.credentials).await {
                        break Err(e);
                    }
                    refresh_timer.as_mut().reset(holder.refresh_due(REFRESH_MARGIN));
                }
                Event::SdkUnavailable => {
                    break Err(Error::unavailable("device did not become available"));
                }
                Event::NotReady | Event::SdkError | Event::TornDown => {}
            },

            () = &mut refresh_timer, if holder.refresh_token().is_some() => {
                match refresh(holder, authorization, &args.credentials).await {
                    Ok(()) => refresh_timer.as_mut().reset(holder.refresh_due(REFRESH_MARGIN)),
                    Err(e) if holder.refresh_token().is_none() => break Err(e),
                    Err(_) => refresh_timer
                        .as_mut()
                        .reset(Instant::now() + REFRESH_RETRY),
                }
            }

            flow = controller.process_next() => {
                if flow.is_break() {
                    break Ok(());
                }
            }
        }
    };

    controller.disconnect().await;
    result
}

/// Main application entry.
///
/// # Errors
///
/// This function returns an error when an error occurs. This could be due to
/// missing credentials, a rejected login or an unrecoverable network error.
async fn run(args: Args) -> Result<()> {
    let config = Config::from_file(&args.config)?;
    debug!("{config:?}");

    let authorization = Authorization::new(&config)?;
    let mut holder = TokenHolder::new();
    load_credentials(&mut holder, &args.credentials)?;

    match args.command.clone() {
        Command::Login { code, callback } => {
            login(&mut holder, &authorization, &args.credentials, code, callback).await
        }

        Command::Refresh => {
            refresh(&mut holder, &authorization, &args.credentials).await?;
            info!("access token refreshed");
            Ok(())
        }

        Command::Playlists { action } => {
            authorize(&mut holder, &authorization, &args.credentials).await?;
            let api = Arc::new(WebApi::new(&config, holder.subscribe())?);
            playlists(&Catalog::new(api), &args.settings, action).await
        }

        Command::Play { uri } => {
            authorize(&mut holder, &authorization, &args.credentials).await?;
            let api = Arc::new(WebApi::new(&config, holder.subscribe())?);
            play(&config, &args, &mut holder, &authorization, api, uri).await
        }
    }
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and runs the requested command.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
