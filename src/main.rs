#[macro_use]
extern crate tracing;

use std::{io::Write, path::PathBuf, sync::Arc};

use color_eyre::eyre::{self, WrapErr};
use structopt::StructOpt;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    runtime::Builder,
    signal,
    sync::watch,
};
use tokio_util::sync::CancellationToken;

use pixbadge::{
    color::HexColor,
    delivery::{DeliveryController, DeliveryOutcome},
    device::{DeviceApi, HttpDevice},
    flash::{Firmware, FlashState, Flasher, UsbSerialProvider},
    link::{LinkMonitor, LinkState},
    models::{BadgeTheme, Config, Grid, Mode, GRID_SIZE},
    paths::Paths,
    preview::{self, Ansi, Player},
    raster::Progress,
    session::{PreferenceStore, Prepared, Session},
    wire,
};

const VERSION: &str = match option_env!("PIXBADGE_VERSION_ID") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

#[derive(Debug, StructOpt)]
struct SourceOpts {
    /// Content to render: pattern, text, photo or video
    #[structopt(long)]
    mode: Option<Mode>,
    #[structopt(long)]
    text: Option<String>,
    /// Text color, as #rrggbb
    #[structopt(long)]
    fg: Option<HexColor>,
    /// Background color, as #rrggbb
    #[structopt(long)]
    bg: Option<HexColor>,
    /// Input file for the photo and video modes
    #[structopt(long, parse(from_os_str))]
    file: Option<PathBuf>,
    /// Color of the badge drawn around the preview: white or red
    #[structopt(long)]
    badge_theme: Option<BadgeTheme>,
}

impl SourceOpts {
    fn has_overrides(&self) -> bool {
        self.mode.is_some()
            || self.text.is_some()
            || self.fg.is_some()
            || self.bg.is_some()
            || self.badge_theme.is_some()
    }
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Play the content in the terminal
    Preview(SourceOpts),
    /// Send the content to the badge
    Send(SourceOpts),
    /// Watch the badge connection
    Monitor,
    /// Install the firmware on a badge running the legacy firmware
    Flash {
        /// Do not ask for confirmation
        #[structopt(long)]
        yes: bool,
        /// Do not wait for a legacy badge on the network
        #[structopt(long)]
        force: bool,
    },
    /// Write the encoded content to a file
    Encode {
        #[structopt(flatten)]
        source: SourceOpts,
        #[structopt(short, long, parse(from_os_str))]
        output: PathBuf,
    },
}

#[derive(Debug, StructOpt)]
struct Opts {
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u32,
    #[structopt(short, long = "config")]
    config_path: Option<PathBuf>,
    #[structopt(long)]
    dump_config: bool,
    #[structopt(subcommand)]
    command: Option<Command>,
}

/// Apply command-line overrides, then prepare the selected content
async fn prepare<'s>(
    session: &'s mut Session,
    source: &SourceOpts,
    config: &Config,
) -> eyre::Result<&'s Prepared> {
    if source.has_overrides() {
        session
            .update_preferences(|prefs| {
                if let Some(mode) = source.mode {
                    prefs.mode = mode;
                }
                if let Some(text) = &source.text {
                    prefs.text = text.clone();
                }
                if let Some(fg) = source.fg {
                    prefs.foreground = fg.into();
                }
                if let Some(bg) = source.bg {
                    prefs.background = bg.into();
                }
                if let Some(theme) = source.badge_theme {
                    prefs.badge_theme = theme;
                }
            })
            .await?;
    }

    let content = session.source(source.file.as_deref(), &config.media)?;
    let prepared = session
        .begin(content)
        .run(&mut |progress| {
            if progress != Progress::Idle {
                eprint!("\r{}   ", progress);
            }
        })
        .await;
    eprintln!();

    Ok(session.accept(prepared?)?)
}

struct Screen {
    drawn: bool,
    theme: BadgeTheme,
}

impl Screen {
    fn new(theme: BadgeTheme) -> Self {
        Self {
            drawn: false,
            theme,
        }
    }

    fn draw(&mut self, grid: &Grid) -> std::io::Result<()> {
        let mut out = std::io::stdout();

        if self.drawn {
            // Back to the top left corner of the previous frame
            write!(out, "\x1B[{}F", GRID_SIZE + 1)?;
        }

        write!(out, "{}", Ansi::new(grid, self.theme))?;
        out.flush()?;

        self.drawn = true;
        Ok(())
    }
}

async fn preview(mut session: Session, source: SourceOpts, config: Config) -> eyre::Result<()> {
    let theme = session.preferences().badge_theme;
    let prepared = prepare(&mut session, &source, &config).await?;
    let sequence = &prepared.sequence;

    let mut player = Player::new(sequence.len(), sequence.fps());
    let mut screen = Screen::new(theme);
    screen.draw(sequence.frame(0))?;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            index = player.advance() => screen.draw(sequence.frame(index))?,
        }
    }

    println!();
    Ok(())
}

fn connect(config: &Config) -> eyre::Result<(Arc<dyn DeviceApi>, LinkMonitor)> {
    let device: Arc<dyn DeviceApi> = Arc::new(
        HttpDevice::new(&config.device, config.link.probe_timeout())
            .wrap_err("failed to create the device client")?,
    );
    let monitor = LinkMonitor::new(device.clone(), &config.link);

    Ok((device, monitor))
}

/// Wait until `accept` returns true for the link state, or until Ctrl-C
async fn wait_for_link(
    link: &mut watch::Receiver<LinkState>,
    accept: impl Fn(LinkState) -> bool,
) -> eyre::Result<bool> {
    loop {
        let state = *link.borrow_and_update();
        if accept(state) {
            return Ok(true);
        }

        eprintln!("badge {}, waiting...", state);

        tokio::select! {
            _ = signal::ctrl_c() => return Ok(false),
            changed = link.changed() => changed?,
        }
    }
}

async fn send(mut session: Session, source: SourceOpts, config: Config) -> eyre::Result<()> {
    let theme = session.preferences().badge_theme;
    let prepared = prepare(&mut session, &source, &config).await?;
    let sequence = &prepared.sequence;

    let (device, monitor) = connect(&config)?;
    let mut link = monitor.subscribe();
    let cancel = CancellationToken::new();
    tokio::spawn(monitor.run(cancel.clone()));

    if !wait_for_link(&mut link, LinkState::is_current).await? {
        cancel.cancel();
        return Ok(());
    }

    let mut delivery = DeliveryController::new(device, link.clone(), &config.delivery);
    let outcome = delivery.deliver(sequence).await;
    eprintln!("delivery: {}", outcome);

    let mut player = Player::new(sequence.len(), sequence.fps());
    player.reset();
    if outcome == DeliveryOutcome::Streaming {
        delivery.stream_frame(0, sequence.frame(0));
    }

    let mut screen = Screen::new(theme);
    screen.draw(&preview::frame_for(*link.borrow(), sequence.frame(0)))?;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            index = player.advance() => {
                let frame = sequence.frame(index);
                delivery.stream_frame(index, frame);
                screen.draw(&preview::frame_for(*link.borrow(), frame))?;
            }
        }
    }

    delivery.stop_streaming();
    cancel.cancel();
    println!();
    Ok(())
}

async fn monitor(config: Config) -> eyre::Result<()> {
    let (_, monitor) = connect(&config)?;
    let mut link = monitor.subscribe();
    let cancel = CancellationToken::new();
    tokio::spawn(monitor.run(cancel.clone()));

    println!("{}", *link.borrow_and_update());

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            changed = link.changed() => {
                changed?;
                println!("{}", *link.borrow_and_update());
            }
        }
    }

    cancel.cancel();
    Ok(())
}

async fn confirm(question: &str) -> eyre::Result<bool> {
    eprint!("{} [y/N] ", question);
    std::io::stderr().flush()?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await?;

    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

async fn flash(config: Config, paths: Paths, yes: bool, force: bool) -> eyre::Result<()> {
    if !force {
        let (_, monitor) = connect(&config)?;
        let mut link = monitor.subscribe();
        let cancel = CancellationToken::new();
        tokio::spawn(monitor.run(cancel.clone()));

        let found = wait_for_link(&mut link, Flasher::is_available).await?;
        cancel.cancel();

        if !found {
            return Ok(());
        }

        eprintln!("Legacy firmware detected.");
    }

    if !yes
        && !confirm("Install the new firmware? Put the badge in flashing mode and connect it over USB.")
            .await?
    {
        return Ok(());
    }

    let flasher = Flasher::new(config.flash.clone());
    let mut provider = UsbSerialProvider::new(&config.flash);
    let firmware = Firmware::locate(&config.flash.firmware, &paths);
    debug!(firmware = ?firmware, "flashing");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let mut states = flasher.subscribe();
    let reporter = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            match *states.borrow_and_update() {
                state @ FlashState::Flashing(_) => eprint!("\r{}   ", state),
                state if state.is_terminal() => break,
                state => eprintln!("{}", state),
            }
        }
    });

    let session = flasher.run(&mut provider, &firmware, &cancel).await;
    reporter.abort();

    eprintln!();
    match session.outcome {
        FlashState::Success => {
            println!("{}", session.outcome);
            Ok(())
        }
        FlashState::Failed(failure) => Err(eyre::eyre!("{}", failure)),
        _ => Ok(()),
    }
}

async fn encode(
    mut session: Session,
    source: SourceOpts,
    output: PathBuf,
    config: Config,
) -> eyre::Result<()> {
    let prepared = prepare(&mut session, &source, &config).await?;
    let payload = wire::encode(&prepared.sequence);

    tokio::fs::write(&output, &payload)
        .await
        .wrap_err_with(|| format!("failed to write {}", output.display()))?;

    info!(
        path = %output.display(),
        bytes = %payload.len(),
        frames = %prepared.sequence.len(),
        "encoded"
    );
    Ok(())
}

async fn run(opts: Opts) -> eyre::Result<()> {
    debug!(version = %VERSION, "starting");

    // Load configuration
    let config = if let Some(config_path) = opts.config_path.as_deref() {
        Config::load_file(config_path)
            .await
            .wrap_err_with(|| format!("failed to load {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Dump configuration if this was asked
    if opts.dump_config {
        print!("{}", config.to_string()?);
        return Ok(());
    }

    let paths = Paths::new(None)?;
    let session = Session::open(PreferenceStore::from_paths(&paths)).await;

    match opts.command {
        Some(Command::Preview(source)) => preview(session, source, config).await,
        Some(Command::Send(source)) => send(session, source, config).await,
        Some(Command::Monitor) => monitor(config).await,
        Some(Command::Flash { yes, force }) => flash(config, paths, yes, force).await,
        Some(Command::Encode { source, output }) => encode(session, source, output, config).await,
        None => {
            Opts::clap().print_help()?;
            println!();
            Ok(())
        }
    }
}

fn install_tracing(opts: &Opts) -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let fmt_layer = fmt::layer().with_writer(std::io::stderr);

    let filter_layer = EnvFilter::try_from_env("PIXBADGE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(match opts.verbose {
            0 => "pixbadge=warn",
            1 => "pixbadge=info",
            2 => "pixbadge=debug",
            _ => "pixbadge=trace",
        })
    });

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .try_init()
}

#[paw::main]
fn main(opts: Opts) -> eyre::Result<()> {
    color_eyre::install()?;
    install_tracing(&opts)?;

    // Everything runs on one thread
    let rt = Builder::new_current_thread().enable_all().build()?;
    rt.block_on(run(opts))
}
