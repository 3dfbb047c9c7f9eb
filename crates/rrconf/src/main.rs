mod config;
mod ipc;
mod output_config;
mod randr;
mod session;
mod settings;
mod state;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use rrconf_common::ipc::IpcEvent;

use config::Config;
use ipc::IpcServer;
use randr::backend::RandrBackend;
use randr::display::Display;
use randr::x11::X11Backend;
use settings::Settings;
use state::State;

#[derive(Parser, Debug)]
#[command(name = "rrconf", about = "Configure X11 outputs through RandR", disable_version_flag = true)]
struct Cli {
    /// Print version information
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Apply the saved layout without confirmation and exit
    #[arg(short = 's', long = "startup")]
    startup: bool,

    /// Settings file to use instead of the default location
    #[arg(long = "settings", value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Apply changes without waiting for confirmation
    #[arg(long = "no-confirm")]
    no_confirm: bool,
}

struct LoopData {
    state: State<X11Backend>,
    ipc: Option<IpcServer>,
}

impl LoopData {
    fn broadcast(&mut self, events: Vec<IpcEvent>) {
        let Some(ipc) = self.ipc.as_mut() else {
            return;
        };
        for event in &events {
            ipc.broadcast(event);
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.version {
        println!("rrconf {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    // Installed wide open so config loading is logged, then narrowed.
    rrconf_common::logging::init_with_level(log::LevelFilter::Trace);
    let mut config = Config::load();
    log::set_max_level(config.log_level());
    if cli.no_confirm {
        config.confirm.enabled = false;
    }
    let settings_path = cli.settings.unwrap_or_else(Settings::default_path);

    if cli.startup {
        run_startup(&config, &settings_path);
        return ExitCode::SUCCESS;
    }

    match run_interactive(config, settings_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Applies the saved layout, if there is one. Failures are logged only.
fn run_startup(config: &Config, settings_path: &Path) {
    if !settings_path.exists() {
        log::info!("No saved layout at {}", settings_path.display());
        return;
    }

    let backend = match X11Backend::connect(None) {
        Ok(backend) => backend,
        Err(e) => {
            log::error!("{}", e);
            return;
        }
    };
    let mut display = Display::with_gamma_tuning(backend, config.gamma_tuning());
    startup_apply(&mut display, settings_path);
}

/// Stages the layout stored at `settings_path` and applies it without
/// confirmation. Returns true if a layout was applied in full.
fn startup_apply<B: RandrBackend>(display: &mut Display<B>, settings_path: &Path) -> bool {
    if let Some(e) = display.error() {
        log::error!("Cannot configure this display: {}", e);
        return false;
    }
    let settings = match Settings::load(settings_path) {
        Ok(Some(settings)) => settings,
        Ok(None) => return false,
        Err(e) => {
            log::error!("{}", e);
            return false;
        }
    };

    display.load_display(&settings, true);
    if display.apply_proposed(false) {
        log::info!("Startup layout applied");
        true
    } else {
        log::warn!("Startup layout could not be fully applied");
        false
    }
}

fn run_interactive(config: Config, settings_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    session::setup_signal_handlers()?;

    let backend = X11Backend::connect(None)?;
    let x_fd = backend.fd().try_clone_to_owned()?;
    let display = Display::with_gamma_tuning(backend, config.gamma_tuning());
    if let Some(e) = display.error() {
        return Err(format!("cannot configure this display: {}", e).into());
    }

    let ipc = if config.ipc.enabled {
        match IpcServer::new() {
            Ok(server) => Some(server),
            Err(e) => {
                log::warn!("IPC unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let mut event_loop = calloop::EventLoop::<LoopData>::try_new()?;
    let handle = event_loop.handle();

    handle.insert_source(
        calloop::generic::Generic::new(x_fd, calloop::Interest::READ, calloop::Mode::Level),
        |_, _, data| {
            let events = data.state.dispatch_display_events();
            data.broadcast(events);
            Ok(calloop::PostAction::Continue)
        },
    )
    .map_err(|e| e.error)?;

    if let Some(server) = ipc.as_ref() {
        let ipc_fd = server.fd().try_clone_to_owned()?;
        handle.insert_source(
            calloop::generic::Generic::new(ipc_fd, calloop::Interest::READ, calloop::Mode::Level),
            |_, _, data| {
                if let Some(ipc) = data.ipc.as_mut() {
                    ipc.accept_connections();
                }
                Ok(calloop::PostAction::Continue)
            },
        )
        .map_err(|e| e.error)?;

        handle.insert_source(
            calloop::timer::Timer::from_duration(Duration::from_millis(50)),
            |_, _, data| {
                let commands = data.ipc.as_mut().map(IpcServer::poll_commands).unwrap_or_default();
                for command in commands {
                    let events = data.state.handle_command(command);
                    data.broadcast(events);
                }
                calloop::timer::TimeoutAction::ToDuration(Duration::from_millis(50))
            },
        )
        .map_err(|e| e.error)?;
    }

    handle.insert_source(
        calloop::timer::Timer::from_duration(Duration::from_secs(1)),
        |_, _, data| {
            let events = data.state.tick();
            data.broadcast(events);
            calloop::timer::TimeoutAction::ToDuration(Duration::from_secs(1))
        },
    )
    .map_err(|e| e.error)?;

    let mut data = LoopData {
        state: State::new(display, config, settings_path),
        ipc,
    };
    let screens = data.state.screens();
    if let Some(ipc) = data.ipc.as_mut() {
        ipc.send_state(screens);
    }
    log::info!("Waiting for commands");

    while session::is_running() {
        event_loop.dispatch(Some(Duration::from_millis(250)), &mut data)?;
        // Replies can pull events into the connection's queue without the
        // socket becoming readable again.
        let events = data.state.dispatch_display_events();
        data.broadcast(events);
    }

    if data.state.countdown().is_active() {
        log::info!("Exiting with an unconfirmed layout, reverting");
        let events = data.state.handle_command(rrconf_common::ipc::IpcCommand::Revert);
        data.broadcast(events);
    }
    log::info!("Shutting down");
    Ok(())
}
