use color_eyre::Result;
use std::{fs::File, sync::Mutex};
use tracing_subscriber::EnvFilter;

use scheduler::Scheduler;
use serial_link::SystemPorts;
use settings::Settings;

pub mod app;
pub mod colormap;
pub mod compositor;
pub mod error;
pub mod grid;
pub mod heatmap;
pub mod protocol;
pub mod recorder;
pub mod scheduler;
pub mod serial_link;
pub mod settings;

/// The terminal belongs to the UI, so logs go to a file next to the settings.
fn init_logging() -> Result<()> {
    let dir = Settings::app_dir();
    std::fs::create_dir_all(&dir)?;
    let file = File::create(dir.join("pressure-mat.log"))?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

/// Entry point: load settings, start acquisition, run the terminal UI.
fn main() -> Result<()> {
    color_eyre::install()?;
    init_logging()?;

    let settings_path = Settings::default_path();
    let mut settings = Settings::load_or_default(&settings_path);
    settings.forget_missing_port(&serial_link::available_ports());

    let (scheduler, session, notices) = Scheduler::new(settings, SystemPorts);
    let worker = scheduler.spawn()?;

    let terminal = ratatui::init();
    let result = app::App::new(session.clone(), notices).run(terminal);
    ratatui::restore();

    session.shutdown();
    if worker.join().is_err() {
        tracing::error!("acquisition thread panicked");
    }
    session.settings().save_to(&settings_path)?;
    tracing::info!("exiting");
    result
}
