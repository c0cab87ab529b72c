//! Background acquisition loop and the handle the UI uses to talk to it.
//!
//! The scheduler owns everything that touches the serial port. The UI never
//! holds the port; it writes settings through a [`SessionHandle`] and the
//! next cycle picks them up.

use parking_lot::Mutex;
use std::{
    f64::consts::PI,
    io,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use crate::colormap;
use crate::compositor::{Bitmap, Compositor};
use crate::error::LinkError;
use crate::grid::Frame;
use crate::recorder::Recorder;
use crate::serial_link::{Connector, SerialLink};
use crate::settings::{DataSource, Settings};

/// How long a paused cycle sleeps before looking again.
pub const PAUSE_INTERVAL: Duration = Duration::from_millis(100);

const SIM_SIZE: usize = 16;
const SIM_PEAK: f64 = 1023.0;

/// Things the user should hear about.
#[derive(Debug)]
pub enum Notice {
    LinkFailed { port: String, error: LinkError },
    RecordingStarted(PathBuf),
    RecordingStopped { path: PathBuf, frames: u64 },
    RecordingFailed(String),
}

enum Command {
    StartRecording(PathBuf),
    StopRecording,
}

struct Shared {
    settings: Mutex<Settings>,
    frame: Mutex<Arc<Frame>>,
    compositor: Mutex<Compositor>,
    paused: AtomicBool,
    recording: AtomicBool,
    shutdown: AtomicBool,
}

/// UI side of a running session. Cheap to clone.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// The latest complete frame.
    pub fn current_frame(&self) -> Arc<Frame> {
        Arc::clone(&self.shared.frame.lock())
    }

    /// Runs `f` against the latest bitmap while the compositor is locked.
    pub fn with_bitmap<R>(&self, f: impl FnOnce(Option<&Bitmap>) -> R) -> R {
        f(self.shared.compositor.lock().bitmap())
    }

    pub fn settings(&self) -> Settings {
        self.shared.settings.lock().clone()
    }

    /// Edits the settings in place; the change applies on the next cycle.
    pub fn update_settings(&self, f: impl FnOnce(&mut Settings)) {
        f(&mut self.shared.settings.lock());
    }

    /// Resize notification from the renderer.
    pub fn resize_canvas(&self, width: usize, height: usize) {
        self.shared.settings.lock().canvas_size = (width, height);
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Relaxed)
    }

    pub fn start_recording(&self, path: PathBuf) {
        let _ = self.commands.send(Command::StartRecording(path));
    }

    pub fn stop_recording(&self) {
        let _ = self.commands.send(Command::StopRecording);
    }

    pub fn is_recording(&self) -> bool {
        self.shared.recording.load(Ordering::Relaxed)
    }

    /// Asks the loop to close the link and return.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
    }
}

/// The continuously running acquisition task.
pub struct Scheduler<C> {
    shared: Arc<Shared>,
    link: SerialLink<C>,
    commands: mpsc::Receiver<Command>,
    notices: mpsc::Sender<Notice>,
    recorder: Option<Recorder>,
}

impl<C: Connector + 'static> Scheduler<C> {
    pub fn new(settings: Settings, connector: C) -> (Self, SessionHandle, mpsc::Receiver<Notice>) {
        let link = SerialLink::new(connector, settings.link_options());
        let shared = Arc::new(Shared {
            settings: Mutex::new(settings),
            frame: Mutex::new(Arc::new(Frame::fallback())),
            compositor: Mutex::new(Compositor::new()),
            paused: AtomicBool::new(false),
            recording: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        });
        let (command_tx, command_rx) = mpsc::channel();
        let (notice_tx, notice_rx) = mpsc::channel();
        let handle = SessionHandle {
            shared: Arc::clone(&shared),
            commands: command_tx,
        };
        let scheduler = Self {
            shared,
            link,
            commands: command_rx,
            notices: notice_tx,
            recorder: None,
        };
        (scheduler, handle, notice_rx)
    }

    /// Starts the loop on its own thread.
    pub fn spawn(self) -> io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("acquisition".into())
            .spawn(move || self.run())
    }

    /// Polls until [`SessionHandle::shutdown`] is called.
    pub fn run(mut self) {
        tracing::info!("acquisition loop started");
        while !self.shared.shutdown.load(Ordering::Relaxed) {
            if let Some(wait) = self.cycle() {
                thread::sleep(wait);
            }
        }
        self.link.close();
        self.stop_recording();
        tracing::info!("acquisition loop stopped");
    }

    /// One pass: fetch, publish, record, render. Returns how long to sleep afterwards.
    pub fn cycle(&mut self) -> Option<Duration> {
        self.apply_commands();
        if self.shared.paused.load(Ordering::Relaxed) {
            return Some(PAUSE_INTERVAL);
        }

        let started = Instant::now();
        let settings = self.shared.settings.lock().clone();
        let frame = Arc::new(match settings.data_source {
            DataSource::Live => self.acquire_live(&settings),
            DataSource::Simulated => simulated_frame(wall_clock_secs()),
            DataSource::Recorded => Frame::fallback(),
        });

        *self.shared.frame.lock() = Arc::clone(&frame);
        self.record(&frame);
        self.render(&frame, &settings);

        settings
            .frame_period()
            .map(|period| period.saturating_sub(started.elapsed()))
    }

    fn acquire_live(&mut self, settings: &Settings) -> Frame {
        let Some(port) = settings.port.as_deref().filter(|p| !p.is_empty()) else {
            return Frame::fallback();
        };

        self.link.set_options(settings.link_options());
        if let Err(error) = self.link.ensure_open(port) {
            tracing::error!(port, %error, "could not connect to sensor");
            // Forget the port so a bad one is not retried every cycle.
            {
                let mut shared = self.shared.settings.lock();
                if shared.port.as_deref() == Some(port) {
                    shared.port = None;
                }
            }
            let _ = self.notices.send(Notice::LinkFailed {
                port: port.to_owned(),
                error,
            });
            return Frame::fallback();
        }

        match self.link.request_frame() {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(port, %error, "frame request failed");
                Frame::fallback()
            }
        }
    }

    fn render(&self, frame: &Frame, settings: &Settings) {
        let config = settings.render_config();
        let normalized = colormap::normalize(frame, config.value_min, config.value_max);
        let colors = colormap::colorize(&normalized, config.gradient);
        if self.shared.compositor.lock().composite(&colors, &config).is_none() {
            tracing::trace!(canvas = ?config.canvas, "canvas too small, keeping previous bitmap");
        }
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::StartRecording(path) => {
                    self.stop_recording();
                    match Recorder::create(&path) {
                        Ok(recorder) => {
                            self.recorder = Some(recorder);
                            self.shared.recording.store(true, Ordering::Relaxed);
                            let _ = self.notices.send(Notice::RecordingStarted(path));
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "could not start recording");
                            let _ = self.notices.send(Notice::RecordingFailed(e.to_string()));
                        }
                    }
                }
                Command::StopRecording => self.stop_recording(),
            }
        }
    }

    fn record(&mut self, frame: &Frame) {
        let Some(recorder) = self.recorder.as_mut() else {
            return;
        };
        if let Err(e) = recorder.record(frame) {
            tracing::error!(path = %recorder.path().display(), error = %e, "recording write failed");
            self.recorder = None;
            self.shared.recording.store(false, Ordering::Relaxed);
            let _ = self.notices.send(Notice::RecordingFailed(e.to_string()));
        }
    }

    fn stop_recording(&mut self) {
        let Some(recorder) = self.recorder.take() else {
            return;
        };
        self.shared.recording.store(false, Ordering::Relaxed);
        let path = recorder.path().to_owned();
        let notice = match recorder.finish() {
            Ok(frames) => Notice::RecordingStopped { path, frames },
            Err(e) => Notice::RecordingFailed(e.to_string()),
        };
        let _ = self.notices.send(notice);
    }
}

fn wall_clock_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Standing wave pattern used when no sensor is attached.
pub fn simulated_frame(t: f64) -> Frame {
    let n = SIM_SIZE as f64;
    let pulse = t.sin();
    Frame::from_fn(SIM_SIZE, SIM_SIZE, |i, j| {
        let across = (2.0 * PI * (j as f64 + 0.5) / n).sin();
        let down = (PI * (i as f64 + 0.5) / n).sin();
        (SIM_PEAK * (across * down * pulse).abs()).round() as u16
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_frame;
    use crate::serial_link::testing::{FakeDevice, fast_options};
    use std::f64::consts::FRAC_PI_2;

    fn settings(data_source: DataSource) -> Settings {
        Settings {
            data_source,
            canvas_size: (320, 320),
            handshake_timeout_ms: fast_options().handshake_timeout.as_millis() as u64,
            ..Settings::default()
        }
    }

    #[test]
    fn simulated_frame_follows_standing_wave() {
        let frame = simulated_frame(FRAC_PI_2);
        assert_eq!((frame.rows(), frame.cols()), (16, 16));
        let expected = |i: f64, j: f64| {
            1023.0 * ((2.0 * PI * (j + 0.5) / 16.0).sin() * (PI * (i + 0.5) / 16.0).sin()).abs()
        };
        for (i, j) in [(0, 0), (7, 3), (15, 12), (8, 8)] {
            let got = frame.row(i)[j] as f64;
            assert!((got - expected(i as f64, j as f64)).abs() <= 0.5, "({i},{j}) = {got}");
        }
        assert!(frame.peak() <= 1023);
        assert_eq!(simulated_frame(0.0).peak(), 0);
    }

    #[test]
    fn simulated_source_renders_full_canvas() {
        let (mut scheduler, session, _notices) =
            Scheduler::new(settings(DataSource::Simulated), FakeDevice::default());
        assert_eq!(scheduler.cycle(), None);

        let frame = session.current_frame();
        assert_eq!((frame.rows(), frame.cols()), (16, 16));
        session.with_bitmap(|bitmap| {
            let bitmap = bitmap.expect("bitmap rendered");
            assert_eq!((bitmap.width(), bitmap.height()), (320, 320));
            // 20 pixel cells: both corners of the first cell share one colour.
            assert_eq!(bitmap.pixel(0, 0), bitmap.pixel(19, 19));
        });
    }

    #[test]
    fn failed_open_publishes_fallback_and_clears_port() {
        let device = FakeDevice {
            refuse: true,
            ..FakeDevice::default()
        };
        let live = Settings {
            port: Some("COM4".into()),
            ..settings(DataSource::Live)
        };
        let (mut scheduler, session, notices) = Scheduler::new(live, device.clone());
        scheduler.cycle();

        assert_eq!(*session.current_frame(), Frame::fallback());
        assert_eq!(session.settings().port, None);
        match notices.try_recv() {
            Ok(Notice::LinkFailed { port, error }) => {
                assert_eq!(port, "COM4");
                assert!(matches!(error, LinkError::OpenFailure { .. }));
            }
            other => panic!("expected LinkFailed, got {other:?}"),
        }

        // No automatic retry against the same port.
        scheduler.cycle();
        assert_eq!(device.connects.lock().len(), 1);
        assert!(notices.try_recv().is_err());
    }

    #[test]
    fn handshake_timeout_is_reported_without_requesting() {
        let device = FakeDevice::default();
        let written = device.written.clone();
        let live = Settings {
            port: Some("/dev/ttyACM0".into()),
            ..settings(DataSource::Live)
        };
        let (mut scheduler, session, notices) = Scheduler::new(live, device);
        scheduler.cycle();

        assert!(matches!(
            notices.try_recv(),
            Ok(Notice::LinkFailed {
                error: LinkError::HandshakeTimeout { .. },
                ..
            })
        ));
        assert!(written.lock().is_empty());
        assert_eq!(*session.current_frame(), Frame::fallback());
    }

    #[test]
    fn live_source_publishes_decoded_frames() {
        let device = FakeDevice::ready_immediately();
        let frame = Frame::from_fn(4, 6, |r, c| (r * 100 + c) as u16);
        device.queue(encode_frame(&frame));
        let live = Settings {
            port: Some("a".into()),
            ..settings(DataSource::Live)
        };
        let (mut scheduler, session, notices) = Scheduler::new(live, device);
        scheduler.cycle();
        assert_eq!(*session.current_frame(), frame);

        // Device goes quiet: fallback frame, link kept, nothing user facing.
        scheduler.cycle();
        assert_eq!(*session.current_frame(), Frame::fallback());
        assert!(notices.try_recv().is_err());
        assert_eq!(session.settings().port.as_deref(), Some("a"));
    }

    #[test]
    fn recorded_source_is_fallback() {
        let (mut scheduler, session, _notices) =
            Scheduler::new(settings(DataSource::Recorded), FakeDevice::default());
        scheduler.cycle();
        assert_eq!(*session.current_frame(), Frame::fallback());
    }

    #[test]
    fn paused_cycle_skips_fetch_and_render() {
        let (mut scheduler, session, _notices) =
            Scheduler::new(settings(DataSource::Simulated), FakeDevice::default());
        session.pause();
        assert_eq!(scheduler.cycle(), Some(PAUSE_INTERVAL));
        assert_eq!(*session.current_frame(), Frame::fallback());
        assert!(session.with_bitmap(|b| b.is_none()));

        session.resume();
        scheduler.cycle();
        assert_eq!(session.current_frame().rows(), 16);
    }

    #[test]
    fn frame_rate_limits_cycle() {
        let capped = Settings {
            frames_per_second: Some(10),
            ..settings(DataSource::Recorded)
        };
        let (mut scheduler, _session, _notices) = Scheduler::new(capped, FakeDevice::default());
        let wait = scheduler.cycle().expect("paced");
        assert!(wait <= Duration::from_millis(100));
        assert!(wait > Duration::ZERO);
    }

    #[test]
    fn canvas_resize_reallocates_once() {
        let (mut scheduler, session, _notices) =
            Scheduler::new(settings(DataSource::Simulated), FakeDevice::default());
        session.resize_canvas(200, 200);
        scheduler.cycle();
        scheduler.cycle();
        session.resize_canvas(400, 400);
        for _ in 0..3 {
            scheduler.cycle();
        }
        let allocations = scheduler.shared.compositor.lock().allocations();
        assert_eq!(allocations, 2);
        session.with_bitmap(|b| assert_eq!(b.map(|b| b.width()), Some(400)));
    }

    #[test]
    fn recording_commands_write_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let (mut scheduler, session, notices) =
            Scheduler::new(settings(DataSource::Recorded), FakeDevice::default());

        session.start_recording(path.clone());
        scheduler.cycle();
        scheduler.cycle();
        assert!(session.is_recording());
        session.stop_recording();
        scheduler.cycle();
        assert!(!session.is_recording());

        assert!(matches!(notices.try_recv(), Ok(Notice::RecordingStarted(_))));
        match notices.try_recv() {
            Ok(Notice::RecordingStopped { frames, .. }) => assert_eq!(frames, 2),
            other => panic!("expected RecordingStopped, got {other:?}"),
        }
        let text = std::fs::read_to_string(&path).unwrap();
        // Header plus ten rows for each of the two fallback frames.
        assert_eq!(text.lines().count(), 21);
    }

    #[test]
    fn recording_to_existing_file_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "earlier run\n").unwrap();
        let (mut scheduler, session, notices) =
            Scheduler::new(settings(DataSource::Recorded), FakeDevice::default());

        session.start_recording(path.clone());
        scheduler.cycle();

        assert!(!session.is_recording());
        match notices.try_recv() {
            Ok(Notice::RecordingFailed(reason)) => assert!(reason.contains("already exists")),
            other => panic!("expected RecordingFailed, got {other:?}"),
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "earlier run\n");
    }

    #[test]
    fn run_returns_after_shutdown() {
        let (scheduler, session, _notices) =
            Scheduler::new(settings(DataSource::Simulated), FakeDevice::default());
        let worker = scheduler.spawn().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while session.current_frame().rows() != 16 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        session.shutdown();
        worker.join().unwrap();
        assert_eq!(session.current_frame().rows(), 16);
    }
}
