use serialport::{
    ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits,
    available_ports as system_ports,
};
use std::{
    io::{self, Read, Write},
    thread,
    time::{Duration, Instant},
};

use crate::error::{AcquireError, LinkError, ProtocolError};
use crate::grid::Frame;
use crate::protocol;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

const HANDSHAKE_POLL: Duration = Duration::from_millis(10);

/// `Failed` sticks until the next `open` or `close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Closed,
    Opening,
    AwaitingReady,
    Open,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// Byte stream to the device.
pub trait SerialStream: Read + Write + Send {
    /// Drop whatever is sitting in the receive buffer.
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialStream for Box<dyn SerialPort> {
    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

/// Opens named ports. Swapped for in-memory devices in tests.
pub trait Connector: Send {
    fn connect(&mut self, port_name: &str, options: &LinkOptions)
    -> io::Result<Box<dyn SerialStream>>;
}

/// Real serial ports through the `serialport` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl Connector for SystemPorts {
    fn connect(
        &mut self,
        port_name: &str,
        options: &LinkOptions,
    ) -> io::Result<Box<dyn SerialStream>> {
        let mut port = serialport::new(port_name, options.baud_rate)
            .data_bits(DataBits::Eight)
            .flow_control(FlowControl::None)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(options.read_timeout)
            .open()?;

        // Asserting DTR resets most Arduino-style boards, which then send the ready byte.
        port.write_data_terminal_ready(true)?;
        port.clear(ClearBuffer::All)?;
        Ok(Box::new(port))
    }
}

/// Names of the serial ports on this machine, USB devices first.
pub fn available_ports() -> Vec<String> {
    let Ok(ports) = system_ports() else {
        return Vec::new();
    };
    let (mut usb, other): (Vec<_>, Vec<_>) = ports
        .into_iter()
        .partition(|p| matches!(p.port_type, SerialPortType::UsbPort(_)));
    usb.extend(other);
    usb.into_iter().map(|p| p.port_name).collect()
}

/// The logical connection to the sensor: handle, bound port name and state.
pub struct SerialLink<C> {
    connector: C,
    options: LinkOptions,
    state: LinkState,
    bound_port: Option<String>,
    stream: Option<Box<dyn SerialStream>>,
}

impl<C: Connector> SerialLink<C> {
    pub fn new(connector: C, options: LinkOptions) -> Self {
        Self {
            connector,
            options,
            state: LinkState::Closed,
            bound_port: None,
            stream: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn bound_port(&self) -> Option<&str> {
        self.bound_port.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open && self.stream.is_some()
    }

    /// New options apply the next time the port is opened.
    pub fn set_options(&mut self, options: LinkOptions) {
        self.options = options;
    }

    /// Opens `port_name` and waits for the device's ready byte.
    pub fn open(&mut self, port_name: &str) -> Result<(), LinkError> {
        self.close();
        self.state = LinkState::Opening;
        tracing::debug!(port = port_name, baud = self.options.baud_rate, "opening serial port");

        let mut stream = match self.connector.connect(port_name, &self.options) {
            Ok(stream) => stream,
            Err(e) => {
                self.state = LinkState::Failed;
                return Err(LinkError::OpenFailure {
                    port: port_name.to_owned(),
                    reason: e.to_string(),
                });
            }
        };

        self.state = LinkState::AwaitingReady;
        if let Err(e) = wait_for_ready(&mut *stream, port_name, self.options.handshake_timeout) {
            self.state = LinkState::Failed;
            return Err(e);
        }

        tracing::info!(port = port_name, "sensor ready");
        self.stream = Some(stream);
        self.bound_port = Some(port_name.to_owned());
        self.state = LinkState::Open;
        Ok(())
    }

    /// Releases the port. Safe to call in any state.
    pub fn close(&mut self) {
        if let Some(port) = self.bound_port.take() {
            tracing::debug!(port = %port, "closing serial port");
        }
        self.stream = None;
        self.state = LinkState::Closed;
    }

    /// Makes sure the link is open on `port_name`, rebinding if the user switched ports.
    pub fn ensure_open(&mut self, port_name: &str) -> Result<(), LinkError> {
        if self.bound_port.as_deref() != Some(port_name) {
            self.close();
        }
        if !self.is_open() {
            self.open(port_name)?;
        }
        Ok(())
    }

    /// One request/response exchange.
    pub fn request_frame(&mut self) -> Result<Frame, AcquireError> {
        let stream = self.stream.as_mut().ok_or(LinkError::NotOpen)?;

        let written = stream
            .write_all(&[protocol::encode_request()])
            .and_then(|()| stream.flush());
        if let Err(e) = written {
            self.close();
            return Err(LinkError::Write(e).into());
        }

        match protocol::decode_frame(&mut **stream) {
            Ok(frame) => Ok(frame),
            Err(ProtocolError::Io(e)) => {
                self.close();
                Err(ProtocolError::Io(e).into())
            }
            Err(e) => {
                // Realign: whatever is left of the broken frame must not be read as a header.
                if let Err(clear_err) = stream.discard_input() {
                    tracing::debug!(error = %clear_err, "could not discard serial input");
                }
                Err(e.into())
            }
        }
    }
}

fn wait_for_ready(
    stream: &mut dyn SerialStream,
    port_name: &str,
    timeout: Duration,
) -> Result<(), LinkError> {
    let started = Instant::now();
    let timed_out = || LinkError::HandshakeTimeout {
        port: port_name.to_owned(),
        timeout,
    };
    let mut byte = [0u8; 1];

    while started.elapsed() < timeout {
        match stream.read(&mut byte) {
            Ok(1) if byte[0] == protocol::encode_ready_check() => {
                // A byte that only showed up after the deadline does not count.
                return if started.elapsed() <= timeout {
                    Ok(())
                } else {
                    Err(timed_out())
                };
            }
            Ok(0) => thread::sleep(HANDSHAKE_POLL),
            Ok(_) => {}
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                return Err(LinkError::OpenFailure {
                    port: port_name.to_owned(),
                    reason: e.to_string(),
                });
            }
        }
    }
    Err(timed_out())
}
