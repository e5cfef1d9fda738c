use std::io::BufRead;

use crossbeam_channel::{Receiver, Sender, TryRecvError};

/// Operator commands honoured between frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    Quit,
    /// Start registration for the active track if it is unbound.
    ManualRegisterActive,
    ClearDatabase,
    ListPersons,
}

/// Parses one line of operator input. Unknown input yields `None`.
pub fn parse_command(line: &str) -> Option<Control> {
    match line.trim().to_ascii_lowercase().as_str() {
        "q" | "quit" | "exit" => Some(Control::Quit),
        "r" | "register" => Some(Control::ManualRegisterActive),
        "c" | "clear" => Some(Control::ClearDatabase),
        "l" | "list" | "list persons" => Some(Control::ListPersons),
        _ => None,
    }
}

/// Non-blocking source of controls, drained once per frame.
pub trait ControlSource: Send {
    fn poll(&mut self) -> Vec<Control>;
}

/// Source with no operator attached.
pub struct NoControls;

impl ControlSource for NoControls {
    fn poll(&mut self) -> Vec<Control> {
        Vec::new()
    }
}

/// Controls delivered over a channel from another thread.
///
/// A disconnected sender is treated as a quit request so the loop does not
/// run on without its operator.
pub struct ChannelControlSource {
    rx: Receiver<Control>,
    quit_on_disconnect: bool,
    disconnected: bool,
}

impl ChannelControlSource {
    pub fn new(rx: Receiver<Control>) -> Self {
        Self {
            rx,
            quit_on_disconnect: true,
            disconnected: false,
        }
    }

    /// Keeps running after the sender goes away (e.g. stdin at EOF).
    pub fn ignore_disconnect(mut self) -> Self {
        self.quit_on_disconnect = false;
        self
    }
}

impl ControlSource for ChannelControlSource {
    fn poll(&mut self) -> Vec<Control> {
        let mut controls = Vec::new();
        if self.disconnected {
            return controls;
        }
        loop {
            match self.rx.try_recv() {
                Ok(control) => controls.push(control),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    if self.quit_on_disconnect {
                        log::info!("Control channel closed, stopping");
                        controls.push(Control::Quit);
                    }
                    break;
                }
            }
        }
        controls
    }
}

/// Reads operator commands from `input` line by line on a background
/// thread and forwards recognised ones to `tx`.
pub fn spawn_line_reader<R>(input: R, tx: Sender<Control>) -> std::thread::JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    std::thread::spawn(move || {
        for line in input.lines() {
            let Ok(line) = line else {
                break;
            };
            match parse_command(&line) {
                Some(control) => {
                    if tx.send(control).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => log::warn!("Unknown command {:?} (q, r, c, l)", line.trim()),
            }
        }
    })
}
