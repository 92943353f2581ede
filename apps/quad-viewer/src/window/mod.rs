use std::fmt;

pub mod x11;

pub use x11::X11Host;

use crate::config::WindowConfig;
use crate::pipeline::layout::Dimensions;

/// Keysym values used by the viewer
pub mod keysym {
    pub const ESCAPE: u32 = 0xff1b;
    pub const LOWER_Q: u32 = 0x0071;
    pub const UPPER_Q: u32 = 0x0051;
}

/// Native identifier of the render surface handed to the video sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(u64);

impl WindowHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    KeyPress { code: u32, keysym: u32 },
    MouseMove { x: i32, y: i32 },
    MouseButton { button: u8, x: i32, y: i32 },
    CloseRequested,
    ConfigureNotify { width: u32, height: u32 },
}

impl InputEvent {
    /// Escape, q and Q end the session
    pub fn is_exit_key(&self) -> bool {
        matches!(
            self,
            InputEvent::KeyPress {
                keysym: keysym::ESCAPE | keysym::LOWER_Q | keysym::UPPER_Q,
                ..
            }
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    #[error("Cannot connect to display: {0}")]
    DisplayConnection(String),
    #[error("Window creation failed: {0}")]
    WindowCreation(String),
    #[error("Display connection lost: {0}")]
    ConnectionLost(String),
}

/// Native window the pipeline renders into.
///
/// The handle returned by `create_window` stays valid until `destroy`; the
/// pipeline must have detached from it by then.
pub trait WindowHost {
    fn create_window(&mut self, config: &WindowConfig) -> Result<WindowHandle, WindowError>;

    /// Non-blocking drain of pending input. Empty when idle.
    fn poll_events(&mut self) -> Result<Vec<InputEvent>, WindowError>;

    /// Current size of the window, if one exists
    fn size(&self) -> Option<Dimensions>;

    /// Release the window. Idempotent.
    fn destroy(&mut self);
}
