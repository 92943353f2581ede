//! X11 window host built on the pure-Rust `x11rb` protocol bindings.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use x11rb::connection::Connection;
use x11rb::properties::{WmSizeHints, WmSizeHintsSpecification};
use x11rb::protocol::xproto::{
    AtomEnum, ConnectionExt as _, CreateWindowAux, EventMask, KeyButMask, PropMode, Window,
    WindowClass,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use super::{InputEvent, WindowError, WindowHandle, WindowHost};
use crate::config::WindowConfig;
use crate::pipeline::layout::Dimensions;

const MAP_TIMEOUT: Duration = Duration::from_secs(5);
const MAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

const WM_CLASS: &[u8] = b"quad-viewer\0QuadViewer\0";

x11rb::atom_manager! {
    Atoms: AtomsCookie {
        WM_PROTOCOLS,
        WM_DELETE_WINDOW,
        _NET_WM_NAME,
        _NET_WM_STATE,
        _NET_WM_STATE_FULLSCREEN,
        UTF8_STRING,
    }
}

/// Keycode to keysym table fetched from the server
#[derive(Debug, Clone, Default)]
pub struct KeyboardMap {
    min_keycode: u8,
    keysyms_per_keycode: u8,
    keysyms: Vec<u32>,
}

impl KeyboardMap {
    pub fn new(min_keycode: u8, keysyms_per_keycode: u8, keysyms: Vec<u32>) -> Self {
        Self {
            min_keycode,
            keysyms_per_keycode,
            keysyms,
        }
    }

    /// Keysym for `code`, using the shifted column when requested and present.
    /// Returns 0 (NoSymbol) for unmapped codes.
    pub fn lookup(&self, code: u8, shifted: bool) -> u32 {
        if self.keysyms_per_keycode == 0 || code < self.min_keycode {
            return 0;
        }
        let base = (code - self.min_keycode) as usize * self.keysyms_per_keycode as usize;
        let unshifted = self.keysyms.get(base).copied().unwrap_or(0);
        if !shifted {
            return unshifted;
        }
        match self.keysyms.get(base + 1).copied() {
            Some(sym) if sym != 0 && self.keysyms_per_keycode > 1 => sym,
            _ => unshifted,
        }
    }
}

fn creation_error(err: impl std::fmt::Display) -> WindowError {
    WindowError::WindowCreation(err.to_string())
}

fn connection_lost(err: impl std::fmt::Display) -> WindowError {
    WindowError::ConnectionLost(err.to_string())
}

#[derive(Default)]
pub struct X11Host {
    conn: Option<RustConnection>,
    window: Option<Window>,
    atoms: Option<Atoms>,
    keyboard: KeyboardMap,
    size: Option<Dimensions>,
    pending: VecDeque<InputEvent>,
}

impl X11Host {
    pub fn new() -> Self {
        Self::default()
    }

    fn translate(&self, event: Event) -> Option<InputEvent> {
        let window = self.window?;
        match event {
            Event::KeyPress(e) if e.event == window => {
                let shifted = u16::from(e.state) & u16::from(KeyButMask::SHIFT) != 0;
                Some(InputEvent::KeyPress {
                    code: e.detail as u32,
                    keysym: self.keyboard.lookup(e.detail, shifted),
                })
            }
            Event::MotionNotify(e) if e.event == window => Some(InputEvent::MouseMove {
                x: e.event_x as i32,
                y: e.event_y as i32,
            }),
            Event::ButtonPress(e) if e.event == window => Some(InputEvent::MouseButton {
                button: e.detail,
                x: e.event_x as i32,
                y: e.event_y as i32,
            }),
            Event::ConfigureNotify(e) if e.window == window => Some(InputEvent::ConfigureNotify {
                width: e.width as u32,
                height: e.height as u32,
            }),
            Event::ClientMessage(e) if e.window == window => {
                let atoms = self.atoms.as_ref()?;
                if e.format == 32
                    && e.type_ == atoms.WM_PROTOCOLS
                    && e.data.as_data32()[0] == atoms.WM_DELETE_WINDOW
                {
                    Some(InputEvent::CloseRequested)
                } else {
                    debug!("Ignoring client message of type {}", e.type_);
                    None
                }
            }
            Event::DestroyNotify(e) if e.window == window => Some(InputEvent::CloseRequested),
            Event::Error(err) => {
                warn!("X11 protocol error: {:?}", err);
                None
            }
            _ => None,
        }
    }

    fn wait_for_map(&mut self, window: Window) -> Result<(), WindowError> {
        let deadline = Instant::now() + MAP_TIMEOUT;
        loop {
            let event = {
                let conn = self.conn.as_ref().ok_or_else(|| creation_error("no connection"))?;
                conn.poll_for_event().map_err(creation_error)?
            };
            match event {
                Some(Event::MapNotify(e)) if e.window == window => return Ok(()),
                Some(event) => {
                    if let Some(input) = self.translate(event) {
                        self.pending.push_back(input);
                    }
                }
                None => {
                    if Instant::now() >= deadline {
                        return Err(WindowError::WindowCreation(
                            "window was not mapped within 5 seconds".to_string(),
                        ));
                    }
                    std::thread::sleep(MAP_POLL_INTERVAL);
                }
            }
        }
    }

    fn open(&mut self, config: &WindowConfig) -> Result<Window, WindowError> {
        let (conn, screen_num) = x11rb::connect(config.display.as_deref())
            .map_err(|e| WindowError::DisplayConnection(e.to_string()))?;

        let setup = conn.setup();
        let screen = setup
            .roots
            .get(screen_num)
            .ok_or_else(|| WindowError::DisplayConnection(format!("no screen {}", screen_num)))?;
        let (root, black_pixel) = (screen.root, screen.black_pixel);
        let screen_size = Dimensions::new(
            u32::from(screen.width_in_pixels),
            u32::from(screen.height_in_pixels),
        );
        let (min_keycode, max_keycode) = (setup.min_keycode, setup.max_keycode);

        let atoms = Atoms::new(&conn)
            .map_err(creation_error)?
            .reply()
            .map_err(creation_error)?;

        let mapping = conn
            .get_keyboard_mapping(min_keycode, max_keycode - min_keycode + 1)
            .map_err(creation_error)?
            .reply()
            .map_err(creation_error)?;
        self.keyboard = KeyboardMap::new(min_keycode, mapping.keysyms_per_keycode, mapping.keysyms);

        let (x, y, size) = window_geometry(config, screen_size);
        if config.fullscreen {
            info!("Fullscreen window covers the screen at {}", size);
        }
        let width = u16::try_from(size.width).map_err(creation_error)?;
        let height = u16::try_from(size.height).map_err(creation_error)?;
        let x = i16::try_from(x).map_err(creation_error)?;
        let y = i16::try_from(y).map_err(creation_error)?;

        let window = conn.generate_id().map_err(creation_error)?;
        let aux = CreateWindowAux::new().background_pixel(black_pixel).event_mask(
            EventMask::KEY_PRESS
                | EventMask::BUTTON_PRESS
                | EventMask::POINTER_MOTION
                | EventMask::STRUCTURE_NOTIFY
                | EventMask::EXPOSURE,
        );
        conn.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            window,
            root,
            x,
            y,
            width,
            height,
            0,
            WindowClass::INPUT_OUTPUT,
            x11rb::COPY_FROM_PARENT,
            &aux,
        )
        .map_err(creation_error)?;

        conn.change_property8(
            PropMode::REPLACE,
            window,
            AtomEnum::WM_NAME,
            AtomEnum::STRING,
            config.title.as_bytes(),
        )
        .map_err(creation_error)?;
        conn.change_property8(
            PropMode::REPLACE,
            window,
            atoms._NET_WM_NAME,
            atoms.UTF8_STRING,
            config.title.as_bytes(),
        )
        .map_err(creation_error)?;
        conn.change_property8(
            PropMode::REPLACE,
            window,
            AtomEnum::WM_CLASS,
            AtomEnum::STRING,
            WM_CLASS,
        )
        .map_err(creation_error)?;
        conn.change_property32(
            PropMode::REPLACE,
            window,
            atoms.WM_PROTOCOLS,
            AtomEnum::ATOM,
            &[atoms.WM_DELETE_WINDOW],
        )
        .map_err(creation_error)?;

        if !config.fullscreen {
            // Fixed size: the compositor output does not follow the window
            let (w, h) = (size.width as i32, size.height as i32);
            let mut hints = WmSizeHints::new();
            hints.position = Some((WmSizeHintsSpecification::UserSpecified, config.x, config.y));
            hints.size = Some((WmSizeHintsSpecification::UserSpecified, w, h));
            hints.min_size = Some((w, h));
            hints.max_size = Some((w, h));
            hints.set_normal_hints(&conn, window).map_err(creation_error)?;
        } else {
            conn.change_property32(
                PropMode::REPLACE,
                window,
                atoms._NET_WM_STATE,
                AtomEnum::ATOM,
                &[atoms._NET_WM_STATE_FULLSCREEN],
            )
            .map_err(creation_error)?;
        }

        conn.map_window(window).map_err(creation_error)?;
        conn.flush().map_err(creation_error)?;

        self.conn = Some(conn);
        self.atoms = Some(atoms);
        self.window = Some(window);
        Ok(window)
    }
}

/// Position and size of the window to create.
///
/// A fullscreen window is created at the screen size so the geometry read
/// back after mapping does not change when the window manager applies the
/// fullscreen state.
pub fn window_geometry(config: &WindowConfig, screen: Dimensions) -> (i32, i32, Dimensions) {
    if config.fullscreen {
        (0, 0, screen)
    } else {
        (config.x, config.y, Dimensions::new(config.width, config.height))
    }
}

impl WindowHost for X11Host {
    fn create_window(&mut self, config: &WindowConfig) -> Result<WindowHandle, WindowError> {
        if let Some(window) = self.window {
            warn!("Window {} already exists", window);
            return Ok(WindowHandle::new(window as u64));
        }

        let window = match self.open(config) {
            Ok(window) => window,
            Err(err) => {
                self.destroy();
                return Err(err);
            }
        };

        if let Err(err) = self.wait_for_map(window) {
            self.destroy();
            return Err(err);
        }

        let geometry = self
            .conn
            .as_ref()
            .ok_or_else(|| creation_error("no connection"))
            .and_then(|conn| {
                conn.get_geometry(window)
                    .map_err(creation_error)?
                    .reply()
                    .map_err(creation_error)
            });
        match geometry {
            Ok(geometry) => {
                self.size = Some(Dimensions::new(geometry.width as u32, geometry.height as u32));
            }
            Err(err) => {
                self.destroy();
                return Err(err);
            }
        }

        let handle = WindowHandle::new(window as u64);
        info!(
            "Created window {} '{}' at {},{} size {:?}",
            handle, config.title, config.x, config.y, self.size
        );
        Ok(handle)
    }

    fn poll_events(&mut self) -> Result<Vec<InputEvent>, WindowError> {
        let mut events: Vec<InputEvent> = self.pending.drain(..).collect();
        loop {
            let event = {
                let Some(conn) = self.conn.as_ref() else {
                    return Ok(events);
                };
                conn.poll_for_event().map_err(connection_lost)?
            };
            let Some(event) = event else {
                break;
            };
            if let Some(input) = self.translate(event) {
                if let InputEvent::ConfigureNotify { width, height } = input {
                    self.size = Some(Dimensions::new(width, height));
                }
                events.push(input);
            }
        }
        Ok(events)
    }

    fn size(&self) -> Option<Dimensions> {
        self.size
    }

    fn destroy(&mut self) {
        if let (Some(conn), Some(window)) = (self.conn.as_ref(), self.window.take()) {
            if let Err(err) = conn.destroy_window(window) {
                warn!("Failed to destroy window {}: {}", window, err);
            }
            let _ = conn.flush();
            info!("Destroyed window 0x{:x}", window);
        }
        self.conn = None;
        self.atoms = None;
        self.size = None;
        self.pending.clear();
    }
}

impl Drop for X11Host {
    fn drop(&mut self) {
        self.destroy();
    }
}
