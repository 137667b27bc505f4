// SPDX-License-Identifier: CEPL-1.0
//! Window-system glue: winit re-export plus the mapping from winit input to
//! engine input and key commands.
pub use winit;

use shadebox_render::{InputEvent, MouseButton};
use tracing::trace;
use winit::dpi::PhysicalPosition;
use winit::event::{ElementState, MouseScrollDelta, WindowEvent};
use winit::keyboard::{Key, NamedKey};

/// Pixel-precise wheels (touchpads) report pixels; this many make one line.
pub const PIXELS_PER_LINE: f64 = 20.0;

pub fn map_button(button: winit::event::MouseButton) -> Option<MouseButton> {
    use winit::event::MouseButton as W;
    match button {
        W::Left => Some(MouseButton::Left),
        W::Right => Some(MouseButton::Right),
        W::Middle => Some(MouseButton::Middle),
        W::Back => Some(MouseButton::Back),
        W::Forward => Some(MouseButton::Forward),
        W::Other(_) => None,
    }
}

/// Wheel movement in lines.
pub fn wheel_lines(delta: MouseScrollDelta) -> (f32, f32) {
    match delta {
        MouseScrollDelta::LineDelta(x, y) => (x, y),
        MouseScrollDelta::PixelDelta(p) => {
            ((p.x / PIXELS_PER_LINE) as f32, (p.y / PIXELS_PER_LINE) as f32)
        }
    }
}

pub fn logical_cursor(position: PhysicalPosition<f64>, scale_factor: f64) -> InputEvent {
    let logical = position.to_logical::<f32>(scale_factor);
    InputEvent::CursorMoved {
        x: logical.x,
        y: logical.y,
    }
}

/// Pointer input the uniform block cares about; everything else is `None`.
pub fn translate(event: &WindowEvent, scale_factor: f64) -> Option<InputEvent> {
    match event {
        WindowEvent::CursorMoved { position, .. } => Some(logical_cursor(*position, scale_factor)),
        WindowEvent::MouseInput { state, button, .. } => {
            let Some(button) = map_button(*button) else {
                trace!("ignoring mouse button {button:?}");
                return None;
            };
            Some(InputEvent::Button {
                button,
                pressed: *state == ElementState::Pressed,
            })
        }
        WindowEvent::MouseWheel { delta, .. } => {
            let (dx, dy) = wheel_lines(*delta);
            Some(InputEvent::Scroll { dx, dy })
        }
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Quit,
    ToggleFullscreen,
    NextShader,
    PrevShader,
    ResetScroll,
    ScrollUp,
    ScrollDown,
}

impl Command {
    pub fn from_key(key: &Key) -> Option<Self> {
        match key {
            Key::Named(NamedKey::Escape) => Some(Command::Quit),
            Key::Named(NamedKey::F11) => Some(Command::ToggleFullscreen),
            Key::Named(NamedKey::ArrowRight) => Some(Command::NextShader),
            Key::Named(NamedKey::ArrowLeft) => Some(Command::PrevShader),
            Key::Character(c) => match c.as_str() {
                "f" | "F" => Some(Command::ToggleFullscreen),
                "r" | "R" => Some(Command::ResetScroll),
                "=" | "+" => Some(Command::ScrollUp),
                "-" => Some(Command::ScrollDown),
                _ => None,
            },
            _ => None,
        }
    }

    /// The scroll commands act on the uniform state directly.
    pub fn input_event(self) -> Option<InputEvent> {
        match self {
            Command::ResetScroll => Some(InputEvent::ResetScroll),
            Command::ScrollUp => Some(InputEvent::Scroll { dx: 0.0, dy: 1.0 }),
            Command::ScrollDown => Some(InputEvent::Scroll { dx: 0.0, dy: -1.0 }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buttons_map_to_the_five_tracked_ones() {
        use winit::event::MouseButton as W;
        assert_eq!(map_button(W::Left), Some(MouseButton::Left));
        assert_eq!(map_button(W::Middle), Some(MouseButton::Middle));
        assert_eq!(map_button(W::Forward), Some(MouseButton::Forward));
        assert_eq!(map_button(W::Other(7)), None);
    }

    #[test]
    fn pixel_wheel_converts_at_twenty_per_line() {
        assert_eq!(wheel_lines(MouseScrollDelta::LineDelta(0.0, -2.0)), (0.0, -2.0));
        let px = MouseScrollDelta::PixelDelta(PhysicalPosition::new(10.0, 60.0));
        assert_eq!(wheel_lines(px), (0.5, 3.0));
    }

    #[test]
    fn cursor_is_reported_in_logical_units() {
        let ev = logical_cursor(PhysicalPosition::new(200.0, 100.0), 2.0);
        assert_eq!(ev, InputEvent::CursorMoved { x: 100.0, y: 50.0 });
    }

    #[test]
    fn key_bindings() {
        let ch = |s: &str| Key::Character(s.into());
        assert_eq!(Command::from_key(&Key::Named(NamedKey::Escape)), Some(Command::Quit));
        assert_eq!(Command::from_key(&Key::Named(NamedKey::F11)), Some(Command::ToggleFullscreen));
        assert_eq!(Command::from_key(&ch("f")), Some(Command::ToggleFullscreen));
        assert_eq!(Command::from_key(&Key::Named(NamedKey::ArrowLeft)), Some(Command::PrevShader));
        assert_eq!(Command::from_key(&Key::Named(NamedKey::ArrowRight)), Some(Command::NextShader));
        assert_eq!(Command::from_key(&ch("R")), Some(Command::ResetScroll));
        assert_eq!(Command::from_key(&ch("+")), Some(Command::ScrollUp));
        assert_eq!(Command::from_key(&ch("-")), Some(Command::ScrollDown));
        assert_eq!(Command::from_key(&ch("x")), None);
    }

    #[test]
    fn scroll_commands_become_input() {
        assert_eq!(
            Command::ScrollDown.input_event(),
            Some(InputEvent::Scroll { dx: 0.0, dy: -1.0 })
        );
        assert_eq!(Command::ResetScroll.input_event(), Some(InputEvent::ResetScroll));
        assert_eq!(Command::Quit.input_event(), None);
    }
}
