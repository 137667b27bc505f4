// SPDX-License-Identifier: CEPL-1.0
//! Per-frame shader inputs.
//!
//! [`UniformState`] is the explicit input context: window events are folded
//! into it with [`UniformState::apply`], and once per frame
//! [`UniformState::snapshot`] turns it into the [`UniformBlock`] that gets
//! copied into the frame slot's uniform buffer.
use crate::RenderSize;
use bytemuck::{Pod, Zeroable};
use glam::Vec2;

pub const BUTTON_COUNT: usize = 5;

/// Host mirror of the binding-0 uniform block.
///
/// Offsets are part of the shader contract; the explicit padding keeps the
/// struct free of implicit gaps so it can be copied as bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct UniformBlock {
    pub resolution: [f32; 3],
    _pad0: f32,
    pub time: f32,
    _pad1: [f32; 3],
    pub mouse: [f32; 4],
    pub scroll: [f32; 2],
    _pad2: [f32; 2],
    pub button_left: f32,
    pub button_right: f32,
    pub button_middle: f32,
    pub button4: f32,
    pub button5: f32,
    _pad3: [f32; 3],
}

impl UniformBlock {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    #[cfg(test)]
    fn buttons(&self) -> [f32; BUTTON_COUNT] {
        [
            self.button_left,
            self.button_right,
            self.button_middle,
            self.button4,
            self.button5,
        ]
    }

    fn set_buttons(&mut self, durations: [f32; BUTTON_COUNT]) {
        [
            self.button_left,
            self.button_right,
            self.button_middle,
            self.button4,
            self.button5,
        ] = durations;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    /// Fourth button, usually "back".
    Back,
    /// Fifth button, usually "forward".
    Forward,
}

impl MouseButton {
    pub const fn index(self) -> usize {
        match self {
            MouseButton::Left => 0,
            MouseButton::Right => 1,
            MouseButton::Middle => 2,
            MouseButton::Back => 3,
            MouseButton::Forward => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputEvent {
    /// Pointer position in logical window coordinates.
    CursorMoved { x: f32, y: f32 },
    Button { button: MouseButton, pressed: bool },
    /// Wheel movement in lines.
    Scroll { dx: f32, dy: f32 },
    ResetScroll,
}

#[derive(Clone, Debug, Default)]
pub struct UniformState {
    cursor: Vec2,
    click: Vec2,
    scroll: Vec2,
    held: [bool; BUTTON_COUNT],
    durations: [f32; BUTTON_COUNT],
    last_time: Option<f32>,
}

impl UniformState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: InputEvent) {
        match event {
            InputEvent::CursorMoved { x, y } => self.cursor = Vec2::new(x, y),
            InputEvent::Button { button, pressed } => {
                let i = button.index();
                if pressed && !self.held[i] {
                    self.durations[i] = 0.0;
                    if button == MouseButton::Left {
                        self.click = self.cursor;
                    }
                }
                self.held[i] = pressed;
            }
            InputEvent::Scroll { dx, dy } => self.scroll += Vec2::new(dx, dy),
            InputEvent::ResetScroll => self.scroll = Vec2::ZERO,
        }
    }

    pub fn scroll(&self) -> Vec2 {
        self.scroll
    }

    pub fn is_held(&self, button: MouseButton) -> bool {
        self.held[button.index()]
    }

    /// Builds the block for a frame rendered at `time` seconds since start.
    ///
    /// Held buttons accumulate the time elapsed since the previous snapshot;
    /// the first snapshot contributes nothing.
    pub fn snapshot(
        &mut self,
        time: f32,
        framebuffer: RenderSize,
        window: RenderSize,
    ) -> UniformBlock {
        let dt = self.last_time.map_or(0.0, |last| (time - last).max(0.0));
        self.last_time = Some(time);
        for (held, duration) in self.held.iter().zip(self.durations.iter_mut()) {
            if *held {
                *duration += dt;
            }
        }

        let fb = Vec2::new(framebuffer.width as f32, framebuffer.height as f32);
        let scale = if window.is_empty() {
            Vec2::ONE
        } else {
            fb / Vec2::new(window.width as f32, window.height as f32)
        };
        let cursor = self.cursor * scale;
        let click = self.click * scale;
        let origin = if self.is_held(MouseButton::Left) {
            click
        } else {
            -click
        };

        let mut block = UniformBlock {
            resolution: [fb.x, fb.y, 1.0],
            time,
            mouse: [cursor.x, cursor.y, origin.x, origin.y],
            scroll: self.scroll.to_array(),
            ..Default::default()
        };
        block.set_buttons(self.durations);
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    const SIZE: RenderSize = RenderSize::new(800, 600);

    fn press(button: MouseButton) -> InputEvent {
        InputEvent::Button {
            button,
            pressed: true,
        }
    }

    fn release(button: MouseButton) -> InputEvent {
        InputEvent::Button {
            button,
            pressed: false,
        }
    }

    #[test]
    fn block_layout_matches_shader_contract() {
        assert_eq!(offset_of!(UniformBlock, resolution), 0);
        assert_eq!(offset_of!(UniformBlock, time), 16);
        assert_eq!(offset_of!(UniformBlock, mouse), 32);
        assert_eq!(offset_of!(UniformBlock, scroll), 48);
        assert_eq!(offset_of!(UniformBlock, button_left), 64);
        assert_eq!(offset_of!(UniformBlock, button_right), 68);
        assert_eq!(offset_of!(UniformBlock, button_middle), 72);
        assert_eq!(offset_of!(UniformBlock, button4), 76);
        assert_eq!(offset_of!(UniformBlock, button5), 80);
        assert_eq!(UniformBlock::SIZE % 16, 0);
        assert_eq!(UniformBlock::SIZE, 96);
    }

    #[test]
    fn mouse_origin_sign_tracks_left_button() {
        let mut s = UniformState::new();
        s.apply(InputEvent::CursorMoved { x: 100.0, y: 100.0 });
        s.apply(press(MouseButton::Left));
        s.apply(InputEvent::CursorMoved { x: 150.0, y: 120.0 });

        let held = s.snapshot(0.0, SIZE, SIZE);
        assert_eq!(held.mouse, [150.0, 120.0, 100.0, 100.0]);

        s.apply(release(MouseButton::Left));
        let released = s.snapshot(0.1, SIZE, SIZE);
        assert_eq!(released.mouse, [150.0, 120.0, -100.0, -100.0]);
    }

    #[test]
    fn mouse_is_scaled_to_framebuffer() {
        let mut s = UniformState::new();
        s.apply(InputEvent::CursorMoved { x: 10.0, y: 20.0 });
        s.apply(press(MouseButton::Left));
        let block = s.snapshot(0.0, RenderSize::new(1600, 1200), SIZE);
        assert_eq!(block.mouse, [20.0, 40.0, 20.0, 40.0]);
        assert_eq!(block.resolution, [1600.0, 1200.0, 1.0]);
    }

    #[test]
    fn hold_duration_freezes_on_release_and_resets_on_press() {
        let mut s = UniformState::new();
        s.snapshot(0.0, SIZE, SIZE);
        s.apply(press(MouseButton::Right));
        s.snapshot(0.0, SIZE, SIZE);
        let a = s.snapshot(0.25, SIZE, SIZE).button_right;
        let b = s.snapshot(0.5, SIZE, SIZE).button_right;
        assert!(a <= b);
        assert_eq!(b, 0.5);

        s.apply(release(MouseButton::Right));
        assert_eq!(s.snapshot(2.0, SIZE, SIZE).button_right, 0.5);
        assert_eq!(s.snapshot(3.0, SIZE, SIZE).button_right, 0.5);

        s.apply(press(MouseButton::Right));
        assert_eq!(s.snapshot(3.0, SIZE, SIZE).button_right, 0.0);
    }

    #[test]
    fn buttons_are_tracked_independently() {
        let mut s = UniformState::new();
        s.snapshot(0.0, SIZE, SIZE);
        s.apply(press(MouseButton::Back));
        s.apply(press(MouseButton::Forward));
        s.snapshot(1.0, SIZE, SIZE);
        s.apply(release(MouseButton::Back));
        let block = s.snapshot(2.0, SIZE, SIZE);
        assert_eq!(block.buttons(), [0.0, 0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn repeated_press_without_release_is_not_a_new_edge() {
        let mut s = UniformState::new();
        s.snapshot(0.0, SIZE, SIZE);
        s.apply(press(MouseButton::Middle));
        s.snapshot(1.0, SIZE, SIZE);
        s.apply(press(MouseButton::Middle));
        assert_eq!(s.snapshot(1.5, SIZE, SIZE).button_middle, 1.5);
    }

    #[test]
    fn scroll_accumulates_until_reset() {
        let mut s = UniformState::new();
        for (dx, dy) in [(1.0, 2.0), (-0.5, 3.0), (0.0, -1.0)] {
            s.apply(InputEvent::Scroll { dx, dy });
        }
        assert_eq!(s.scroll(), Vec2::new(0.5, 4.0));
        assert_eq!(s.snapshot(0.0, SIZE, SIZE).scroll, [0.5, 4.0]);

        s.apply(InputEvent::ResetScroll);
        assert_eq!(s.snapshot(0.1, SIZE, SIZE).scroll, [0.0, 0.0]);

        s.apply(InputEvent::Scroll { dx: 0.0, dy: 1.0 });
        assert_eq!(s.scroll(), Vec2::new(0.0, 1.0));
    }
}
