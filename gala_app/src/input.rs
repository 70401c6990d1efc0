//! Keyboard and mouse mapping for the fly camera

use gala_engine::render::vulkan::window::{Key, Window};
use gala_engine::scene::CameraInput;

/// Signed axis from a pair of opposing keys
fn axis(window: &Window, positive: Key, negative: Key) -> f32 {
    f32::from(u8::from(window.is_key_down(positive))) - f32::from(u8::from(window.is_key_down(negative)))
}

/// Sample held keys and mouse motion since the previous frame.
///
/// WASD moves along the ground plane, Q/E sink and rise. Mouse travel is
/// measured in window heights so look speed does not depend on resolution.
pub fn sample(window: &mut Window) -> CameraInput {
    let (dx, dy) = window.take_cursor_delta();
    let (_, height) = window.get_size();
    let height = f64::from(height.max(1));

    CameraInput {
        right: axis(window, Key::D, Key::A),
        forward: axis(window, Key::W, Key::S),
        up: axis(window, Key::E, Key::Q),
        look_x: (dx / height) as f32,
        // Screen y grows downward
        look_y: (-dy / height) as f32,
    }
}
