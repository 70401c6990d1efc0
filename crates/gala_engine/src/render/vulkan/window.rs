//! Window management using GLFW
//!
//! Provides the fixed-size window the renderer presents to, keyboard state
//! queries and relative mouse motion for the fly camera.

use thiserror::Error;

pub use glfw::Key;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialized
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// The window could not be created
    #[error("Window creation failed")]
    CreationFailed,

    /// Any other GLFW failure
    #[error("GLFW error: {0}")]
    GlfwError(String),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// GLFW window wrapper with proper resource management
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    last_cursor: Option<(f64, f64)>,
}

impl Window {
    /// Open a non-resizable window with the cursor captured
    pub fn new(title: &str, width: u32, height: u32) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|_| WindowError::InitializationFailed)?;

        // Configure for Vulkan (no OpenGL context)
        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(false));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_cursor_mode(glfw::CursorMode::Disabled);
        if glfw.supports_raw_motion() {
            window.set_raw_mouse_motion(true);
        }

        log::info!("Window created: {width}x{height} '{title}'");
        Ok(Self {
            glfw,
            window,
            events,
            last_cursor: None,
        })
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Request or cancel closing
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Pump the event queue; key state and cursor position update here
    pub fn poll_events(&mut self) {
        self.glfw.poll_events();
        // State is queried directly, the queued events are only drained
        for _ in glfw::flush_messages(&self.events) {}
    }

    /// Whether `key` is currently held
    pub fn is_key_down(&self, key: Key) -> bool {
        matches!(self.window.get_key(key), glfw::Action::Press | glfw::Action::Repeat)
    }

    /// Cursor movement since the previous call, in pixels.
    ///
    /// The first call only records the position and reports no motion.
    pub fn take_cursor_delta(&mut self) -> (f64, f64) {
        let now = self.window.get_cursor_pos();
        let delta = self
            .last_cursor
            .map_or((0.0, 0.0), |(x, y)| (now.0 - x, now.1 - y));
        self.last_cursor = Some(now);
        delta
    }

    /// Window size in screen coordinates
    pub fn get_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_size();
        (width as u32, height as u32)
    }

    /// Framebuffer size in pixels
    pub fn get_framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width as u32, height as u32)
    }

    /// Get required Vulkan instance extensions from GLFW
    pub fn get_required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::GlfwError("Vulkan is not supported by this window system".to_string()))
    }

    /// Create Vulkan surface using GLFW's built-in functionality
    pub fn create_vulkan_surface(&mut self, instance: ash::vk::Instance) -> WindowResult<ash::vk::SurfaceKHR> {
        let mut surface = ash::vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == ash::vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::GlfwError(format!("Failed to create Vulkan surface: {result:?}")))
        }
    }
}
