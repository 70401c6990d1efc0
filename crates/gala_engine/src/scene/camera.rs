//! Fly camera
//!
//! World space is right-handed with +z up. The camera is described by a
//! position, a yaw ("flat" angle about +z, zero looking down +y) and a pitch
//! above the horizon. Projection uses reversed depth (near plane at 1, far
//! plane at 0) and flips y for Vulkan's downward clip-space y axis.

use std::f32::consts::{PI, TAU};

use crate::config::CameraSettings;
use crate::foundation::math::{Mat4, Point3, Vec3};

/// Pitch is kept strictly inside (-pi/2, pi/2) so the view never flips
pub const PITCH_LIMIT: f32 = 0.45 * PI;

/// Movement and look deltas for one frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CameraInput {
    /// +1 strafes right, -1 left
    pub right: f32,
    /// +1 moves forward along the ground plane, -1 back
    pub forward: f32,
    /// +1 rises along +z, -1 sinks
    pub up: f32,
    /// Horizontal look delta in window heights, positive turns right
    pub look_x: f32,
    /// Vertical look delta in window heights, positive looks up
    pub look_y: f32,
}

/// Perspective camera with yaw/pitch orientation
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    position: Vec3,
    yaw: f32,
    pitch: f32,
    fov_y: f32,
    aspect: f32,
    near: f32,
    far: f32,
    move_speed: f32,
    look_speed: f32,
}

impl Camera {
    /// Camera at `position` facing `target`
    pub fn look_at(position: Vec3, target: Vec3, fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        let dir = target - position;
        let yaw = dir.x.atan2(dir.y);
        let pitch = dir.z.atan2(dir.xy().norm()).clamp(-PITCH_LIMIT, PITCH_LIMIT);

        Self {
            position,
            yaw,
            pitch,
            fov_y,
            aspect,
            near,
            far,
            move_speed: 2.0,
            look_speed: 1.0,
        }
    }

    /// Camera configured from settings for a viewport of the given aspect ratio
    pub fn from_settings(settings: &CameraSettings, aspect: f32) -> Self {
        let mut camera = Self::look_at(
            Vec3::from(settings.position),
            Vec3::from(settings.target),
            settings.fov_deg.to_radians(),
            aspect,
            settings.near,
            settings.far,
        );
        camera.move_speed = settings.move_speed;
        camera.look_speed = settings.look_speed;
        camera
    }

    /// Eye position
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Yaw in radians, zero along +y, increasing toward +x
    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    /// Pitch in radians above the horizon
    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    /// Unit view direction
    pub fn forward(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        Vec3::new(cos_pitch * sin_yaw, cos_pitch * cos_yaw, sin_pitch)
    }

    /// Movement basis: right, forward along the ground plane, and up
    pub fn axes(&self) -> (Vec3, Vec3, Vec3) {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let ahead = Vec3::new(sin_yaw, cos_yaw, 0.0);
        let up = Vec3::z();
        (ahead.cross(&up), ahead, up)
    }

    /// World-to-view transform
    pub fn view(&self) -> Mat4 {
        let eye = Point3::from(self.position);
        Mat4::look_at_rh(&eye, &(eye + self.forward()), &Vec3::z())
    }

    /// View-to-clip transform with reversed depth and flipped y
    pub fn projection(&self) -> Mat4 {
        let focal = 1.0 / (self.fov_y * 0.5).tan();
        let depth = self.far - self.near;

        let mut proj = Mat4::zeros();
        proj[(0, 0)] = focal / self.aspect;
        proj[(1, 1)] = -focal;
        proj[(2, 2)] = self.near / depth;
        proj[(2, 3)] = self.near * self.far / depth;
        proj[(3, 2)] = -1.0;
        proj
    }

    /// World-to-clip transform
    pub fn view_projection(&self) -> Mat4 {
        self.projection() * self.view()
    }

    /// Update the viewport aspect ratio
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    /// Move and turn by one frame of input
    pub fn apply_input(&mut self, input: &CameraInput, dt: f32) {
        let (right, ahead, up) = self.axes();
        let step = self.move_speed * dt;
        self.position += right * (input.right * step) + ahead * (input.forward * step) + up * (input.up * step);

        self.yaw = (self.yaw + input.look_x * self.look_speed).rem_euclid(TAU);
        self.pitch = (self.pitch + input.look_y * self.look_speed).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }
}
