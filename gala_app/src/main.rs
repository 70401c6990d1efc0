//! Gala demo application
//!
//! Renders a procedurally generated star system of a few thousand bodies
//! with a fly camera. Settings come from `gala.toml` in the working
//! directory when present.

mod input;

use gala_engine::config::{Config, ConfigError, GalaConfig};
use gala_engine::foundation::{logging, time::FrameTimer};
use gala_engine::render::vulkan::window::{Key, Window};
use gala_engine::render::vulkan::{VulkanContext, VulkanError, VulkanSubmitQueue};
use gala_engine::render::OrbitRenderer;
use gala_engine::scene::{Camera, OrbitTree, SceneError, SceneFlattener, LOD_TIERS};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

const CONFIG_PATH: &str = "gala.toml";
const STATS_PERIOD_SECS: f32 = 1.0;

/// Anything that ends the application
#[derive(Error, Debug)]
enum GalaError {
    #[error("Configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Scene: {0}")]
    Scene(#[from] SceneError),

    #[error("Vulkan: {0}")]
    Vulkan(#[from] VulkanError),
}

fn main() {
    logging::init();
    log::info!("Starting Gala");

    if let Err(e) = run() {
        log::error!("{e}");
        std::process::exit(1);
    }
    log::info!("Gala finished successfully");
}

fn run() -> Result<(), GalaError> {
    let config = GalaConfig::load_or_default(CONFIG_PATH)?;
    config.validate()?;

    let mut rng = StdRng::seed_from_u64(config.scene.seed);
    let material_count = config.render.textures.len() as u32;
    let mut tree = OrbitTree::generate(config.scene.body_count, config.scene.height, material_count, &mut rng)?;

    let window_settings = &config.window;
    let mut window = Window::new(&window_settings.title, window_settings.width, window_settings.height)
        .map_err(VulkanError::from)?;
    let context = VulkanContext::new(&mut window, &window_settings.title, config.render.enable_validation)?;

    let resources = VulkanSubmitQueue::arena(&context, "window", 0)?;
    let mut loading = VulkanSubmitQueue::arena(&context, "loading", config.render.loading_slots)?
        .with_wait_timeout(config.render.fence_timeout_ns);
    let mut renderer = OrbitRenderer::new(
        &context,
        resources,
        &mut loading,
        &config.render,
        SceneFlattener::from_settings(&config.scene),
        window.get_framebuffer_size(),
        tree.len().saturating_sub(1),
    )?;
    // Uploads are complete once the loading arena has drained
    loading.teardown()?;
    drop(loading);

    let mut camera = Camera::from_settings(&config.camera, renderer.aspect_ratio());
    let result = run_loop(&mut window, &mut renderer, &mut tree, &mut camera);

    // Reverse creation order; the renderer drains the device first
    let teardown = renderer.teardown();
    drop(renderer);
    drop(context);
    drop(window);

    result?;
    teardown?;
    Ok(())
}

fn run_loop(
    window: &mut Window,
    renderer: &mut OrbitRenderer,
    tree: &mut OrbitTree,
    camera: &mut Camera,
) -> Result<(), GalaError> {
    let mut timer = FrameTimer::new();
    let mut tier_totals = [0_usize; LOD_TIERS];
    let mut reported_frames = 0_u64;

    while !window.should_close() {
        window.poll_events();
        if window.is_key_down(Key::Escape) {
            window.set_should_close(true);
        }

        let dt = timer.delta_time();
        camera.apply_input(&input::sample(window), dt);

        let tiers = renderer.draw_frame(tree, camera, timer.elapsed(), dt)?;
        for (total, count) in tier_totals.iter_mut().zip(tiers) {
            *total += count;
        }
        timer.tick();

        if let Some(average_ms) = timer.take_report(STATS_PERIOD_SECS) {
            let frames = (timer.frame_count() - reported_frames).max(1);
            reported_frames = timer.frame_count();
            let visible = tier_totals.map(|total| total / frames as usize);
            log::info!(
                "{average_ms:.2} ms/frame ({:.0} fps), visible per tier {visible:?}",
                1.0e3 / average_ms
            );
            tier_totals = [0; LOD_TIERS];
        }
    }

    log::info!("Presented {} frames", renderer.frames_presented());
    Ok(())
}
