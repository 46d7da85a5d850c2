//! Headless fly-over across a grid of procedurally generated terrain cells.
//!
//! Usage:
//!   cargo run --release --bin terrain_lod_demo -- --cells 4 --grid 257 --frames 300
//!   cargo run --release --bin terrain_lod_demo -- --config renderer.json --gpu
//!
//! Options:
//!   --cells N          cells per side (default 3)
//!   --grid N           samples per cell side, R * 2^k + 1 (default 129)
//!   --cell-size F      world units per cell side (default 256)
//!   --frames N         frames to simulate (default 240)
//!   --seed N           noise seed (default 12345)
//!   --terrain PATH     load terrain noise parameters JSON (overrides --seed)
//!   --config PATH      load renderer config JSON
//!   --save-config PATH write the effective renderer config JSON and exit
//!   --alpha-map PATH   image used as an alpha-mapped layer on every cell
//!   --gpu              upload geometry and textures through wgpu each frame

use std::path::PathBuf;
use std::time::Instant;

use terrablock::core::camera::Camera;
use terrablock::core::logging;
use terrablock::core::types::{Mat4, Result, Vec2, Vec3};
use terrablock::render::buffer::{TerrainUniform, TerrainUniformBuffer};
use terrablock::render::context::GpuContext;
use terrablock::render::material::MaterialId;
use terrablock::render::renderer::{BruteBlockRenderer, RendererConfig, TerrainRenderer};
use terrablock::render::upload::TerrainGpuCache;
use terrablock::terrain::cell::{CellId, GridRect, TerrainCell};
use terrablock::terrain::generator::{TerrainGenerator, TerrainParams};
use terrablock::terrain::heightfield::HeightfieldCell;

const BASE_MATERIAL: MaterialId = MaterialId(1);
const PALETTE: [MaterialId; 3] = [MaterialId(10), MaterialId(11), MaterialId(12)];
const ALPHA_MAP_MATERIAL: MaterialId = MaterialId(20);

fn arg_value<T: std::str::FromStr>(args: &[String], name: &str, default: T) -> T {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn arg_path(args: &[String], name: &str) -> Option<PathBuf> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
}

/// Palette index per sample from height bands: low, mid, high
fn material_map(cell: &HeightfieldCell, height_scale: f32) -> Vec<u8> {
    cell.heights()
        .iter()
        .map(|&h| {
            let t = h / height_scale;
            if t < 0.35 {
                0
            } else if t < 0.65 {
                1
            } else {
                2
            }
        })
        .collect()
}

fn main() -> Result<()> {
    logging::init_with_timestamps();
    let args: Vec<String> = std::env::args().collect();

    let cells_per_side: u32 = arg_value(&args, "--cells", 3);
    let grid: usize = arg_value(&args, "--grid", 129);
    let cell_size: f32 = arg_value(&args, "--cell-size", 256.0);
    let frames: u32 = arg_value(&args, "--frames", 240);
    let seed: u32 = arg_value(&args, "--seed", 12345);
    let use_gpu = args.iter().any(|a| a == "--gpu");

    let config = match arg_path(&args, "--config") {
        Some(path) => {
            log::info!("Loading renderer config from {}", path.display());
            RendererConfig::load_json(&path)?
        }
        None => RendererConfig::default(),
    };
    if let Some(path) = arg_path(&args, "--save-config") {
        config.save_json(&path)?;
        log::info!("Wrote renderer config to {}", path.display());
        return Ok(());
    }

    let params = match arg_path(&args, "--terrain") {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(&path)?)?,
        None => TerrainParams { seed, ..Default::default() },
    };
    let height_scale = params.height_scale;
    let generator = TerrainGenerator::new(params);
    let mut renderer = BruteBlockRenderer::new(config);
    renderer.on_material_palette_update(&PALETTE);

    let alpha_map = match arg_path(&args, "--alpha-map") {
        Some(path) => Some(image::open(&path)?),
        None => None,
    };

    let start = Instant::now();
    let mut cells = Vec::new();
    for z in 0..cells_per_side {
        for x in 0..cells_per_side {
            let id = CellId(z * cells_per_side + x);
            let origin = Vec2::new(x as f32 * cell_size, z as f32 * cell_size);
            let mut cell = HeightfieldCell::new(id, grid, origin, Vec3::new(cell_size, height_scale, cell_size));
            cell.set_properties(renderer.create_properties());
            cell.set_base_material(Some(BASE_MATERIAL));
            cell.generate(&generator);

            renderer.on_cell_load(&cell);
            let map = material_map(&cell, height_scale);
            renderer.on_material_map_update(&cell, GridRect::full(grid, grid), &map, grid);
            if let Some(image) = &alpha_map {
                renderer.on_alpha_map_update(&cell, ALPHA_MAP_MATERIAL, image);
            }
            cells.push(cell);
        }
    }
    log::info!(
        "Generated {} cells of {}x{} samples in {:.1}ms",
        cells.len(),
        grid,
        grid,
        start.elapsed().as_secs_f64() * 1000.0
    );

    let mut gpu = if use_gpu {
        let context = GpuContext::new_headless_blocking()?;
        let uniform = TerrainUniformBuffer::new(&context.device);
        Some((context, TerrainGpuCache::new(), uniform))
    } else {
        None
    };

    let extent = cells_per_side as f32 * cell_size;
    let cell_refs: Vec<&dyn TerrainCell> = cells.iter().map(|c| c as &dyn TerrainCell).collect();
    let mut total_meshes = 0usize;
    let mut peak_leaves = 0usize;
    let frame_start = Instant::now();

    for frame in 0..frames {
        // Diagonal pass low over the terrain, looking ahead and down
        let t = frame as f32 / frames.max(1) as f32;
        let position = Vec3::new(extent * t, height_scale * 1.5, extent * t);
        let target = position + Vec3::new(cell_size * 0.5, -height_scale, cell_size * 0.5);
        let camera = Camera::look_at(position, target, Vec3::Y);
        let frustum = camera.frustum();

        let meshes = renderer.get_render_meshes(&frustum, &camera, Mat4::IDENTITY, &cell_refs);
        total_meshes += meshes.len();

        if let Some((context, cache, uniform)) = gpu.as_mut() {
            cache.prepare(&context.device, meshes);
            if let Some(first) = meshes.first() {
                uniform.update(&context.queue, &TerrainUniform::for_mesh(&camera, first));
            }
        }

        let stats = renderer.stats();
        peak_leaves = peak_leaves.max(stats.leaves);
        if frame % 60 == 0 {
            log::info!(
                "Frame {}: camera ({:.0}, {:.0}, {:.0}), {} nodes, {} leaves, {} meshes",
                frame, position.x, position.y, position.z, stats.nodes, stats.leaves, stats.meshes
            );
        }

        if let Some((context, cache, _)) = gpu.as_mut() {
            let textures: Vec<_> = renderer.cell_contexts().flat_map(|c| c.alpha_textures()).collect();
            cache.sync_textures(&context.device, &context.queue, textures);
            cache.evict();
        }
    }

    let elapsed = frame_start.elapsed().as_secs_f64();
    log::info!(
        "{} frames in {:.1}ms ({:.3}ms/frame), {:.1} meshes/frame, peak {} leaves",
        frames,
        elapsed * 1000.0,
        elapsed * 1000.0 / frames.max(1) as f64,
        total_meshes as f64 / frames.max(1) as f64,
        peak_leaves
    );
    if let Some((_, cache, _)) = &gpu {
        log::info!("{} GPU buffers resident at exit", cache.resident_buffers());
    }

    for cell in &cells {
        renderer.on_cell_unload(cell.id());
    }
    Ok(())
}
