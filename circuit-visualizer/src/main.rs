use anyhow::{Context, Result};
use circuit_common::{CircuitConfig, CircuitLayout, Lane, Snapshot};
use clap::Parser;
use dashmap::DashMap;
use env_logger::Builder;
use image::{ImageBuffer, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_circle_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn, LevelFilter};
use minimp4::Mp4Muxer;
use openh264::encoder::{BitRate, Encoder, EncoderConfig, FrameRate};
use openh264::formats::YUVBuffer;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Command-line arguments for the visualizer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input snapshot stream (.bin, written with format = "bincode")
    #[arg(short, long)]
    input: PathBuf,

    /// Circuit configuration the snapshots were recorded with (lane paths, sensor, view size)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Output video file path (.mp4)
    #[arg(short, long, default_value = "circuit_video.mp4")]
    output: PathBuf,

    /// Width of the output video in pixels
    #[arg(long, default_value_t = 1024)]
    width: u32,

    /// Height of the output video in pixels (calculated from the view aspect ratio if not provided)
    #[arg(long)]
    height: Option<u32>,

    /// Frames per second for the output video
    #[arg(long, default_value_t = 10)]
    fps: u32,

    /// Background color name (black, white, grey, ...)
    #[arg(long, default_value = "white")]
    bg_color: String,

    /// Chunk size for parallel processing
    #[arg(long, default_value_t = 10)]
    chunk_size: usize,
}

// Color definitions for named colors (RGBA format)
const COLOR_MAP: &[(&str, [u8; 4])] = &[
    ("black", [0, 0, 0, 255]),
    ("white", [255, 255, 255, 255]),
    ("grey", [128, 128, 128, 255]),
    ("lightgrey", [220, 220, 220, 255]),
    ("navy", [0, 0, 64, 255]),
];

const VENOUS_STROKE: Rgba<u8> = Rgba([62, 48, 192, 255]);
const ARTERIAL_STROKE: Rgba<u8> = Rgba([192, 48, 48, 255]);
const SENSOR_STROKE: Rgba<u8> = Rgba([242, 160, 24, 255]);
const BUBBLE_OUTLINE: Rgba<u8> = Rgba([0, 0, 0, 255]);
const ALARM_BANNER: Rgba<u8> = Rgba([220, 0, 0, 255]);

/// Particle radii in drawing units.
const PARTICLE_RADIUS: f32 = 3.0;
const BUBBLE_RADIUS: f32 = 4.0;

// Struct to represent a video frame
struct Frame {
    index: usize,
    image: RgbaImage,
}

/// Parse a color name to RGBA values
fn parse_color(color_name: &str) -> [u8; 4] {
    for &(name, color) in COLOR_MAP {
        if name.eq_ignore_ascii_case(color_name) {
            return color;
        }
    }
    warn!("Color '{}' not recognized, using white.", color_name);
    [255, 255, 255, 255]
}

/// Output size in pixels. H.264 needs even dimensions, so both are rounded down to even.
fn output_dimensions(width: u32, height: Option<u32>, view_width: f64, view_height: f64) -> (u32, u32) {
    let height = height.unwrap_or_else(|| (width as f64 * view_height / view_width) as u32);
    ((width & !1).max(2), (height & !1).max(2))
}

/// The static part of every frame, precomputed in pixel space.
struct Scene {
    width: u32,
    height: u32,
    pixels_per_unit: f32,
    bg_color: Rgba<u8>,
    lanes: Vec<(Lane, Vec<(f32, f32)>)>,
    sensor_center: (i32, i32),
    sensor_radius: i32,
}

impl Scene {
    fn new(layout: &CircuitLayout, view_width: f64, view_height: f64, width: u32, height: u32, bg_color: [u8; 4]) -> Self {
        let scale_x = width as f32 / view_width as f32;
        let scale_y = height as f32 / view_height as f32;
        let pixels_per_unit = scale_x.min(scale_y); // Use smaller scale to ensure everything fits

        let lanes = layout
            .lanes
            .iter()
            .map(|(lane, geometry)| {
                let points = geometry
                    .vertices()
                    .iter()
                    .map(|v| (v.x as f32 * pixels_per_unit, v.y as f32 * pixels_per_unit))
                    .collect();
                (*lane, points)
            })
            .collect();

        let sensor = layout.sensor;
        Scene {
            width,
            height,
            pixels_per_unit,
            bg_color: Rgba(bg_color),
            lanes,
            sensor_center: (
                (sensor.center.x as f32 * pixels_per_unit).round() as i32,
                (sensor.center.y as f32 * pixels_per_unit).round() as i32,
            ),
            sensor_radius: ((sensor.radius as f32 * pixels_per_unit).round() as i32).max(1),
        }
    }

    fn to_pixel(&self, x: f64, y: f64) -> (i32, i32) {
        (
            (x as f32 * self.pixels_per_unit).round() as i32,
            (y as f32 * self.pixels_per_unit).round() as i32,
        )
    }
}

/// Draw one recorded frame: lanes, sensor, particles, and the alarm banner while latched.
fn draw_frame(scene: &Scene, snapshot: &Snapshot, frame_index: usize) -> Frame {
    let mut image = ImageBuffer::from_pixel(scene.width, scene.height, scene.bg_color);

    for (lane, points) in &scene.lanes {
        let stroke = if *lane == Lane::ArterialLine { ARTERIAL_STROKE } else { VENOUS_STROKE };
        for pair in points.windows(2) {
            draw_line_segment_mut(&mut image, pair[0], pair[1], stroke);
        }
    }
    draw_hollow_circle_mut(&mut image, scene.sensor_center, scene.sensor_radius, SENSOR_STROKE);

    let particle_px = ((PARTICLE_RADIUS * scene.pixels_per_unit).round() as i32).max(1);
    let bubble_px = ((BUBBLE_RADIUS * scene.pixels_per_unit).round() as i32).max(1);
    for particle in &snapshot.particles {
        let center = scene.to_pixel(particle.x, particle.y);
        let color = Rgba(particle.color.to_rgba());
        if particle.is_bubble {
            draw_filled_circle_mut(&mut image, center, bubble_px, color);
            draw_hollow_circle_mut(&mut image, center, bubble_px, BUBBLE_OUTLINE);
        } else {
            draw_filled_circle_mut(&mut image, center, particle_px, color);
        }
    }

    if snapshot.alarm {
        let banner_height = (scene.height / 16).max(2);
        draw_filled_rect_mut(&mut image, Rect::at(0, 0).of_size(scene.width, banner_height), ALARM_BANNER);
    }

    Frame { index: frame_index, image }
}

/// RGB to YUV 4:2:0 conversion (BT.601) for video encoding. Dimensions must be even.
fn rgb_to_yuv420(image: &RgbaImage) -> Vec<u8> {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let y_size = width * height;
    let uv_width = width / 2;
    let uv_size = uv_width * (height / 2);
    let mut yuv = vec![0u8; y_size + 2 * uv_size];

    let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
    y_plane.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        for (x, out) in row.iter_mut().enumerate() {
            let p = image.get_pixel(x as u32, y as u32);
            let (r, g, b) = (p[0] as f32, p[1] as f32, p[2] as f32);
            *out = (0.299 * r + 0.587 * g + 0.114 * b).round() as u8;
        }
    });

    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);
    u_plane
        .par_chunks_mut(uv_width)
        .zip(v_plane.par_chunks_mut(uv_width))
        .enumerate()
        .for_each(|(by, (u_row, v_row))| {
            for bx in 0..uv_width {
                let mut sum_u = 0f32;
                let mut sum_v = 0f32;
                // Average the 2x2 block
                for dy in 0..2 {
                    for dx in 0..2 {
                        let p = image.get_pixel((2 * bx + dx) as u32, (2 * by + dy) as u32);
                        let (r, g, b) = (p[0] as f32, p[1] as f32, p[2] as f32);
                        sum_u += -0.169 * r - 0.331 * g + 0.5 * b + 128.0;
                        sum_v += 0.5 * r - 0.419 * g - 0.081 * b + 128.0;
                    }
                }
                u_row[bx] = (sum_u / 4.0).round().clamp(0.0, 255.0) as u8;
                v_row[bx] = (sum_v / 4.0).round().clamp(0.0, 255.0) as u8;
            }
        });

    yuv
}

/// Reads the `u32` count header followed by that many snapshots.
fn read_snapshots(path: &Path) -> Result<Vec<Snapshot>> {
    let input_file = File::open(path).with_context(|| format!("Failed to open input file: {}", path.display()))?;
    let mut reader = BufReader::new(input_file);

    let snapshot_count: u32 =
        bincode::deserialize_from(&mut reader).context("Failed to read snapshot count from header")?;
    info!("Found {} snapshots in the file", snapshot_count);

    let mut snapshots = Vec::with_capacity(snapshot_count as usize);
    for i in 0..snapshot_count {
        match bincode::deserialize_from::<_, Snapshot>(&mut reader) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(e) => {
                error!("Error deserializing snapshot {}: {}. Keeping the {} read so far.", i, e, snapshots.len());
                break;
            }
        }
    }
    Ok(snapshots)
}

fn progress_bar(len: u64, template: &str) -> Result<ProgressBar> {
    let bar = ProgressBar::new(len);
    bar.set_style(ProgressStyle::default_bar().template(template)?.progress_chars("#>-"));
    Ok(bar)
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    run_with_args(args)
}

fn run_with_args(args: Args) -> Result<()> {
    // Initialize logger
    Builder::from_default_env().filter(None, LevelFilter::Info).init();

    info!("Starting Circuit Visualizer...");
    info!("Input file: {}", args.input.display());
    info!("Output video: {}", args.output.display());

    // --- Circuit geometry ---
    let config = CircuitConfig::load(&args.config)?;
    let layout = config.build_layout().context("Invalid circuit geometry in config")?;
    let (width, height) = output_dimensions(args.width, args.height, config.view.width, config.view.height);
    let scene = Scene::new(&layout, config.view.width, config.view.height, width, height, parse_color(&args.bg_color));
    info!(
        "Drawing {} lanes at {}x{} px ({:.3} px per unit), {} fps.",
        scene.lanes.len(),
        width,
        height,
        scene.pixels_per_unit,
        args.fps
    );

    // --- Snapshots ---
    let snapshots = read_snapshots(&args.input)?;
    if snapshots.is_empty() {
        warn!("Input file contains no snapshots. Exiting.");
        return Ok(());
    }
    let alarm_frames = snapshots.iter().filter(|s| s.alarm).count();
    info!(
        "Snapshots span {:.2} s to {:.2} s; alarm latched in {} of {} frames.",
        snapshots[0].time,
        snapshots[snapshots.len() - 1].time,
        alarm_frames,
        snapshots.len()
    );

    let start_time = Instant::now();

    // --- Draw frames in parallel ---
    let draw_progress = progress_bar(
        snapshots.len() as u64,
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} frames ({percent}%) [{eta}]",
    )?;
    let frames_map: Arc<DashMap<usize, RgbaImage>> = Arc::new(DashMap::new());
    let chunk_size = args.chunk_size.max(1);
    snapshots.par_chunks(chunk_size).enumerate().for_each(|(chunk_idx, chunk)| {
        for (i, snapshot) in chunk.iter().enumerate() {
            let frame = draw_frame(&scene, snapshot, chunk_idx * chunk_size + i);
            frames_map.insert(frame.index, frame.image);
        }
        draw_progress.inc(chunk.len() as u64);
    });
    draw_progress.finish_with_message("Frames drawn");

    // --- Encode in order ---
    info!("Encoding frames in sequence...");
    let mut encoder = Encoder::with_api_config(
        openh264::OpenH264API::from_source(),
        EncoderConfig::new()
            .max_frame_rate(FrameRate::from_hz(args.fps as f32))
            .bitrate(BitRate::from_bps(5_000_000)), // 5 Mbps
    )
    .context("Failed to initialize H.264 encoder")?;

    let encode_progress = progress_bar(
        frames_map.len() as u64,
        "[{elapsed_precise}] [{bar:40.green/blue}] {pos}/{len} encoded ({percent}%) [{eta}]",
    )?;

    let mut sorted_keys: Vec<usize> = frames_map.iter().map(|entry| *entry.key()).collect();
    sorted_keys.sort_unstable();

    const ENCODE_BATCH_SIZE: usize = 30;
    let mut h264_data = Vec::new();
    let mut frame_count = 0;
    for batch in sorted_keys.chunks(ENCODE_BATCH_SIZE) {
        // Convert the batch to YUV in parallel, then encode sequentially to keep frame order.
        let yuv_frames: Vec<(usize, Vec<u8>)> = batch
            .par_iter()
            .filter_map(|&key| frames_map.remove(&key).map(|(_, image)| (key, rgb_to_yuv420(&image))))
            .collect();

        for (key, yuv_data) in yuv_frames {
            let yuv_source = YUVBuffer::from_vec(yuv_data, width as usize, height as usize);
            match encoder.encode(&yuv_source) {
                Ok(bitstream) => {
                    bitstream.write_vec(&mut h264_data);
                    frame_count += 1;
                }
                Err(e) => error!("Error encoding frame {}: {}", key, e),
            }
            encode_progress.inc(1);
        }
    }
    encode_progress.finish_with_message(format!("Encoded {} frames successfully", frame_count));

    // --- Mux MP4 ---
    info!("Creating MP4 file...");
    let mut video_buffer = Cursor::new(Vec::new());
    let mut mp4muxer = Mp4Muxer::new(&mut video_buffer);
    let video_description = format!("Circuit flow simulation - {} frames", frame_count);
    mp4muxer.init_video(width as i32, height as i32, false, &video_description);
    mp4muxer.write_video(&h264_data);
    mp4muxer.close();

    video_buffer.seek(SeekFrom::Start(0))?;
    let mut video_bytes = Vec::new();
    video_buffer.read_to_end(&mut video_bytes)?;
    fs::write(&args.output, &video_bytes)
        .with_context(|| format!("Failed to write video file to {}", args.output.display()))?;

    let duration = start_time.elapsed();
    info!(
        "Video generation completed in {:.2?} ({:.1} frames per second)",
        duration,
        frame_count as f64 / duration.as_secs_f64()
    );
    info!("Output saved to: {}", args.output.display());

    Ok(())
}
