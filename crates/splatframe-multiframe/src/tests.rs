use crate::*;
use glam::{Mat4, Vec4};

const EDGE: f32 = 0.05;

/// White left of `x = EDGE`, black right of it, sampled at pixel centers
fn render_edge(projection: Mat4, width: u32, height: u32) -> CpuTexture {
    let inverse = projection.inverse();
    CpuTexture::from_fn(width, height, PixelFormat::Rgba8Unorm, |x, _| {
        let ndc_x = (x as f32 + 0.5) / width as f32 * 2.0 - 1.0;
        let world = inverse * Vec4::new(ndc_x, 0.0, 0.0, 1.0);
        if world.x / world.w < EDGE {
            Vec4::ONE
        } else {
            Vec4::new(0.0, 0.0, 0.0, 1.0)
        }
    })
}

fn converge(
    multiframe: &mut Multiframe<CpuDevice>,
    device: &mut CpuDevice,
    base: Mat4,
    width: u32,
    height: u32,
) -> usize {
    let mut frames = 0;
    loop {
        let sub_frame = multiframe.sub_frame(base);
        let source = render_edge(sub_frame.projection, width, height);
        frames += 1;
        if !multiframe.update(device, &source).unwrap() {
            return frames;
        }
    }
}

#[test]
fn test_edge_is_antialiased() {
    let mut device = CpuDevice::default();
    let config = MultiframeConfig::new(SampleConfig::new(4)).with_seed(1);
    let mut multiframe = Multiframe::new(&device, config).unwrap();

    let frames = converge(&mut multiframe, &mut device, Mat4::IDENTITY, 8, 2);
    assert_eq!(frames, 16);
    assert!(multiframe.is_converged());

    let display = device.display().unwrap();
    assert_eq!(display.get(0, 0).x, 1.0);
    assert_eq!(display.get(7, 0).x, 0.0);

    // the pixel right of the edge is covered by a quarter of the samples
    let partial = display.get(4, 1).x;
    assert!(partial > 0.0 && partial < 1.0, "edge pixel is {}", partial);
    let expected = (0.25f32.powf(1.0 / DEFAULT_GAMMA) * 255.0).round() / 255.0;
    assert!((partial - expected).abs() < 2.0 / 255.0);
}

#[test]
fn test_preview_is_unjittered_render() {
    let mut device = CpuDevice::default();
    let mut multiframe =
        Multiframe::new(&device, MultiframeConfig::new(SampleConfig::new(4))).unwrap();

    let sub_frame = multiframe.sub_frame(Mat4::IDENTITY);
    assert_eq!(sub_frame.sample_index, Some(0));
    assert_eq!(sub_frame.projection, Mat4::IDENTITY);
    let source = render_edge(sub_frame.projection, 8, 2);
    multiframe.update(&mut device, &source).unwrap();

    assert_eq!(device.display(), Some(&source));
}

#[test]
fn test_camera_move_restarts_progressive_render() {
    let mut device = CpuDevice::default();
    let config = MultiframeConfig::new(SampleConfig::new(3).with_sigma(0.5)).with_seed(5);
    let mut multiframe = Multiframe::new(&device, config).unwrap();

    converge(&mut multiframe, &mut device, Mat4::IDENTITY, 8, 2);
    let settled = device.draw_calls();

    // a converged accumulator does no more work
    let source = render_edge(Mat4::IDENTITY, 8, 2);
    assert!(!multiframe.update(&mut device, &source).unwrap());
    assert_eq!(device.draw_calls(), settled);

    multiframe.moved();
    let panned = Mat4::from_translation(glam::Vec3::new(0.25, 0.0, 0.0));
    assert_eq!(converge(&mut multiframe, &mut device, panned, 8, 2), 9);
    assert!(device.draw_calls() > settled);
}

#[test]
fn test_jittered_samples_are_reproducible_with_seed() {
    let config = MultiframeConfig::new(SampleConfig::new(3).with_jitter(true)).with_seed(42);
    let device = CpuDevice::default();
    let a = Multiframe::new(&device, config.clone()).unwrap();
    let b = Multiframe::new(&device, config).unwrap();
    assert_eq!(a.samples(), b.samples());
}

#[test]
fn test_config_file_round_trip() {
    let path = std::env::temp_dir().join(format!(
        "splatframe-multiframe-{}.json",
        std::process::id()
    ));
    let config = MultiframeConfig::new(SampleConfig::new(3).with_sigma(0.8))
        .with_weighting(AccumulationWeighting::ConstantAlpha)
        .with_seed(11);
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

    let loaded = MultiframeConfig::load(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(loaded, config);
}

#[test]
fn test_config_file_rejects_invalid_grid() {
    let path = std::env::temp_dir().join(format!(
        "splatframe-multiframe-invalid-{}.json",
        std::process::id()
    ));
    std::fs::write(&path, r#"{ "samples": { "grid_size": 0 } }"#).unwrap();

    let result = MultiframeConfig::load(&path);
    std::fs::remove_file(&path).ok();
    assert!(matches!(result, Err(MultiframeError::InvalidGridSize)));
}

#[test]
fn test_missing_config_file_is_io_error() {
    let result = MultiframeConfig::load("/nonexistent/splatframe.json");
    assert!(matches!(result, Err(MultiframeError::Io(_))));
}
