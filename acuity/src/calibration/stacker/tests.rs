use super::*;
use crate::calibration::frame::FrameHeader;
use crate::testing::noisy_frame;

const WIDTH: usize = 12;
const HEIGHT: usize = 8;
const COVER: usize = 2;

/// Raw frame with `COVER` overscan columns at `overscan` and data `image + overscan`.
fn raw_frame(name: &str, image: &Buffer2<f32>, overscan: f32) -> CcdFrame {
    let data = Buffer2::from_fn(WIDTH, HEIGHT, |x, y| {
        if x < WIDTH - COVER {
            image[(x, y)] + overscan
        } else {
            overscan
        }
    });
    CcdFrame::new(
        data,
        FrameHeader {
            name: name.to_string(),
            object: "Bias".to_string(),
            filter: "B".to_string(),
            cover: COVER,
            datasec: format!("[1:{},1:{}]", WIDTH - COVER, HEIGHT)
                .parse()
                .unwrap(),
        },
    )
}

fn gradient() -> Buffer2<f32> {
    Buffer2::from_fn(WIDTH - COVER, HEIGHT, |x, y| 100.0 + x as f32 * 3.0 + y as f32)
}

#[test]
fn test_identical_bias_frames_return_trimmed_frame() {
    let image = gradient();
    let frames: Vec<CcdFrame> = (0..5)
        .map(|i| raw_frame(&format!("d10{i}"), &image, 500.0 + i as f32))
        .collect();

    let master = stack_frames(&frames, FrameType::Bias, &StackingConfig::default()).unwrap();

    assert_eq!((master.width(), master.height()), (WIDTH - COVER, HEIGHT));
    for (a, b) in master.pixels().iter().zip(image.pixels()) {
        assert!((a - b).abs() < 1e-3, "{a} vs {b}");
    }
}

#[test]
fn test_flat_master_has_unit_mean() {
    let image = gradient();
    let frames: Vec<CcdFrame> = [1.0f32, 2.0, 4.0]
        .iter()
        .enumerate()
        .map(|(i, &level)| {
            let scaled = image.map(|v| v * level);
            raw_frame(&format!("d20{i}"), &scaled, 300.0)
        })
        .collect();

    let master = stack_frames(&frames, FrameType::Flat, &StackingConfig::default()).unwrap();

    let mean = master.iter().map(|&v| v as f64).sum::<f64>() / master.len() as f64;
    assert!((mean - 1.0).abs() < 1e-4, "mean {mean}");

    let image_mean = image.iter().map(|&v| v as f64).sum::<f64>() / image.len() as f64;
    let expected = image[(3, 2)] as f64 / image_mean;
    assert!((master[(3, 2)] as f64 - expected).abs() < 1e-4);
}

#[test]
fn test_outlier_frame_value_is_rejected() {
    let frames: Vec<CcdFrame> = (0..12)
        .map(|i| {
            let image = noisy_frame(WIDTH - COVER, HEIGHT, 200.0, 1.0, i as u64 + 1);
            raw_frame(&format!("d30{i}"), &image, 0.0)
        })
        .collect();
    let mut frames = frames;
    frames[4].data[(5, 3)] += 10_000.0;

    let master = stack_frames(&frames, FrameType::Bias, &StackingConfig::default()).unwrap();

    assert!((master[(5, 3)] - 200.0).abs() < 3.0, "{}", master[(5, 3)]);
}

#[test]
fn test_premasked_values_are_ignored() {
    let image = gradient();
    let mut frames: Vec<CcdFrame> = (0..3)
        .map(|i| raw_frame(&format!("d40{i}"), &image, 0.0))
        .collect();
    frames[0].data[(1, 1)] = 1e6;
    frames[0].mask[(1, 1)] = true;

    let master = stack_frames(&frames, FrameType::Bias, &StackingConfig::default()).unwrap();

    assert!((master[(1, 1)] - image[(1, 1)]).abs() < 1e-3);
}

#[test]
fn test_fully_masked_pixel_uses_unclipped_mean() {
    let image = gradient();
    let mut frames: Vec<CcdFrame> = (0..2)
        .map(|i| raw_frame(&format!("d50{i}"), &image, 0.0))
        .collect();
    frames[0].data[(2, 2)] = 10.0;
    frames[1].data[(2, 2)] = 30.0;
    for frame in &mut frames {
        frame.mask[(2, 2)] = true;
    }

    let master = stack_frames(&frames, FrameType::Bias, &StackingConfig::default()).unwrap();

    assert!((master[(2, 2)] - 20.0).abs() < 1e-4);
}

#[test]
fn test_empty_stack_is_error() {
    let err = stack_frames(&[], FrameType::Flat, &StackingConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::NoFrames {
            frame_type: FrameType::Flat
        }
    ));
}

#[test]
fn test_dimension_mismatch_is_error() {
    let image = gradient();
    let mut frames = vec![
        raw_frame("d601", &image, 0.0),
        raw_frame("d602", &image, 0.0),
    ];
    frames[1].header.datasec = format!("[1:{},1:{}]", WIDTH - COVER - 1, HEIGHT)
        .parse()
        .unwrap();

    let err = stack_frames(&frames, FrameType::Bias, &StackingConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::DimensionMismatch {
            frame_type: FrameType::Bias,
            ref frame,
            ..
        } if frame == "d602"
    ));
}

#[test]
fn test_clip_pixel_stops_when_nothing_changes() {
    let values = [10.0, 10.5, 9.5, 10.2, 9.8, 10.1, 9.9, 10.0, 10.3, 9.7, 50.0];
    let mut keep = [true; 11];

    let rejected = clip_pixel(&values, &mut keep, &StackingConfig::default());

    assert_eq!(rejected, 1);
    assert!(!keep[10]);
    assert!(keep[..10].iter().all(|&k| k));
}
