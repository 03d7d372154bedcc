use super::*;
use crate::psf::catalog::SourceRecord;
use crate::psf::moffat::oriented_axes;
use crate::testing::{init_tracing, moffat_stamp, source};

const WIDTH: usize = 31;

fn elliptical(amplitude: f64, gamma1: f64, gamma2: f64) -> MoffatParams {
    MoffatParams::Elliptical([15.2, 14.9, amplitude, gamma1, gamma2, 0.3, 3.0, 0.0])
}

/// Frame 1: three good sources, one faint, one flagged.
/// Frame 2: two good sources.
fn two_frame_fixture() -> (StampSet, SourceCatalog) {
    let frame1 = vec![
        moffat_stamp(&elliptical(1000.0, 4.5, 3.0), WIDTH),
        moffat_stamp(&elliptical(800.0, 4.5, 3.0), WIDTH),
        moffat_stamp(&elliptical(5.0, 9.0, 9.0), WIDTH),
        Buffer2::new_filled(WIDTH, WIDTH, 1e6),
        moffat_stamp(&elliptical(1200.0, 4.5, 3.0), WIDTH),
    ];
    let frame2 = vec![
        moffat_stamp(&elliptical(900.0, 4.0, 3.2), WIDTH),
        moffat_stamp(&elliptical(600.0, 4.0, 3.2), WIDTH),
    ];
    let catalog = SourceCatalog::new(vec![
        source(1, 0, 10_000.0, 1),
        source(1, 1, 8_000.0, 1),
        source(1, 2, 50.0, 1),
        source(1, 3, 90_000.0, 0),
        source(1, 4, 12_000.0, 1),
        source(2, 0, 9_000.0, 1),
        source(2, 1, 6_000.0, 1),
    ]);
    (StampSet::new(vec![frame1, frame2]), catalog)
}

fn assert_shape(params: &MoffatParams, gamma1: f64, gamma2: f64) {
    let (g1, g2) = params.gammas();
    let (a, b, phi) = oriented_axes(g1, g2, params.phi());
    let (ea, eb, ephi) = oriented_axes(gamma1, gamma2, 0.3);
    assert!((a - ea).abs() < 0.01 * ea, "gamma along phi {a} vs {ea}");
    assert!((b - eb).abs() < 0.01 * eb, "gamma across phi {b} vs {eb}");
    assert!((phi - ephi).abs() < 0.5, "phi {phi} vs {ephi}");
    assert!((params.beta() - 3.0).abs() < 0.03);
}

// ============================================================================
// Stack mode
// ============================================================================

#[test]
fn test_weighted_stack_divides_by_total_flux() {
    let (stamps, catalog) = two_frame_fixture();
    let sources = catalog.select(0, 2.0);
    let stack = weighted_stack(&stamps, 0, &sources).unwrap();

    let expected = Buffer2::from_fn(WIDTH, WIDTH, |x, y| {
        (stamps.frame(0)[0][(x, y)] + stamps.frame(0)[1][(x, y)] + stamps.frame(0)[4][(x, y)])
            / 30_000.0
    });
    for (a, b) in stack.pixels().iter().zip(expected.pixels()) {
        assert!((a - b).abs() < 1e-12);
    }
}

#[test]
fn test_fit_psf_stack_fits_every_frame() {
    init_tracing();
    let (stamps, catalog) = two_frame_fixture();

    let result = fit_psf_stack(&stamps, &catalog, &PsfConfig::default()).unwrap();

    assert_eq!(result.artifact.frame_count(), 2);
    assert_eq!(result.artifact.stacks.len(), 2);
    assert_eq!(result.artifact.models.len(), 2);
    assert_shape(&result.artifact.params[0], 4.5, 3.0);
    assert_shape(&result.artifact.params[1], 4.0, 3.2);
    // Stacked amplitude is Σ amplitude / Σ flux.
    assert!((result.artifact.params[0].amplitude() - 0.1).abs() < 1e-3);
    assert_eq!(result.last.params, result.artifact.params[1]);
}

#[test]
fn test_fit_psf_stack_circular() {
    let (stamps, catalog) = two_frame_fixture();
    let config = PsfConfig {
        fit_type: FitType::Circular,
        ..PsfConfig::default()
    };

    let result = fit_psf_stack(&stamps, &catalog, &config).unwrap();
    for params in &result.artifact.params {
        assert_eq!(params.fit_type(), FitType::Circular);
        assert!(params.is_physical());
        let (g1, g2) = params.gammas();
        assert_eq!(g1, g2);
    }
}

#[test]
fn test_fit_psf_stack_frame_without_sources_fails() {
    let (stamps, mut catalog) = two_frame_fixture();
    catalog = SourceCatalog::new(
        catalog
            .records()
            .iter()
            .copied()
            .filter(|r| r.frame == 1)
            .collect(),
    );

    let err = fit_psf_stack(&stamps, &catalog, &PsfConfig::default()).unwrap_err();
    assert!(matches!(err, Error::NoQualifyingSources { frame: 1 }));
}

// ============================================================================
// Single mode
// ============================================================================

#[test]
fn test_fit_psf_single_keeps_catalog_order() {
    init_tracing();
    let (stamps, catalog) = two_frame_fixture();
    let config = PsfConfig {
        sigma_clip: false,
        ..PsfConfig::default()
    };

    let fits = fit_psf_single(&stamps, &catalog, &config).unwrap();

    assert_eq!(fits.len(), 5);
    assert_eq!(fits.frame_indices(), vec![0, 0, 0, 1, 1]);
    let centroids = fits.centroids();
    assert_eq!(centroids[0], DVec2::new(100.0, 200.0));
    assert_eq!(centroids[2], DVec2::new(104.0, 204.0));
    assert_eq!(centroids[3], DVec2::new(100.0, 200.0));

    let amplitudes: Vec<f64> = fits.params().iter().map(|p| p.amplitude()).collect();
    for (a, e) in amplitudes.iter().zip([1000.0, 800.0, 1200.0, 900.0, 600.0]) {
        assert!((a - e).abs() < 0.01 * e, "amplitude {a} vs {e}");
    }
    assert_eq!(fits.fit_results().len(), 5);
}

#[test]
fn test_fit_psf_single_skips_failed_fits() {
    let (stamps, catalog) = two_frame_fixture();
    let mut frames: Vec<Vec<Buffer2<f64>>> =
        (0..stamps.frame_count()).map(|i| stamps.frame(i).to_vec()).collect();
    frames[0][1] = Buffer2::new_filled(WIDTH, WIDTH, f64::NAN);
    let stamps = StampSet::new(frames);
    let config = PsfConfig {
        sigma_clip: false,
        ..PsfConfig::default()
    };

    let fits = fit_psf_single(&stamps, &catalog, &config).unwrap();

    assert_eq!(fits.len(), 4);
    assert_eq!(fits.frame_indices(), vec![0, 0, 1, 1]);
    assert_eq!(fits.centroids()[1], DVec2::new(104.0, 204.0));
}

#[test]
fn test_fit_psf_single_missing_stamp_is_error() {
    let (stamps, mut catalog) = two_frame_fixture();
    let mut records = catalog.records().to_vec();
    records.push(SourceRecord {
        frame: 2,
        stamp: 2,
        x: 0.0,
        y: 0.0,
        flux: 5000.0,
        quality: 1,
    });
    catalog = SourceCatalog::new(records);

    let err = fit_psf_single(&stamps, &catalog, &PsfConfig::default()).unwrap_err();
    assert!(matches!(err, Error::MissingStamp { index: 2, .. }));
}

#[test]
fn test_fit_psf_single_clips_fwhm_outlier() {
    init_tracing();
    let mut stamps = Vec::new();
    let mut records = Vec::new();
    for i in 0..30 {
        let spread = 0.02 * (i % 5) as f64;
        stamps.push(moffat_stamp(&elliptical(1000.0, 4.5 + spread, 3.0 + spread), WIDTH));
        records.push(source(1, i, 10_000.0, 1));
    }
    // Twice as wide as the rest.
    stamps.insert(17, moffat_stamp(&elliptical(1000.0, 9.0, 6.0), WIDTH));
    records.push(source(1, 30, 10_000.0, 1));
    let stamps = StampSet::new(vec![stamps]);
    let catalog = SourceCatalog::new(records);

    let unclipped = fit_psf_single(
        &stamps,
        &catalog,
        &PsfConfig {
            sigma_clip: false,
            ..PsfConfig::default()
        },
    )
    .unwrap();
    assert_eq!(unclipped.len(), 31);

    let clipped = fit_psf_single(&stamps, &catalog, &PsfConfig::default()).unwrap();
    assert_eq!(clipped.len(), 30);
    for fit in &clipped {
        let (g1, g2) = fit.fit.params.gammas();
        assert!(g1.max(g2) < 5.0);
    }
}
