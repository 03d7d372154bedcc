//! 2D Moffat profile models.
//!
//! The Moffat profile models a stellar PSF with extended wings:
//!
//! f(x,y) = A × (1 + ((x-x₀)²+(y-y₀)²)/γ²)^(-β) + B
//!
//! The elliptical form rotates the offset by -φ into (u, v) and uses separate
//! core widths along each axis:
//!
//! f(x,y) = A × (1 + (u/γ₁)² + (v/γ₂)²)^(-β) + B
//!
//! Parameter layout:
//! - circular:   `[x0, y0, amplitude, gamma, beta, background]`
//! - elliptical: `[x0, y0, amplitude, gamma1, gamma2, phi, beta, background]`


use std::f64::consts::{FRAC_PI_2, PI};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use super::error::{Error, Result};
use super::lm_optimizer::LMModel;
use common::buffer2::Buffer2;

/// Number of samples on an ellipse outline from [`make_ellipse`].
pub const ELLIPSE_SAMPLES: usize = 100;

/// Smallest core width or slope the bounded solver accepts.
const MIN_SHAPE: f64 = 1e-6;

/// Which member of the Moffat family to fit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
pub enum FitType {
    #[strum(serialize = "circ")]
    #[serde(rename = "circ")]
    Circular,
    #[default]
    #[strum(serialize = "ellip")]
    #[serde(rename = "ellip")]
    Elliptical,
}

impl FitType {
    /// Parse a fit-type selector (`"circ"` or `"ellip"`).
    pub fn parse(name: &str) -> Result<Self> {
        name.parse()
            .map_err(|_| Error::InvalidFitType(name.to_string()))
    }

    pub const fn parameter_count(self) -> usize {
        match self {
            FitType::Circular => 6,
            FitType::Elliptical => 8,
        }
    }

    /// Starting point for a fit: centred on the stamp, peak amplitude, and a
    /// round profile with the given FWHM and beta.
    pub fn initial_guess(
        self,
        stamp_width: usize,
        peak: f64,
        fwhm: f64,
        beta: f64,
    ) -> MoffatParams {
        let center = (stamp_width / 2) as f64;
        let gamma = gamma_from_fwhm(fwhm, beta);
        match self {
            FitType::Circular => MoffatParams::Circular([center, center, peak, gamma, beta, 0.0]),
            FitType::Elliptical => {
                MoffatParams::Elliptical([center, center, peak, gamma, gamma, 0.0, beta, 0.0])
            }
        }
    }
}

/// A Moffat parameter vector tagged with its model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoffatParams {
    Circular([f64; 6]),
    Elliptical([f64; 8]),
}

impl MoffatParams {
    /// Interpret a raw parameter row. The row length must match the model.
    pub fn from_slice(fit_type: FitType, values: &[f64]) -> Result<Self> {
        let expected = fit_type.parameter_count();
        if values.len() != expected {
            return Err(Error::ParameterCount {
                fit_type,
                expected,
                actual: values.len(),
            });
        }
        Ok(match fit_type {
            FitType::Circular => {
                let mut p = [0.0; 6];
                p.copy_from_slice(values);
                MoffatParams::Circular(p)
            }
            FitType::Elliptical => {
                let mut p = [0.0; 8];
                p.copy_from_slice(values);
                MoffatParams::Elliptical(p)
            }
        })
    }

    pub fn fit_type(&self) -> FitType {
        match self {
            MoffatParams::Circular(_) => FitType::Circular,
            MoffatParams::Elliptical(_) => FitType::Elliptical,
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        match self {
            MoffatParams::Circular(p) => p,
            MoffatParams::Elliptical(p) => p,
        }
    }

    pub fn x0(&self) -> f64 {
        self.as_slice()[0]
    }

    pub fn y0(&self) -> f64 {
        self.as_slice()[1]
    }

    pub fn amplitude(&self) -> f64 {
        self.as_slice()[2]
    }

    /// Core widths `(gamma1, gamma2)`; both equal `gamma` for the circular model.
    pub fn gammas(&self) -> (f64, f64) {
        match self {
            MoffatParams::Circular(p) => (p[3], p[3]),
            MoffatParams::Elliptical(p) => (p[3], p[4]),
        }
    }

    /// Rotation angle in radians; zero for the circular model.
    pub fn phi(&self) -> f64 {
        match self {
            MoffatParams::Circular(_) => 0.0,
            MoffatParams::Elliptical(p) => p[5],
        }
    }

    pub fn beta(&self) -> f64 {
        match self {
            MoffatParams::Circular(p) => p[4],
            MoffatParams::Elliptical(p) => p[6],
        }
    }

    pub fn background(&self) -> f64 {
        match self {
            MoffatParams::Circular(p) => p[5],
            MoffatParams::Elliptical(p) => p[7],
        }
    }

    /// FWHM along each labelled axis, in pixels.
    pub fn fwhms(&self) -> (f64, f64) {
        let (g1, g2) = self.gammas();
        let beta = self.beta();
        (to_fwhm(g1, beta), to_fwhm(g2, beta))
    }

    /// Evaluate the profile at one point.
    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        match self {
            MoffatParams::Circular(p) => CircularMoffat::default().evaluate(x, y, p),
            MoffatParams::Elliptical(p) => EllipticalMoffat::default().evaluate(x, y, p),
        }
    }

    /// Evaluate the profile at every pixel centre of a `width × height` grid.
    pub fn render(&self, width: usize, height: usize) -> Buffer2<f64> {
        Buffer2::from_fn(width, height, |x, y| self.evaluate(x as f64, y as f64))
    }

    /// True when the shape parameters describe a real profile.
    pub fn is_physical(&self) -> bool {
        let (g1, g2) = self.gammas();
        self.as_slice().iter().all(|v| v.is_finite()) && g1 > 0.0 && g2 > 0.0 && self.beta() > 0.0
    }
}

/// Moffat FWHM: `2·γ·sqrt(2^(1/β) − 1)`. NaN when `beta <= 0`.
#[inline]
pub fn to_fwhm(gamma: f64, beta: f64) -> f64 {
    if !(beta > 0.0) {
        return f64::NAN;
    }
    2.0 * gamma * (2.0f64.powf(1.0 / beta) - 1.0).sqrt()
}

/// Core width that gives the requested FWHM for a slope `beta`.
#[inline]
pub fn gamma_from_fwhm(fwhm: f64, beta: f64) -> f64 {
    if !(beta > 0.0) {
        return f64::NAN;
    }
    fwhm / (2.0 * (2.0f64.powf(1.0 / beta) - 1.0).sqrt())
}

/// Rotation angle in degrees, folded into (-45°, 45°].
///
/// Axis 1 is first relabelled as the major axis (swap and add 90° when
/// γ₁ < γ₂), the angle is reduced modulo 180° into (-90°, 90°], and a final
/// quarter-turn fold (with the matching relabel) brings it into (-45°, 45°].
/// Circular parameters report 0.
pub fn nice_phi(params: &MoffatParams) -> f64 {
    let (g1, g2) = params.gammas();
    nice_phi_deg(g1, g2, params.phi())
}

/// [`nice_phi`] on raw values: `phi` in radians, result in degrees.
pub fn nice_phi_deg(gamma1: f64, gamma2: f64, phi: f64) -> f64 {
    oriented_axes(gamma1, gamma2, phi).2
}

/// Axis labels and angle after the [`nice_phi`] normalization:
/// `(gamma along the reported angle, the other gamma, angle in degrees)`.
pub fn oriented_axes(gamma1: f64, gamma2: f64, phi: f64) -> (f64, f64, f64) {
    let (mut a, mut b, mut phi) = (gamma1, gamma2, phi);
    if a < b {
        std::mem::swap(&mut a, &mut b);
        phi += FRAC_PI_2;
    }

    let mut deg = phi.to_degrees().rem_euclid(180.0);
    if deg > 90.0 {
        deg -= 180.0;
    }

    if deg > 45.0 {
        deg -= 90.0;
        std::mem::swap(&mut a, &mut b);
    } else if deg <= -45.0 {
        deg += 90.0;
        std::mem::swap(&mut a, &mut b);
    }

    (a, b, deg)
}

/// Outline of an ellipse with semi-axes `a` (along `phi`) and `b`, centred
/// on the origin. `phi` is in radians.
pub fn make_ellipse(a: f64, b: f64, phi: f64) -> (Vec<f64>, Vec<f64>) {
    let (sin_p, cos_p) = phi.sin_cos();
    (0..ELLIPSE_SAMPLES)
        .map(|i| {
            let t = 2.0 * PI * i as f64 / (ELLIPSE_SAMPLES - 1) as f64;
            let (sin_t, cos_t) = t.sin_cos();
            let u = a * cos_t;
            let v = b * sin_t;
            (u * cos_p - v * sin_p, u * sin_p + v * cos_p)
        })
        .unzip()
}

/// Circular Moffat with free beta (6 parameters).
/// Parameters: `[x0, y0, amplitude, gamma, beta, background]`.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CircularMoffat {
    pub bounded: bool,
}

impl LMModel<6> for CircularMoffat {
    #[inline]
    fn evaluate(&self, x: f64, y: f64, params: &[f64; 6]) -> f64 {
        let [x0, y0, amp, gamma, beta, bg] = *params;
        let r2 = (x - x0).powi(2) + (y - y0).powi(2);
        amp * (1.0 + r2 / (gamma * gamma)).powf(-beta) + bg
    }

    #[inline]
    fn jacobian_row(&self, x: f64, y: f64, params: &[f64; 6]) -> [f64; 6] {
        let [x0, y0, amp, gamma, beta, _bg] = *params;
        let gamma2 = gamma * gamma;
        let dx = x - x0;
        let dy = y - y0;
        let r2 = dx * dx + dy * dy;
        let u = 1.0 + r2 / gamma2;
        let ln_u = u.ln();
        let u_neg_beta = (-beta * ln_u).exp();
        let common = 2.0 * amp * beta / gamma2 * (u_neg_beta / u);

        [
            common * dx,
            common * dy,
            u_neg_beta,
            common * r2 / gamma,
            -amp * ln_u * u_neg_beta,
            1.0,
        ]
    }

    #[inline]
    fn constrain(&self, params: &mut [f64; 6]) {
        if self.bounded {
            params[2] = params[2].max(0.0);
            params[3] = params[3].max(MIN_SHAPE);
            params[4] = params[4].max(MIN_SHAPE);
        }
    }
}

/// Elliptical Moffat with free beta (8 parameters).
/// Parameters: `[x0, y0, amplitude, gamma1, gamma2, phi, beta, background]`.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EllipticalMoffat {
    pub bounded: bool,
}

impl LMModel<8> for EllipticalMoffat {
    #[inline]
    fn evaluate(&self, x: f64, y: f64, params: &[f64; 8]) -> f64 {
        let [x0, y0, amp, g1, g2, phi, beta, bg] = *params;
        let (sin_p, cos_p) = phi.sin_cos();
        let dx = x - x0;
        let dy = y - y0;
        let u = dx * cos_p + dy * sin_p;
        let v = -dx * sin_p + dy * cos_p;
        amp * (1.0 + (u / g1).powi(2) + (v / g2).powi(2)).powf(-beta) + bg
    }

    #[inline]
    fn jacobian_row(&self, x: f64, y: f64, params: &[f64; 8]) -> [f64; 8] {
        let [x0, y0, amp, g1, g2, phi, beta, _bg] = *params;
        let (sin_p, cos_p) = phi.sin_cos();
        let dx = x - x0;
        let dy = y - y0;
        let u = dx * cos_p + dy * sin_p;
        let v = -dx * sin_p + dy * cos_p;
        let g1_2 = g1 * g1;
        let g2_2 = g2 * g2;

        let d = 1.0 + u * u / g1_2 + v * v / g2_2;
        let ln_d = d.ln();
        let d_neg_beta = (-beta * ln_d).exp();
        // df/dD
        let k = -amp * beta * d_neg_beta / d;

        let du = 2.0 * u / g1_2;
        let dv = 2.0 * v / g2_2;

        [
            k * (-du * cos_p + dv * sin_p),
            k * (-du * sin_p - dv * cos_p),
            d_neg_beta,
            k * (-2.0 * u * u / (g1_2 * g1)),
            k * (-2.0 * v * v / (g2_2 * g2)),
            k * (2.0 * u * v * (1.0 / g1_2 - 1.0 / g2_2)),
            -amp * ln_d * d_neg_beta,
            1.0,
        ]
    }

    #[inline]
    fn constrain(&self, params: &mut [f64; 8]) {
        if self.bounded {
            params[2] = params[2].max(0.0);
            params[3] = params[3].max(MIN_SHAPE);
            params[4] = params[4].max(MIN_SHAPE);
            params[6] = params[6].max(MIN_SHAPE);
        }
    }
}
