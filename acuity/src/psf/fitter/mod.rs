//! Least-squares Moffat fit of one image stamp.


use common::buffer2::Buffer2;

use super::error::{Error, Result};
use super::lm_optimizer::{LmConfig, LmResult, Samples, Stop, optimize};
use super::moffat::{CircularMoffat, EllipticalMoffat, FitType, MoffatParams};

/// Converged Moffat fit of a stamp.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub params: MoffatParams,
    pub stamp: Buffer2<f64>,
    /// `stamp - model`.
    pub residual: Buffer2<f64>,
    pub chi2: f64,
    pub iterations: usize,
}

impl FitResult {
    pub fn fit_type(&self) -> FitType {
        self.params.fit_type()
    }

    /// Model image at the fitted parameters.
    pub fn model(&self) -> Buffer2<f64> {
        self.params.render(self.stamp.width(), self.stamp.height())
    }
}

/// Fits a circular or elliptical Moffat profile to one stamp.
#[derive(Debug, Clone)]
pub struct MoffatFitter<'a> {
    stamp: &'a Buffer2<f64>,
    fit_type: FitType,
    config: LmConfig,
}

impl<'a> MoffatFitter<'a> {
    pub fn new(stamp: &'a Buffer2<f64>, fit_type: FitType) -> Self {
        Self {
            stamp,
            fit_type,
            config: LmConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LmConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fit_type(&self) -> FitType {
        self.fit_type
    }

    /// Minimize Σ(stamp − model)² starting from `initial`.
    ///
    /// Fails with [`Error::NotConverged`] when the optimizer stops early or
    /// the solution is not a physical profile, and with
    /// [`Error::ParameterCount`] when `initial` is for the other model.
    pub fn fit(&self, initial: &MoffatParams) -> Result<FitResult> {
        if initial.fit_type() != self.fit_type {
            return Err(Error::ParameterCount {
                fit_type: self.fit_type,
                expected: self.fit_type.parameter_count(),
                actual: initial.as_slice().len(),
            });
        }

        let samples = Samples::from_grid(self.stamp.width(), self.stamp.pixels());
        let bounded = self.config.bounded;
        let (params, chi2, iterations) = match *initial {
            MoffatParams::Circular(p0) => {
                let result = optimize(&CircularMoffat { bounded }, &samples, p0, &self.config);
                let (chi2, iterations) = self.check(&result)?;
                (MoffatParams::Circular(result.params), chi2, iterations)
            }
            MoffatParams::Elliptical(p0) => {
                let result = optimize(&EllipticalMoffat { bounded }, &samples, p0, &self.config);
                let (chi2, iterations) = self.check(&result)?;
                (MoffatParams::Elliptical(result.params), chi2, iterations)
            }
        };

        if !params.is_physical() {
            return Err(Error::NotConverged {
                fit_type: self.fit_type,
                reason: Stop::Unphysical,
            });
        }

        let model = params.render(self.stamp.width(), self.stamp.height());
        let residual = Buffer2::from_fn(self.stamp.width(), self.stamp.height(), |x, y| {
            self.stamp[(x, y)] - model[(x, y)]
        });

        tracing::trace!(
            fit_type = %self.fit_type,
            iterations,
            chi2,
            "Moffat fit converged"
        );

        Ok(FitResult {
            params,
            stamp: self.stamp.clone(),
            residual,
            chi2,
            iterations,
        })
    }

    fn check<const N: usize>(&self, result: &LmResult<N>) -> Result<(f64, usize)> {
        match result.stop {
            None => Ok((result.chi2, result.iterations)),
            Some(reason) => Err(Error::NotConverged {
                fit_type: self.fit_type,
                reason,
            }),
        }
    }
}
