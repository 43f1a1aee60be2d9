//! ARMA(p, q) model.
//!
//! Estimation uses the Hannan–Rissanen two-stage regression on the
//! demeaned series:
//!
//! 1. fit a long AR(m) by least squares and keep its residuals as
//!    innovation estimates;
//! 2. regress the series on its own `p` lags and `q` lags of those
//!    innovations.
//!
//! Conditional residuals are then recomputed with the final coefficients
//! to get the innovation variance and BIC. Forecast standard errors come
//! from the MA(inf) psi-weights, intervals from the normal quantile.
//!
//! Order selection is either fixed or a minimum-BIC grid search. A fit
//! that fails for the chosen order is retried once with ARMA(1, 1).

use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{debug, info, warn};

use super::linalg::least_squares;
use super::ForecastModel;
use crate::config::{ModelConfig, OrderSelection};
use crate::types::{ArmaOrder, BotError, Forecast};

/// Minimum residual degrees of freedom for each regression.
const MIN_DOF: usize = 10;

const MODEL_NAME: &str = "arma";

// ---------------------------------------------------------------------------
// Fit result
// ---------------------------------------------------------------------------

/// Parameters of a fitted ARMA model. Replaced wholesale on every fit.
#[derive(Debug, Clone)]
pub struct ArmaFit {
    pub order: ArmaOrder,
    pub mean: f64,
    pub ar: Vec<f64>,
    pub ma: Vec<f64>,
    /// Innovation variance (degrees-of-freedom adjusted).
    pub sigma2: f64,
    pub bic: f64,
    pub n_obs: usize,
    /// Demeaned training series.
    centered: Vec<f64>,
    /// Conditional residuals aligned with `centered`; zero before index p.
    residuals: Vec<f64>,
}

impl ArmaFit {
    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    /// Forecast `steps` values with two-sided intervals at `confidence`.
    pub fn forecast(&self, steps: usize, confidence: f64) -> Result<Forecast, BotError> {
        let z = normal_quantile(confidence)?;
        let (p, q) = (self.order.p, self.order.q);
        let n = self.centered.len();

        let mut x = self.centered.clone();
        let mut e = self.residuals.clone();
        for h in 0..steps {
            let t = n + h;
            let mut value = 0.0;
            for i in 1..=p.min(t) {
                value += self.ar[i - 1] * x[t - i];
            }
            for j in 1..=q.min(t) {
                value += self.ma[j - 1] * e[t - j];
            }
            x.push(value);
            e.push(0.0);
        }
        let predictions: Vec<f64> = x[n..].iter().map(|v| v + self.mean).collect();

        let psi = psi_weights(&self.ar, &self.ma, steps);
        let mut cumulative = 0.0;
        let std_errors: Vec<f64> = psi
            .iter()
            .map(|w| {
                cumulative += w * w;
                (self.sigma2 * cumulative).sqrt()
            })
            .collect();

        let intervals = predictions
            .iter()
            .zip(&std_errors)
            .map(|(pred, se)| (pred - z * se, pred + z * se))
            .collect();

        Ok(Forecast {
            predictions,
            std_errors,
            intervals,
            confidence,
            order: self.order,
        })
    }
}

// ---------------------------------------------------------------------------
// Estimation
// ---------------------------------------------------------------------------

/// Order of the long autoregression used for innovation estimates.
fn long_ar_order(n: usize, order: ArmaOrder) -> usize {
    let rule = (n.max(1) as f64).ln().powf(1.5) as usize;
    order.p.saturating_add(order.q).saturating_add(2).max(rule)
}

/// Fit ARMA(p, q) to `series`.
pub fn fit_arma(series: &[f64], order: ArmaOrder) -> Result<ArmaFit, BotError> {
    let fail = |reason: String| BotError::FitFailure { order, reason };
    let (p, q) = (order.p, order.q);
    let n = series.len();

    if series.iter().any(|v| !v.is_finite()) {
        return Err(fail("series contains non-finite values".into()));
    }

    let long_ar = if q > 0 { long_ar_order(n, order) } else { 0 };
    let required = if q > 0 {
        let by_long_ar = long_ar.saturating_mul(2).saturating_add(MIN_DOF);
        let by_order = long_ar
            .saturating_add(q.saturating_mul(2))
            .saturating_add(p)
            .saturating_add(MIN_DOF);
        by_long_ar.max(by_order)
    } else {
        p.saturating_mul(2).saturating_add(MIN_DOF)
    };
    if n < required {
        return Err(fail(format!("need at least {required} observations, got {n}")));
    }

    let mean = series.iter().sum::<f64>() / n as f64;
    let centered: Vec<f64> = series.iter().map(|v| v - mean).collect();

    // Stage 1: innovations from a long autoregression.
    let mut innovations = vec![0.0; n];
    if q > 0 {
        let design: Vec<Vec<f64>> = (long_ar..n)
            .map(|t| (1..=long_ar).map(|i| centered[t - i]).collect())
            .collect();
        let coeffs = least_squares(&design, &centered[long_ar..])
            .ok_or_else(|| fail("long AR regression is singular".into()))?;
        for t in long_ar..n {
            let fitted: f64 = (1..=long_ar).map(|i| coeffs[i - 1] * centered[t - i]).sum();
            innovations[t] = centered[t] - fitted;
        }
    }

    // Stage 2: regression on lagged values and lagged innovations.
    let start = if q > 0 { long_ar + q } else { p };
    let (ar, ma) = if p + q == 0 {
        (Vec::new(), Vec::new())
    } else {
        let design: Vec<Vec<f64>> = (start..n)
            .map(|t| {
                (1..=p)
                    .map(|i| centered[t - i])
                    .chain((1..=q).map(|j| innovations[t - j]))
                    .collect()
            })
            .collect();
        let beta = least_squares(&design, &centered[start..])
            .ok_or_else(|| fail("ARMA regression is singular".into()))?;
        (beta[..p].to_vec(), beta[p..].to_vec())
    };

    if !is_stationary(&ar) {
        return Err(fail(format!("AR part is not stationary: {ar:?}")));
    }
    let negated_ma: Vec<f64> = ma.iter().map(|c| -c).collect();
    if !is_stationary(&negated_ma) {
        return Err(fail(format!("MA part is not invertible: {ma:?}")));
    }

    let residuals = conditional_residuals(&centered, &ar, &ma);
    let effective = n - p;
    let sse: f64 = residuals[p..].iter().map(|e| e * e).sum();
    let sigma2 = sse / (effective - p - q) as f64;
    if !sigma2.is_finite() || sigma2 <= 0.0 {
        return Err(fail(format!("degenerate innovation variance {sigma2}")));
    }

    let sigma2_mle = sse / effective as f64;
    let k = (p + q + 1) as f64;
    let bic = effective as f64 * sigma2_mle.ln() + k * (effective as f64).ln();

    debug!(order = %order, mean, ?ar, ?ma, sigma2, bic, "ARMA fitted");

    Ok(ArmaFit {
        order,
        mean,
        ar,
        ma,
        sigma2,
        bic,
        n_obs: n,
        centered,
        residuals,
    })
}

/// Residuals conditioned on zero pre-sample innovations.
fn conditional_residuals(centered: &[f64], ar: &[f64], ma: &[f64]) -> Vec<f64> {
    let p = ar.len();
    let mut e = vec![0.0; centered.len()];
    for t in p..centered.len() {
        let mut fitted = 0.0;
        for (i, phi) in ar.iter().enumerate() {
            fitted += phi * centered[t - i - 1];
        }
        for (j, theta) in ma.iter().enumerate() {
            if t > j {
                fitted += theta * e[t - j - 1];
            }
        }
        e[t] = centered[t] - fitted;
    }
    e
}

/// Whether `1 - a1 z - ... - ak z^k` has all roots outside the unit circle.
///
/// Uses the step-down recursion: every reflection coefficient must lie
/// strictly inside (-1, 1).
pub fn is_stationary(coeffs: &[f64]) -> bool {
    let mut a = coeffs.to_vec();
    while let Some(&k) = a.last() {
        if !(k.abs() < 1.0) {
            return false;
        }
        let m = a.len();
        let denom = 1.0 - k * k;
        a = (0..m - 1).map(|i| (a[i] + k * a[m - 2 - i]) / denom).collect();
    }
    true
}

/// MA(inf) weights psi_0..psi_{steps-1}.
fn psi_weights(ar: &[f64], ma: &[f64], steps: usize) -> Vec<f64> {
    let mut psi = Vec::with_capacity(steps);
    for j in 0..steps {
        if j == 0 {
            psi.push(1.0);
            continue;
        }
        let mut w = if j <= ma.len() { ma[j - 1] } else { 0.0 };
        for i in 1..=ar.len().min(j) {
            w += ar[i - 1] * psi[j - i];
        }
        psi.push(w);
    }
    psi
}

fn normal_quantile(confidence: f64) -> Result<f64, BotError> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(BotError::FitFailure {
            order: ArmaOrder::DEFAULT,
            reason: format!("confidence must be in (0, 1), got {confidence}"),
        });
    }
    let standard = Normal::new(0.0, 1.0).map_err(|e| BotError::FitFailure {
        order: ArmaOrder::DEFAULT,
        reason: e.to_string(),
    })?;
    Ok(standard.inverse_cdf(0.5 + confidence / 2.0))
}

/// First index of the residual window shared by every candidate in a
/// `max_ar` x `max_ma` search: past the largest AR lag and, when MA terms
/// are searched, past the longest innovation warm-up.
fn search_window_start(n: usize, max_ar: usize, max_ma: usize) -> usize {
    if max_ma == 0 {
        return max_ar;
    }
    let long_ar = long_ar_order(n, ArmaOrder::new(max_ar, max_ma));
    max_ar.max(long_ar + max_ma)
}

/// BIC from the residuals in `start..`. Candidates scored over the same
/// window are comparable, and their ranking does not depend on the units
/// of the series.
fn window_bic(fit: &ArmaFit, start: usize) -> f64 {
    let window = &fit.residuals[start..];
    let m = window.len() as f64;
    let sse: f64 = window.iter().map(|e| e * e).sum();
    let k = (fit.order.p + fit.order.q + 1) as f64;
    m * (sse / m).ln() + k * m.ln()
}

/// Fit every order in `0..=max_ar` x `0..=max_ma` and keep the minimum BIC.
///
/// The returned fit's `bic` is the shared-window score it was chosen by.
pub fn select_by_bic(series: &[f64], max_ar: usize, max_ma: usize) -> Result<ArmaFit, BotError> {
    let n = series.len();
    let start = search_window_start(n, max_ar, max_ma);
    if n < start.saturating_add(MIN_DOF) {
        return Err(BotError::FitFailure {
            order: ArmaOrder::new(max_ar, max_ma),
            reason: format!("need more than {start} observations for the BIC search, got {n}"),
        });
    }

    let mut best: Option<ArmaFit> = None;
    let mut failures = 0usize;

    for p in 0..=max_ar {
        for q in 0..=max_ma {
            match fit_arma(series, ArmaOrder::new(p, q)) {
                Ok(mut fit) => {
                    fit.bic = window_bic(&fit, start);
                    if !fit.bic.is_finite() {
                        failures += 1;
                        continue;
                    }
                    if best.as_ref().map_or(true, |b| fit.bic < b.bic) {
                        best = Some(fit);
                    }
                }
                Err(e) => {
                    failures += 1;
                    debug!(error = %e, "Candidate order rejected");
                }
            }
        }
    }

    match best {
        Some(fit) => {
            debug!(order = %fit.order, bic = fit.bic, window_start = start, failures, "BIC order selected");
            Ok(fit)
        }
        None => Err(BotError::FitFailure {
            order: ArmaOrder::new(max_ar, max_ma),
            reason: "no candidate order could be fitted".into(),
        }),
    }
}

/// Run `primary`; if it fails and was not already the default order, run
/// `fallback` once. The fallback's error is the one returned.
pub fn with_fallback<T>(
    primary: impl FnOnce() -> Result<T, BotError>,
    primary_is_default: bool,
    fallback: impl FnOnce() -> Result<T, BotError>,
) -> Result<T, BotError> {
    match primary() {
        Ok(value) => Ok(value),
        Err(err) if primary_is_default => Err(err),
        Err(err) => {
            warn!(error = %err, fallback = %ArmaOrder::DEFAULT, "Fit failed, retrying with default order");
            fallback()
        }
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Stateful ARMA forecaster.
#[derive(Debug, Clone)]
pub struct ArmaModel {
    selection: OrderSelection,
    order: ArmaOrder,
    max_ar: usize,
    max_ma: usize,
    confidence: f64,
    fit: Option<ArmaFit>,
}

impl ArmaModel {
    pub fn new(cfg: &ModelConfig) -> Self {
        Self {
            selection: cfg.selection,
            order: cfg.order,
            max_ar: cfg.max_ar,
            max_ma: cfg.max_ma,
            confidence: cfg.confidence,
            fit: None,
        }
    }

    /// Model that always fits `order`, with 95% intervals.
    pub fn fixed(order: ArmaOrder) -> Self {
        Self::new(&ModelConfig {
            order,
            ..ModelConfig::default()
        })
    }

    /// Model that searches orders by BIC, with 95% intervals.
    pub fn bic_search(max_ar: usize, max_ma: usize) -> Self {
        Self::new(&ModelConfig {
            selection: OrderSelection::Bic,
            max_ar,
            max_ma,
            ..ModelConfig::default()
        })
    }

    pub fn fit_result(&self) -> Option<&ArmaFit> {
        self.fit.as_ref()
    }
}

impl ForecastModel for ArmaModel {
    fn fit(&mut self, series: &[f64]) -> Result<(), BotError> {
        self.fit = None;

        let primary_is_default =
            self.selection == OrderSelection::Fixed && self.order == ArmaOrder::DEFAULT;
        let fit = with_fallback(
            || match self.selection {
                OrderSelection::Fixed => fit_arma(series, self.order),
                OrderSelection::Bic => select_by_bic(series, self.max_ar, self.max_ma),
            },
            primary_is_default,
            || fit_arma(series, ArmaOrder::DEFAULT),
        )?;

        info!(
            order = %fit.order,
            n_obs = fit.n_obs,
            sigma2 = fit.sigma2,
            bic = fit.bic,
            "Model fitted"
        );
        self.fit = Some(fit);
        Ok(())
    }

    fn predict(&self, steps: usize) -> Result<Forecast, BotError> {
        let fit = self.fit.as_ref().ok_or(BotError::ModelNotFitted)?;
        fit.forecast(steps, self.confidence)
    }

    fn order(&self) -> Option<ArmaOrder> {
        self.fit.as_ref().map(|f| f.order)
    }

    fn name(&self) -> &'static str {
        MODEL_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
