//! Histogram auto-threshold methods.

use crate::histogram::Histogram;

/// Automatic threshold selection over the intensity histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoThresholdMethod {
    /// Maximise between-class variance.
    #[default]
    Otsu,
    /// Count-weighted mean intensity.
    Mean,
    /// Maximum distance from the histogram-peak-to-tail chord.
    Triangle,
    /// Maximise the sum of foreground and background entropies (Kapur).
    MaxEntropy,
}

/// Resolve the threshold value for `method`.
///
/// Returns the value of the selected bin: samples strictly above it are
/// foreground. Degenerate histograms (empty or single-valued) threshold at
/// their only value.
pub(crate) fn auto_threshold(hist: &Histogram, method: AutoThresholdMethod) -> f64 {
    if hist.is_empty() {
        return 0.0;
    }
    if hist.n_bins() == 1 {
        return hist.value(0);
    }
    match method {
        AutoThresholdMethod::Otsu => otsu(hist),
        AutoThresholdMethod::Mean => weighted_mean(hist),
        AutoThresholdMethod::Triangle => triangle(hist),
        AutoThresholdMethod::MaxEntropy => max_entropy(hist),
    }
}

fn weighted_mean(hist: &Histogram) -> f64 {
    let mut sum = 0.0;
    let mut n = 0.0;
    for bin in 0..hist.n_bins() {
        let c = f64::from(hist.count(bin));
        sum += hist.value(bin) * c;
        n += c;
    }
    sum / n
}

fn otsu(hist: &Histogram) -> f64 {
    let total: f64 = hist.total_count() as f64;
    let mut sum_total = 0.0;
    for bin in 0..hist.n_bins() {
        sum_total += hist.value(bin) * f64::from(hist.count(bin));
    }

    let mut w_b = 0.0;
    let mut sum_b = 0.0;
    let mut best_var = -1.0;
    let mut best_bin = 0;

    for bin in 0..hist.n_bins() {
        let c = f64::from(hist.count(bin));
        w_b += c;
        let w_f = total - w_b;
        if w_f < 1.0 {
            break;
        }
        sum_b += hist.value(bin) * c;

        let m_b = sum_b / w_b;
        let m_f = (sum_total - sum_b) / w_f;
        let var_between = w_b * w_f * (m_b - m_f) * (m_b - m_f);
        if var_between > best_var {
            best_var = var_between;
            best_bin = bin;
        }
    }

    hist.value(best_bin)
}

fn triangle(hist: &Histogram) -> f64 {
    // Chord from the modal bin to the farther histogram end, measured in
    // (bin index, normalised count) space.
    let n = hist.n_bins();
    let mut peak = 0;
    for bin in 1..n {
        if hist.count(bin) > hist.count(peak) {
            peak = bin;
        }
    }
    let tail = if peak >= n - peak { 0 } else { n - 1 };
    let peak_c = f64::from(hist.count(peak));
    if peak == tail || peak_c <= 0.0 {
        return hist.value(peak);
    }

    let dx = tail as f64 - peak as f64;
    let dy = f64::from(hist.count(tail)) / peak_c - 1.0;
    let norm = (dx * dx + dy * dy).sqrt();

    let (lo, hi) = if peak < tail { (peak, tail) } else { (tail, peak) };
    let mut best_d = -1.0;
    let mut best_bin = peak;
    for bin in lo..=hi {
        let px = bin as f64 - peak as f64;
        let py = f64::from(hist.count(bin)) / peak_c - 1.0;
        let d = (px * dy - py * dx).abs() / norm;
        if d > best_d {
            best_d = d;
            best_bin = bin;
        }
    }
    hist.value(best_bin)
}

fn max_entropy(hist: &Histogram) -> f64 {
    let total = hist.total_count() as f64;
    let p: Vec<f64> = (0..hist.n_bins())
        .map(|bin| f64::from(hist.count(bin)) / total)
        .collect();

    let mut cum = vec![0.0; p.len()];
    let mut acc = 0.0;
    for (i, &pi) in p.iter().enumerate() {
        acc += pi;
        cum[i] = acc;
    }

    let mut best_h = f64::NEG_INFINITY;
    let mut best_bin = 0;
    for t in 0..p.len() - 1 {
        let w_b = cum[t];
        let w_f = 1.0 - w_b;
        if w_b <= 0.0 || w_f <= 0.0 {
            continue;
        }
        let mut h_b = 0.0;
        for &pi in &p[..=t] {
            if pi > 0.0 {
                let q = pi / w_b;
                h_b -= q * q.ln();
            }
        }
        let mut h_f = 0.0;
        for &pi in &p[t + 1..] {
            if pi > 0.0 {
                let q = pi / w_f;
                h_f -= q * q.ln();
            }
        }
        if h_b + h_f > best_h {
            best_h = h_b + h_f;
            best_bin = t;
        }
    }
    hist.value(best_bin)
}
