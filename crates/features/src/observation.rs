/// Build a fixed-length observation vector from recent closes.
///
/// Takes at most the last `window_size` prices (oldest first), computes simple
/// one-step returns, left-pads them with zeros up to `window_size`, divides by
/// the population standard deviation of the padded vector (or by 1 when that
/// is not positive) and appends `position`.
///
/// Returns `None` when fewer than two prices are available; otherwise the
/// result always has exactly `window_size + 1` elements.
pub fn build_observation(prices: &[f64], position: f64, window_size: usize) -> Option<Vec<f64>> {
    if prices.len() < 2 {
        return None;
    }

    let start = prices.len().saturating_sub(window_size);
    let mut returns = left_pad(simple_returns(&prices[start..]), window_size);
    normalize(&mut returns);

    returns.push(position);
    Some(returns)
}

/// `r_i = (p_i - p_{i-1}) / p_{i-1}`. A zero previous price yields `0.0`.
fn simple_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .map(|w| {
            let r = (w[1] - w[0]) / w[0];
            if r.is_finite() {
                r
            } else {
                0.0
            }
        })
        .collect()
}

fn left_pad(returns: Vec<f64>, window_size: usize) -> Vec<f64> {
    if returns.len() >= window_size {
        return returns[returns.len() - window_size..].to_vec();
    }
    let mut padded = vec![0.0; window_size - returns.len()];
    padded.extend(returns);
    padded
}

fn normalize(returns: &mut [f64]) {
    let divisor = match std_dev(returns) {
        Some(sd) if sd > 0.0 => sd,
        _ => 1.0,
    };
    for r in returns.iter_mut() {
        *r /= divisor;
    }
}

/// Population standard deviation (divides by N).
fn std_dev(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(var.sqrt())
}
