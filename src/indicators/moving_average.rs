/// Calculate Simple Moving Average (SMA) of the most recent `period` prices
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Calculate Exponential Moving Average (EMA)
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    ema_series(prices, period).last().copied().flatten()
}

/// Rolling SMA aligned with `prices`; `None` until a full window exists
pub fn sma_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; prices.len()];
    if period == 0 || prices.len() < period {
        return out;
    }

    let mut window_sum: f64 = prices[..period].iter().sum();
    out[period - 1] = Some(window_sum / period as f64);

    for i in period..prices.len() {
        window_sum += prices[i] - prices[i - period];
        out[i] = Some(window_sum / period as f64);
    }

    out
}

/// EMA aligned with `prices`, seeded with the SMA of the first `period` values
pub fn ema_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; prices.len()];
    if period == 0 || prices.len() < period {
        return out;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = prices[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(ema);

    for i in period..prices.len() {
        ema = (prices[i] - ema) * multiplier + ema;
        out[i] = Some(ema);
    }

    out
}
