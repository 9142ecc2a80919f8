use crate::models::Candle;

/// Commodity Channel Index aligned with `candles`
///
/// CCI = (TP - SMA(TP)) / (0.015 × mean absolute deviation), TP = (H + L + C) / 3
pub fn calculate_cci(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let typical: Vec<f64> = candles
        .iter()
        .map(|c| (c.high + c.low + c.close) / 3.0)
        .collect();

    let mut out = vec![None; candles.len()];
    if period == 0 || typical.len() < period {
        return out;
    }

    for i in period - 1..typical.len() {
        let window = &typical[i + 1 - period..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let mad = window.iter().map(|tp| (tp - mean).abs()).sum::<f64>() / period as f64;

        if mad > 0.0 {
            out[i] = Some((typical[i] - mean) / (0.015 * mad));
        }
    }

    out
}
