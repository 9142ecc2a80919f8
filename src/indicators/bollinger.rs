use super::moving_average::sma_series;

/// Bollinger bands aligned with the input prices
#[derive(Debug, Clone, Default)]
pub struct BollingerBands {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

/// Calculate Bollinger bands: SMA(period) ± std_dev × sample standard deviation
pub fn calculate_bollinger(prices: &[f64], period: usize, std_dev: f64) -> BollingerBands {
    let middle = sma_series(prices, period);
    let mut upper = vec![None; prices.len()];
    let mut lower = vec![None; prices.len()];

    if period < 2 {
        return BollingerBands {
            upper,
            middle,
            lower,
        };
    }

    for (i, mean) in middle.iter().enumerate() {
        let Some(mean) = *mean else { continue };
        let window = &prices[i + 1 - period..=i];
        let variance =
            window.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (period - 1) as f64;
        let band = variance.sqrt() * std_dev;

        upper[i] = Some(mean + band);
        lower[i] = Some(mean - band);
    }

    BollingerBands {
        upper,
        middle,
        lower,
    }
}
