use super::moving_average::ema_series;

/// MACD line and its signal line, aligned with the input prices
#[derive(Debug, Clone, Default)]
pub struct MacdSeries {
    pub macd: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
}

impl MacdSeries {
    /// Histogram (MACD - signal) where both lines exist
    pub fn histogram(&self) -> Vec<Option<f64>> {
        self.macd
            .iter()
            .zip(&self.signal)
            .map(|(m, s)| Some((*m)? - (*s)?))
            .collect()
    }
}

/// Calculate MACD (fast EMA - slow EMA) and its EMA signal line
pub fn calculate_macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> MacdSeries {
    let fast_ema = ema_series(prices, fast);
    let slow_ema = ema_series(prices, slow);

    let macd: Vec<Option<f64>> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();

    // Signal line is an EMA over the defined part of the MACD line
    let first_defined = macd.iter().position(Option::is_some);
    let mut signal_line = vec![None; prices.len()];

    if let Some(start) = first_defined {
        let defined: Vec<f64> = macd[start..].iter().map(|v| v.unwrap_or(0.0)).collect();
        for (offset, value) in ema_series(&defined, signal).into_iter().enumerate() {
            signal_line[start + offset] = value;
        }
    }

    MacdSeries {
        macd,
        signal: signal_line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macd_alignment() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let macd = calculate_macd(&prices, 12, 26, 9);

        assert_eq!(macd.macd.len(), 60);
        assert!(macd.macd[24].is_none());
        assert!(macd.macd[25].is_some());
        // Signal needs 9 MACD values
        assert!(macd.signal[32].is_none());
        assert!(macd.signal[33].is_some());
    }

    #[test]
    fn test_macd_positive_in_uptrend() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 * 1.01_f64.powi(i)).collect();
        let macd = calculate_macd(&prices, 12, 26, 9);

        let last = macd.macd.last().copied().flatten().unwrap();
        assert!(last > 0.0);
    }

    #[test]
    fn test_macd_flat_prices_zero() {
        let prices = vec![50.0; 40];
        let macd = calculate_macd(&prices, 12, 26, 9);
        let histogram = macd.histogram();

        assert_eq!(macd.macd[39], Some(0.0));
        assert_eq!(histogram[39], Some(0.0));
    }
}
