use super::ma::{rolling_std, sma};

/// Bollinger Bands: SMA middle band with `k` population standard deviations.
#[derive(Debug, Clone, PartialEq)]
pub struct BandsOutput {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn bollinger(closes: &[f64], period: usize, k: f64) -> Option<BandsOutput> {
    let middle = sma(closes, period)?;
    let std = rolling_std(closes, period)?;
    let upper = middle.iter().zip(&std).map(|(m, s)| m + k * s).collect();
    let lower = middle.iter().zip(&std).map(|(m, s)| m - k * s).collect();
    Some(BandsOutput { upper, middle, lower })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_collapse_on_flat_prices() {
        let out = bollinger(&[10.0; 25], 20, 2.0).unwrap();
        assert_eq!(out.middle.len(), 6);
        assert_eq!(out.upper, out.lower);
    }

    #[test]
    fn bands_are_symmetric() {
        let closes = [1.0, 3.0, 1.0, 3.0];
        let out = bollinger(&closes, 4, 2.0).unwrap();
        // mean 2, population std 1
        assert!((out.upper[0] - 4.0).abs() < 1e-12);
        assert!((out.lower[0] - 0.0).abs() < 1e-12);
    }
}
