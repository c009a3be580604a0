/// Amount and hours helpers.
///
/// All monetary values are integer minor units (kobo for NGN). Hours are
/// decimals with at most two places and are converted to hundredths before
/// any arithmetic.
use bigdecimal::BigDecimal;
use num_traits::{ToPrimitive, Zero};

pub const MAX_HOURS_PER_PERIOD: i64 = 168;

/// Validate worked hours and convert them to hundredths of an hour.
pub fn centi_hours(hours: &BigDecimal) -> Result<i64, String> {
    if *hours <= BigDecimal::zero() {
        return Err("Hours worked must be greater than zero".to_string());
    }
    if *hours > BigDecimal::from(MAX_HOURS_PER_PERIOD) {
        return Err(format!("Hours worked cannot exceed {}", MAX_HOURS_PER_PERIOD));
    }

    let scaled = hours.clone() * BigDecimal::from(100);
    if scaled.with_scale(0) != scaled {
        return Err("Hours worked can have at most two decimal places".to_string());
    }

    scaled
        .to_i64()
        .ok_or_else(|| "Hours worked is out of range".to_string())
}

/// `hours × rate`, rounded half-up to whole minor units. `None` on overflow.
pub fn amount_for_hours(centi_hours: i64, rate: i64) -> Option<i64> {
    centi_hours
        .checked_mul(rate)?
        .checked_add(50)
        .map(|total| total / 100)
}

/// Budget reserved for a contract: `rate × hours_per_period × periods`.
pub fn contract_budget(rate: i64, hours_per_period: i32, periods: i64) -> Option<i64> {
    rate.checked_mul(hours_per_period as i64)?.checked_mul(periods)
}

/// Format minor units with two decimal places and the currency code.
pub fn format_minor_units(amount: i64, currency: &str) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}{}.{:02} {}", sign, abs / 100, abs % 100, currency)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn hours(raw: &str) -> BigDecimal {
        BigDecimal::from_str(raw).unwrap()
    }

    #[test]
    fn test_centi_hours() {
        assert_eq!(centi_hours(&hours("10")), Ok(1_000));
        assert_eq!(centi_hours(&hours("7.5")), Ok(750));
        assert_eq!(centi_hours(&hours("0.25")), Ok(25));
        assert_eq!(centi_hours(&hours("168")), Ok(16_800));
    }

    #[test]
    fn test_centi_hours_rejects_out_of_range() {
        assert!(centi_hours(&hours("0")).is_err());
        assert!(centi_hours(&hours("-1")).is_err());
        assert!(centi_hours(&hours("168.01")).is_err());
        assert!(centi_hours(&hours("1.125")).is_err());
    }

    #[test]
    fn test_amount_rounds_half_up() {
        // 10 h at 1,000/h
        assert_eq!(amount_for_hours(1_000, 1_000), Some(10_000));
        // 0.25 h at 333/h = 83.25
        assert_eq!(amount_for_hours(25, 333), Some(83));
        // 0.5 h at 333/h = 166.5
        assert_eq!(amount_for_hours(50, 333), Some(167));
        assert_eq!(amount_for_hours(i64::MAX, 2), None);
    }

    #[test]
    fn test_contract_budget() {
        assert_eq!(contract_budget(1_000, 10, 1), Some(10_000));
        assert_eq!(contract_budget(1_000, 10, 4), Some(40_000));
        assert_eq!(contract_budget(i64::MAX, 2, 1), None);
    }

    #[test]
    fn test_format_minor_units() {
        assert_eq!(format_minor_units(10_000, "NGN"), "100.00 NGN");
        assert_eq!(format_minor_units(50, "NGN"), "0.50 NGN");
        assert_eq!(format_minor_units(-12_345, "USD"), "-123.45 USD");
    }
}
