use rust_decimal::prelude::*;
use rust_decimal::RoundingStrategy;

use crate::core::errors::TradeError;

pub const WEI_DECIMALS: u32 = 18;
pub const GWEI_DECIMALS: u32 = 9;

/// Significant digits shown for balances on the handheld display.
pub const DISPLAY_SIG_DIGITS: u32 = 7;

/// Convert an integer amount with `decimals` implied places into a `Decimal`.
///
/// Values too large for `Decimal` saturate at `Decimal::MAX`.
pub fn units_to_decimal(raw: u128, decimals: u32) -> Decimal {
    let scale = 10u128.pow(decimals);
    let whole = i128::try_from(raw / scale).unwrap_or(i128::MAX);
    let frac = (raw % scale) as i128;

    let whole = Decimal::try_from_i128_with_scale(whole, 0).unwrap_or(Decimal::MAX);
    let frac = Decimal::try_from_i128_with_scale(frac, decimals).unwrap_or(Decimal::ZERO);
    whole.checked_add(frac).unwrap_or(Decimal::MAX)
}

/// Parse a human decimal string ("6", "1.25") into integer units, rejecting
/// more fractional digits than `decimals` and negative values.
pub fn parse_units(amount: &str, decimals: u32) -> Result<u128, TradeError> {
    let value = Decimal::from_str(amount.trim())
        .map_err(|e| TradeError::Other(format!("invalid amount {:?}: {}", amount, e)))?;
    if value.is_sign_negative() {
        return Err(TradeError::Other(format!("negative amount: {}", amount)));
    }
    if value.normalize().scale() > decimals {
        return Err(TradeError::Other(format!(
            "amount {} has more than {} decimals",
            amount, decimals
        )));
    }
    let scaled = value
        .checked_mul(Decimal::from(10u64.pow(decimals)))
        .ok_or_else(|| TradeError::Other(format!("amount out of range: {}", amount)))?;
    scaled
        .trunc()
        .to_u128()
        .ok_or_else(|| TradeError::Other(format!("amount out of range: {}", amount)))
}

/// Truncating fixed-point formatter.
///
/// Shows at most `max_sig_digits` significant digits and at most `max_decimals`
/// fractional digits, never rounding up, with trailing zeros removed. Zero and
/// dust below the significant range print as `0.00`.
pub fn format_fixed_trunc_sig(value: Decimal, max_sig_digits: u32, max_decimals: u32) -> String {
    if value.is_zero() {
        return if max_decimals > 0 {
            format!("{:.*}", max_decimals.min(2) as usize, Decimal::ZERO)
        } else {
            "0".to_string()
        };
    }

    let abs = value.abs();
    let dust = Decimal::new(1, max_sig_digits.min(28));
    if abs < dust {
        return if max_decimals >= 2 { "0.00" } else { "0" }.to_string();
    }

    let int_digits = if abs >= Decimal::ONE {
        abs.trunc().to_string().len() as u32
    } else {
        0
    };
    let decimals = if int_digits < max_sig_digits {
        max_decimals.min(max_sig_digits - int_digits)
    } else {
        0
    };

    let truncated = value.round_dp_with_strategy(decimals, RoundingStrategy::ToZero);
    let mut out = format!("{:.*}", decimals as usize, truncated);
    if decimals > 0 {
        while out.ends_with('0') {
            out.pop();
        }
        if out.ends_with('.') {
            out.pop();
        }
    }
    if out.is_empty() {
        out.push('0');
    }
    out
}

pub fn format_eth(wei: u128) -> String {
    format_fixed_trunc_sig(units_to_decimal(wei, WEI_DECIMALS), DISPLAY_SIG_DIGITS, 6)
}

pub fn format_usdc(raw: u128) -> String {
    format_fixed_trunc_sig(
        units_to_decimal(raw, crate::chains::arbitrum::transaction::USDC_DECIMALS),
        DISPLAY_SIG_DIGITS,
        6,
    )
}

/// "GAS: <gwei> GWEI"
pub fn format_gas_label(gas_price_wei: u128) -> String {
    let gwei = format_fixed_trunc_sig(
        units_to_decimal(gas_price_wei, GWEI_DECIMALS),
        DISPLAY_SIG_DIGITS,
        3,
    );
    format!("GAS: {} GWEI", gwei)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eth_truncates_not_rounds() {
        // 0.1234569 ETH
        assert_eq!(format_eth(123_456_900_000_000_000), "0.123456");
        assert_eq!(format_eth(1_000_000_000_000_000_000), "1");
        assert_eq!(format_eth(0), "0.00");
        assert_eq!(format_eth(1), "0.00");
    }

    #[test]
    fn test_significant_digit_cap() {
        let v = Decimal::from_str("12345.6789").unwrap();
        assert_eq!(format_fixed_trunc_sig(v, 7, 6), "12345.67");
        let v = Decimal::from_str("123456789.5").unwrap();
        assert_eq!(format_fixed_trunc_sig(v, 7, 6), "123456789");
    }

    #[test]
    fn test_usdc_and_gas_labels() {
        assert_eq!(format_usdc(6_000_000), "6");
        assert_eq!(format_usdc(1_234_567), "1.234567");
        assert_eq!(format_gas_label(10_000_000), "GAS: 0.01 GWEI");
        assert_eq!(format_gas_label(1_234_567_890), "GAS: 1.234 GWEI");
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_units("6", 6).unwrap(), 6_000_000);
        assert_eq!(parse_units("1.25", 6).unwrap(), 1_250_000);
        assert_eq!(parse_units("0.000001", 6).unwrap(), 1);
        assert!(parse_units("0.0000001", 6).is_err());
        assert!(parse_units("-1", 6).is_err());
        assert!(parse_units("abc", 6).is_err());
    }

    #[test]
    fn test_units_to_decimal_large_value() {
        let d = units_to_decimal(u128::MAX, 18);
        assert!(d > Decimal::from(1_000_000_000u64));
    }
}
