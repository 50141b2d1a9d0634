//! Monetary amount parsing and minor-unit arithmetic.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Number of minor-unit digits for an ISO 4217 currency code.
pub fn currency_exponent(currency: &str) -> u32 {
    match currency.to_ascii_uppercase().as_str() {
        "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF" | "UGX"
        | "UYI" | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
        "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
        _ => 2,
    }
}

/// Scales an amount to integer minor units, rounding half away from zero.
///
/// Returns `None` when the scaled value does not fit in an `i128`.
pub fn to_minor_units(amount: Decimal, currency: &str) -> Option<i128> {
    let exponent = currency_exponent(currency);
    let scale = Decimal::from(10u64.pow(exponent));
    amount
        .round_dp_with_strategy(exponent, RoundingStrategy::MidpointAwayFromZero)
        .checked_mul(scale)?
        .to_i128()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumberFormat {
    /// `1,234.56`
    #[default]
    DecimalPoint,
    /// `1.234,56`
    DecimalComma,
}

impl NumberFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecimalPoint => "1,234.56",
            Self::DecimalComma => "1.234,56",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.trim() {
            "1.234,56" | "decimal_comma" | "comma" => Self::DecimalComma,
            _ => Self::DecimalPoint,
        }
    }

    fn decimal_separator(&self) -> char {
        match self {
            Self::DecimalPoint => '.',
            Self::DecimalComma => ',',
        }
    }

    fn group_separator(&self) -> char {
        match self {
            Self::DecimalPoint => ',',
            Self::DecimalComma => '.',
        }
    }
}

/// Parses a human-formatted amount.
///
/// A currency symbol or three-letter code may lead or trail the number.
/// Whitespace and the format's group separator are dropped. A leading or
/// trailing `-`, or accounting parentheses, make the value negative. Any
/// other character is an error.
pub fn parse_amount(raw: &str, format: NumberFormat) -> Result<Decimal, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("amount is empty".to_string());
    }
    let invalid = || format!("'{}' is not a valid amount", trimmed);

    let mut body = trimmed;
    let mut negative = false;
    if let Some(inner) = body.strip_prefix('(').and_then(|b| b.strip_suffix(')')) {
        negative = true;
        body = inner;
    }

    body = strip_currency(body);
    let signed = if let Some(rest) = body.strip_prefix('-') {
        Some((rest, true))
    } else if let Some(rest) = body.strip_suffix('-') {
        Some((rest, true))
    } else {
        body.strip_prefix('+').map(|rest| (rest, false))
    };
    if let Some((rest, minus)) = signed {
        if negative {
            return Err(invalid());
        }
        negative = minus;
        body = strip_currency(rest);
    }

    let decimal = format.decimal_separator();
    let group = format.group_separator();
    let mut normalized = String::with_capacity(body.len());
    for c in body.chars() {
        if c.is_ascii_digit() {
            normalized.push(c);
        } else if c == decimal {
            normalized.push('.');
        } else if c != group && !c.is_whitespace() {
            return Err(invalid());
        }
    }

    if !normalized.chars().any(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let value = Decimal::from_str(&normalized).map_err(|_| invalid())?;
    Ok(if negative { -value } else { value })
}

fn is_currency_symbol(c: char) -> bool {
    matches!(
        c,
        '$' | '€' | '£' | '¥' | '₹' | '₩' | '₽' | '₺' | '₪' | '₫' | '₱' | '₦' | '₴' | '₸' | '฿' | '¢'
    )
}

/// Drops one currency marker from each end of `s`.
fn strip_currency(s: &str) -> &str {
    let s = s
        .trim()
        .trim_start_matches(is_currency_symbol)
        .trim_end_matches(is_currency_symbol)
        .trim();

    let bytes = s.as_bytes();
    let is_code = |range: &[u8]| range.len() == 3 && range.iter().all(u8::is_ascii_alphabetic);

    let s = if bytes.len() >= 3
        && is_code(&bytes[..3])
        && bytes.get(3).map_or(true, |b| !b.is_ascii_alphabetic())
    {
        s[3..].trim_start()
    } else {
        s
    };

    let bytes = s.as_bytes();
    if bytes.len() >= 3
        && is_code(&bytes[bytes.len() - 3..])
        && (bytes.len() == 3 || !bytes[bytes.len() - 4].is_ascii_alphabetic())
    {
        s[..s.len() - 3].trim_end()
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_minor_units_by_currency() {
        assert_eq!(to_minor_units(dec("100.00"), "USD"), Some(10000));
        assert_eq!(to_minor_units(dec("-100.005"), "USD"), Some(-10001));
        assert_eq!(to_minor_units(dec("1500"), "JPY"), Some(1500));
        assert_eq!(to_minor_units(dec("1.234"), "KWD"), Some(1234));
    }

    #[test]
    fn test_offsetting_amounts_cancel_in_minor_units() {
        let a = to_minor_units(dec("-100.00"), "USD").unwrap();
        let b = to_minor_units(dec("100"), "USD").unwrap();
        assert_eq!(a + b, 0);
    }

    #[test]
    fn test_parse_amount_symbols_and_separators() {
        let f = NumberFormat::DecimalPoint;
        assert_eq!(parse_amount("$1,234.56", f).unwrap(), dec("1234.56"));
        assert_eq!(parse_amount("USD 99", f).unwrap(), dec("99"));
        assert_eq!(parse_amount(" -100.00 ", f).unwrap(), dec("-100.00"));
        assert_eq!(parse_amount("100.00-", f).unwrap(), dec("-100.00"));
        assert_eq!(parse_amount("(250.10)", f).unwrap(), dec("-250.10"));
        assert_eq!(parse_amount("$-5.00", f).unwrap(), dec("-5.00"));
    }

    #[test]
    fn test_parse_amount_decimal_comma() {
        let f = NumberFormat::DecimalComma;
        assert_eq!(parse_amount("1.234,56", f).unwrap(), dec("1234.56"));
        assert_eq!(parse_amount("-0,99 €", f).unwrap(), dec("-0.99"));
    }

    #[test]
    fn test_parse_amount_rejects_garbage() {
        let f = NumberFormat::DecimalPoint;
        assert!(parse_amount("", f).is_err());
        assert!(parse_amount("abc", f).is_err());
        assert!(parse_amount("1.2.3", f).is_err());
        assert!(parse_amount("EUR", f).is_err());
    }

    #[test]
    fn test_parse_amount_rejects_text_around_digits() {
        let f = NumberFormat::DecimalPoint;
        for raw in [
            "2024-01-05",
            "12abc34",
            "N/A 5",
            "1e3",
            "5-3",
            "Total: 7 of 9",
            "--5",
            "(-5)",
            "USDX 5",
        ] {
            assert!(parse_amount(raw, f).is_err(), "{} should not parse", raw);
        }
    }

    #[test]
    fn test_parse_amount_currency_codes_and_signs() {
        assert_eq!(
            parse_amount("5.00 usd", NumberFormat::DecimalPoint).unwrap(),
            dec("5.00")
        );
        assert_eq!(
            parse_amount("-$5.00", NumberFormat::DecimalPoint).unwrap(),
            dec("-5.00")
        );
        assert_eq!(
            parse_amount("+12", NumberFormat::DecimalPoint).unwrap(),
            dec("12")
        );
        assert_eq!(
            parse_amount("EUR 1 234,50-", NumberFormat::DecimalComma).unwrap(),
            dec("-1234.50")
        );
    }
}
