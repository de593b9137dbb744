#![forbid(unsafe_code)]

//! Byte-count strings as printed by `top` and `iptables`.

use regex::Regex;
use std::sync::LazyLock;

static SUFFIXED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)([0-9]+)(?:\.([0-9]+))?([kmg])$").expect("static size pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SizeError {
    #[error("`{0}` is not a byte count")]
    Malformed(String),

    #[error("`{0}` does not fit in 64 bits")]
    Overflow(String),
}

/// Convert a byte count to bytes.
///
/// Accepts a bare unsigned integer (`"4096"`) or a number followed by one of
/// the binary units `k`, `m`, `g` in either case (`"1536k"`, `"1.5G"`), where
/// the units are powers of 1024. Fractional results are truncated.
///
/// # Examples
///
/// ```
/// # use collector::units::parse_size;
/// assert_eq!(parse_size("4096"), Ok(4096));
/// assert_eq!(parse_size("1536k"), Ok(1536 * 1024));
/// assert_eq!(parse_size("2M"), Ok(2 * 1024 * 1024));
/// assert_eq!(parse_size("0.5g"), Ok(512 * 1024 * 1024));
/// assert!(parse_size("-5").is_err());
/// assert!(parse_size("12x").is_err());
/// ```
pub fn parse_size(text: &str) -> Result<u64, SizeError> {
    let malformed = || SizeError::Malformed(text.to_owned());
    let overflow = || SizeError::Overflow(text.to_owned());

    if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
        return text.parse().map_err(|_| overflow());
    }

    let caps = SUFFIXED.captures(text).ok_or_else(malformed)?;
    let shift = match caps[3].to_ascii_lowercase().as_str() {
        "k" => 10,
        "m" => 20,
        _ => 30,
    };

    let whole: u64 = caps[1].parse().map_err(|_| overflow())?;
    let mut bytes = whole.checked_mul(1 << shift).ok_or_else(overflow)?;

    if let Some(fraction) = caps.get(2) {
        let fraction: f64 = format!("0.{}", fraction.as_str())
            .parse()
            .map_err(|_| malformed())?;
        let extra = (fraction * (1u64 << shift) as f64) as u64;
        bytes = bytes.checked_add(extra).ok_or_else(overflow)?;
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_non_sizes() {
        for bad in ["", "k", "1.5", "-5", "-5k", "1kk", "1 k", "12x", "1.k", "k1", "1e3"] {
            assert_eq!(parse_size(bad), Err(SizeError::Malformed(bad.to_owned())));
        }
    }

    #[test]
    fn only_ascii_digits_count() {
        for bad in ["\u{663}k", "1\u{663}m", "\u{663}\u{660}"] {
            assert_eq!(parse_size(bad), Err(SizeError::Malformed(bad.to_owned())));
        }
    }

    #[test]
    fn overflow_is_reported() {
        assert!(matches!(
            parse_size("99999999999999999999"),
            Err(SizeError::Overflow(_))
        ));
        assert!(matches!(
            parse_size("17179869184g"),
            Err(SizeError::Overflow(_))
        ));
    }

    proptest! {
        #[test]
        fn suffixed_numbers_scale_by_1024(
            number in 0u64..(1 << 33),
            (unit, exp) in prop_oneof![
                Just(("k", 1u32)), Just(("K", 1)),
                Just(("m", 2)), Just(("M", 2)),
                Just(("g", 3)), Just(("G", 3)),
            ],
        ) {
            let text = format!("{number}{unit}");
            prop_assert_eq!(parse_size(&text), Ok(number * 1024u64.pow(exp)));
        }

        #[test]
        fn bare_integers_are_bytes(number in any::<u64>()) {
            prop_assert_eq!(parse_size(&number.to_string()), Ok(number));
        }

        #[test]
        fn digitless_text_is_rejected(text in "[^0-9]*") {
            prop_assert!(parse_size(&text).is_err());
        }
    }
}
