/// Parse a finite number, accepting a decimal comma.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(',', ".");
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// First number embedded in a token such as `6X`, `10 MV FFF` or `X06`.
pub fn embedded_number(raw: &str) -> Option<f64> {
    let start = raw.find(|c: char| c.is_ascii_digit())?;
    let tail = &raw[start..];
    let end = tail
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(tail.len());
    parse_number(&tail[..end])
}

/// Numbers separated by `,` or `;`; unreadable entries are dropped.
pub fn parse_number_list(raw: &str) -> Vec<f64> {
    raw.split(&[',', ';'][..])
        .filter_map(parse_number)
        .collect()
}

/// Compact number formatting: `6`, `6.5`, `0.125`.
pub fn format_number(value: f64) -> String {
    let text = format!("{value:.3}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_helpers() {
        assert_eq!(parse_number(" 1,5 "), Some(1.5));
        assert_eq!(parse_number("inf"), None);
        assert_eq!(embedded_number("X06"), Some(6.0));
        assert_eq!(embedded_number("FFF"), None);
        assert_eq!(format_number(6.0), "6");
        assert_eq!(format_number(0.125), "0.125");
        assert_eq!(format_number(-0.0001), "0");
    }

    #[test]
    fn number_lists() {
        assert_eq!(parse_number_list("0.00;5.00;10.00"), vec![0.0, 5.0, 10.0]);
        assert_eq!(parse_number_list("5, 7.5, x"), vec![5.0, 7.5]);
        assert!(parse_number_list("").is_empty());
    }
}
