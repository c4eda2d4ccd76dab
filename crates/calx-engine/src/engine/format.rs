use super::Dynamic;

/// Format a Dynamic value for display.
///
/// - bool -> `true` / `false`
/// - integers (signed or unsigned) -> decimal
/// - floats -> shortest decimal that round-trips
/// - strings and chars -> themselves
/// - unit -> empty string
/// - anything else -> the value's type name
pub fn format_value(value: &Dynamic) -> String {
    if value.is_unit() {
        String::new()
    } else if let Ok(b) = value.as_bool() {
        b.to_string()
    } else if let Ok(n) = value.as_int() {
        n.to_string()
    } else if let Ok(n) = value.as_float() {
        format_float(n)
    } else if let Ok(c) = value.as_char() {
        c.to_string()
    } else if value.is_string() {
        value.clone().into_string().unwrap_or_default()
    } else if let Some(n) = value.clone().try_cast::<u64>() {
        n.to_string()
    } else if let Some(n) = value.clone().try_cast::<u32>() {
        n.to_string()
    } else if let Some(n) = value.clone().try_cast::<i32>() {
        n.to_string()
    } else if let Some(n) = value.clone().try_cast::<f32>() {
        n.to_string()
    } else {
        value.type_name().to_string()
    }
}

/// Format a float as the shortest decimal string that parses back to `n`.
pub fn format_float(n: f64) -> String {
    format!("{}", n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bool() {
        assert_eq!(format_value(&Dynamic::from(true)), "true");
        assert_eq!(format_value(&Dynamic::from(false)), "false");
    }

    #[test]
    fn test_format_integers() {
        assert_eq!(format_value(&Dynamic::from(-42_i64)), "-42");
        assert_eq!(format_value(&Dynamic::from(7_u64)), "7");
        assert_eq!(format_value(&Dynamic::from(u32::MAX)), "4294967295");
    }

    #[test]
    fn test_format_floats_round_trip() {
        assert_eq!(format_value(&Dynamic::from(3.0_f64)), "3");
        assert_eq!(format_value(&Dynamic::from(0.1_f64)), "0.1");
        assert_eq!(format_value(&Dynamic::from(1.5_f32)), "1.5");

        let third = 1.0_f64 / 3.0;
        let shown = format_value(&Dynamic::from(third));
        assert_eq!(shown.parse::<f64>().unwrap(), third);
    }

    #[test]
    fn test_format_strings() {
        assert_eq!(format_value(&Dynamic::from("hello".to_string())), "hello");
        assert_eq!(format_value(&Dynamic::from('x')), "x");
        assert_eq!(format_value(&Dynamic::UNIT), "");
    }

    #[test]
    fn test_format_fallback_uses_type_name() {
        let array = Dynamic::from_array(vec![Dynamic::from(1_i64)]);
        assert_eq!(format_value(&array), "array");
    }
}
