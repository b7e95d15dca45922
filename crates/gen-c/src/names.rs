//! Identifier and limit helpers shared across the generator.

/// C keywords that attribute names must not collide with.
const C_KEYWORDS: &[&str] = &[
    "auto", "bool", "break", "case", "char", "const", "continue", "default", "do", "double",
    "else", "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef", "union",
    "unsigned", "void", "volatile", "while",
];

pub fn c_upper(name: &str) -> String {
    name.to_uppercase().replace('-', "_")
}

pub fn c_lower(name: &str) -> String {
    name.to_lowercase().replace('-', "_")
}

/// Lower-cased name adjusted to be a valid, non-keyword C identifier.
pub fn c_safe_name(name: &str) -> String {
    let mut c_name = c_lower(name);
    if C_KEYWORDS.contains(&c_name.as_str()) {
        c_name.push('_');
    }
    if c_name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        c_name.insert(0, '_');
    }
    c_name
}

/// Turn a width shorthand like `u32-max` or `s64-min` into its value.
/// Computed in 128 bits so `u64-max` stays representable.
pub fn limit_to_number(name: &str) -> Result<i128, String> {
    let bad = || format!("invalid limit '{}'", name);
    let signed = match name.chars().next() {
        Some('u') => false,
        Some('s') => true,
        _ => return Err(bad()),
    };
    if !name.ends_with("-max") && !name.ends_with("-min") {
        return Err(bad());
    }
    if !signed && name.ends_with("-min") {
        return Ok(0);
    }
    let mut width: u32 = name[1..name.len() - 4].parse().map_err(|_| bad())?;
    if signed {
        width -= 1;
    }
    let value: i128 = (1i128 << width) - 1;
    if signed && name.ends_with("-min") {
        Ok(-value - 1)
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upper_and_lower_replace_dashes() {
        assert_eq!(c_upper("a-b-c"), "A_B_C");
        assert_eq!(c_lower("A-B-C"), "a_b_c");
    }

    #[test]
    fn keywords_get_a_trailing_underscore() {
        assert_eq!(c_safe_name("union"), "union_");
        assert_eq!(c_safe_name("do"), "do_");
        assert_eq!(c_safe_name("plain"), "plain");
    }

    #[test]
    fn leading_digits_get_a_prefix() {
        assert_eq!(c_safe_name("5ghz"), "_5ghz");
    }

    #[test]
    fn limit_shorthands() {
        assert_eq!(limit_to_number("u8-max").unwrap(), 255);
        assert_eq!(limit_to_number("u32-max").unwrap(), 4294967295);
        assert_eq!(limit_to_number("u64-max").unwrap(), u64::MAX as i128);
        assert_eq!(limit_to_number("u16-min").unwrap(), 0);
        assert_eq!(limit_to_number("s16-max").unwrap(), 32767);
        assert_eq!(limit_to_number("s16-min").unwrap(), -32768);
        assert_eq!(limit_to_number("s64-min").unwrap(), i64::MIN as i128);
    }
}
