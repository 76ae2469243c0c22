use std::fmt;

fn read_float_and_factor_from_env(var: &str) -> Option<(f64, usize)> {
    let mut value = std::env::var(var).ok()?.trim().to_string();

    if value.is_empty() {
        return None;
    }

    if value.len() > 1 && (value.ends_with('b') || value.ends_with('B')) {
        value.pop();
    }

    let factor = match value.as_bytes()[value.len() - 1] {
        b'g' | b'G' => 1024 * 1024 * 1024,
        b'm' | b'M' => 1024 * 1024,
        b'k' | b'K' => 1024,
        _ => 1,
    };

    let realvalue = if factor != 1 {
        &value[0..value.len() - 1]
    } else {
        value.as_str()
    };

    realvalue.parse::<f64>().ok().map(|x| (x, factor))
}

/// Reads an unsigned integer from the environment. Accepts `k`, `m` and `g`
/// suffixes (optionally followed by `b`), e.g. `REMSET_CHUNK_SIZE=256k`.
pub fn read_uint_from_env(var: &str) -> Option<usize> {
    let (value, factor) = read_float_and_factor_from_env(var)?;

    if value < 0.0 {
        return None;
    }

    Some((value * factor as f64) as usize)
}

pub fn read_bool_from_env(var: &str) -> Option<bool> {
    let value = std::env::var(var).ok()?;

    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub struct FormattedSize {
    pub size: f64,
}

impl fmt::Display for FormattedSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let ksize = self.size / 1024f64;

        if ksize < 1f64 {
            return write!(f, "{}B", self.size);
        }

        let msize = ksize / 1024f64;

        if msize < 1f64 {
            return write!(f, "{:.1}K", ksize);
        }

        let gsize = msize / 1024f64;

        if gsize < 8f64 {
            write!(f, "{:.1}M", msize)
        } else {
            write!(f, "{:.1}G", gsize)
        }
    }
}

impl fmt::Debug for FormattedSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

pub fn formatted_size(size: usize) -> FormattedSize {
    FormattedSize { size: size as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatted_size() {
        assert_eq!(formatted_size(100).to_string(), "100B");
        assert_eq!(formatted_size(2048).to_string(), "2.0K");
        assert_eq!(formatted_size(3 * 1024 * 1024).to_string(), "3.0M");
    }

    #[test]
    fn test_read_uint_from_env() {
        std::env::set_var("REMSET_TEST_UINT_PLAIN", "4096");
        std::env::set_var("REMSET_TEST_UINT_KB", "256k");
        std::env::set_var("REMSET_TEST_UINT_MB", "2MB");
        std::env::set_var("REMSET_TEST_UINT_BAD", "lots");
        std::env::set_var("REMSET_TEST_UINT_FRACTION", "1.5m");

        assert_eq!(read_uint_from_env("REMSET_TEST_UINT_PLAIN"), Some(4096));
        assert_eq!(read_uint_from_env("REMSET_TEST_UINT_KB"), Some(256 * 1024));
        assert_eq!(read_uint_from_env("REMSET_TEST_UINT_MB"), Some(2 * 1024 * 1024));
        assert_eq!(read_uint_from_env("REMSET_TEST_UINT_BAD"), None);
        assert_eq!(read_uint_from_env("REMSET_TEST_UINT_FRACTION"), Some(1536 * 1024));
        assert_eq!(read_uint_from_env("REMSET_TEST_UINT_MISSING"), None);
    }

    #[test]
    fn test_read_bool_from_env() {
        std::env::set_var("REMSET_TEST_BOOL_ON", "yes");
        std::env::set_var("REMSET_TEST_BOOL_OFF", "0");

        assert_eq!(read_bool_from_env("REMSET_TEST_BOOL_ON"), Some(true));
        assert_eq!(read_bool_from_env("REMSET_TEST_BOOL_OFF"), Some(false));
        assert_eq!(read_bool_from_env("REMSET_TEST_BOOL_MISSING"), None);
    }
}
