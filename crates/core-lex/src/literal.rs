//! Verilog numeric literals decomposed into value and x/z masks.
//!
//! A literal like `8'b10xz_01?1` carries three parallel bit planes: the
//! known-value bits, the bits that are `x`, and the bits that are `z` (`?`
//! reads as `z`). Widths are unbounded, so the planes are big integers.

use std::fmt;
use std::sync::LazyLock;

use num_bigint::BigUint;
use num_traits::Zero;
use regex::Regex;

static UNSIZED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]+$").expect("static"));
static BIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<size>[0-9]*)'[bB](?P<bin>[01_zxZX?]+)$").expect("static"));
static DEC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<size>[0-9]*)'[dD](?P<dec>[0-9_]+)$").expect("static"));
static HEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<size>[0-9]*)'[hH](?P<hex>[0-9a-fA-F_zxZX?]+)$").expect("static")
});

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NumberError {
    #[error("malformed number literal \"{0}\"")]
    Malformed(String),
    #[error("number literal \"{0}\" has zero size")]
    ZeroSize(String),
}

/// `(size_bits, value, xmask, zmask, original_text)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerilogNumber {
    pub size: u32,
    pub value: BigUint,
    pub xmask: BigUint,
    pub zmask: BigUint,
    pub orig: String,
}

impl VerilogNumber {
    pub fn parse(text: &str) -> Result<Self, NumberError> {
        if UNSIZED.is_match(text) {
            return Ok(Self {
                size: 32,
                value: BigUint::parse_bytes(text.as_bytes(), 10)
                    .ok_or_else(|| NumberError::Malformed(text.to_string()))?,
                xmask: BigUint::zero(),
                zmask: BigUint::zero(),
                orig: text.to_string(),
            });
        }
        if let Some(caps) = BIN.captures(text) {
            let digits = normalize(&caps["bin"]);
            let value = masked_radix(&digits, 2, |c| matches!(c, '0' | '1'), text)?;
            let xmask = plane(&digits, 2, 'x', text)?;
            let zmask = plane(&digits, 2, 'z', text)?;
            return Ok(Self {
                size: parse_size(caps.name("size").map(|m| m.as_str()).unwrap_or(""), text)?,
                value,
                xmask,
                zmask,
                orig: text.to_string(),
            });
        }
        if let Some(caps) = HEX.captures(text) {
            let digits = normalize(&caps["hex"]);
            let value = masked_radix(&digits, 16, |c| c.is_ascii_hexdigit(), text)?;
            let xmask = plane(&digits, 16, 'x', text)?;
            let zmask = plane(&digits, 16, 'z', text)?;
            return Ok(Self {
                size: parse_size(caps.name("size").map(|m| m.as_str()).unwrap_or(""), text)?,
                value,
                xmask,
                zmask,
                orig: text.to_string(),
            });
        }
        if let Some(caps) = DEC.captures(text) {
            let digits: String = caps["dec"].chars().filter(|&c| c != '_').collect();
            return Ok(Self {
                size: parse_size(caps.name("size").map(|m| m.as_str()).unwrap_or(""), text)?,
                value: BigUint::parse_bytes(digits.as_bytes(), 10)
                    .ok_or_else(|| NumberError::Malformed(text.to_string()))?,
                xmask: BigUint::zero(),
                zmask: BigUint::zero(),
                orig: text.to_string(),
            });
        }
        Err(NumberError::Malformed(text.to_string()))
    }

    /// Render as a canonical sized binary literal, keeping x/z digits.
    /// Leading zero bits beyond the highest set bit of any plane collapse.
    pub fn as_bin(&self) -> String {
        let mut chars = Vec::new();
        for i in 0..u64::from(self.size) {
            let rest_empty = (&self.value >> i).is_zero()
                && (&self.xmask >> i).is_zero()
                && (&self.zmask >> i).is_zero();
            if rest_empty {
                break;
            }
            if self.xmask.bit(i) {
                chars.push('x');
            } else if self.zmask.bit(i) {
                chars.push('z');
            } else if self.value.bit(i) {
                chars.push('1');
            } else {
                chars.push('0');
            }
        }
        if chars.is_empty() {
            chars.push('0');
        }
        chars.reverse();
        format!("{}'b{}", self.size, chars.into_iter().collect::<String>())
    }
}

impl fmt::Display for VerilogNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.orig)
    }
}

/// Strip `_`, lowercase, and fold `?` into `z`.
fn normalize(digits: &str) -> String {
    digits
        .chars()
        .filter(|&c| c != '_')
        .map(|c| match c.to_ascii_lowercase() {
            '?' => 'z',
            c => c,
        })
        .collect()
}

/// The value plane: x/z digits read as zero.
fn masked_radix(
    digits: &str,
    radix: u32,
    is_value: fn(char) -> bool,
    orig: &str,
) -> Result<BigUint, NumberError> {
    let folded: String = digits
        .chars()
        .map(|c| if is_value(c) { c } else { '0' })
        .collect();
    BigUint::parse_bytes(folded.as_bytes(), radix)
        .ok_or_else(|| NumberError::Malformed(orig.to_string()))
}

/// The x or z plane: the marked digit becomes all-ones in its position,
/// everything else zero.
fn plane(digits: &str, radix: u32, mark: char, orig: &str) -> Result<BigUint, NumberError> {
    let folded: String = digits
        .chars()
        .map(|c| {
            if c == mark {
                if radix == 16 { 'f' } else { '1' }
            } else {
                '0'
            }
        })
        .collect();
    BigUint::parse_bytes(folded.as_bytes(), radix)
        .ok_or_else(|| NumberError::Malformed(orig.to_string()))
}

fn parse_size(size: &str, orig: &str) -> Result<u32, NumberError> {
    if size.is_empty() {
        return Ok(32);
    }
    let n: u32 = size
        .parse()
        .map_err(|_| NumberError::Malformed(orig.to_string()))?;
    if n == 0 {
        return Err(NumberError::ZeroSize(orig.to_string()));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsized_decimal_is_32_bits() {
        let n = VerilogNumber::parse("42").unwrap();
        assert_eq!(n.size, 32);
        assert_eq!(n.value, BigUint::from(42u32));
        assert!(n.xmask.is_zero() && n.zmask.is_zero());
    }

    #[test]
    fn sized_binary_with_x_z_and_question() {
        let n = VerilogNumber::parse("8'b1_0xz?101").unwrap();
        assert_eq!(n.size, 8);
        // digits: 1 0 x z z 1 0 1 -> value reads x/z as 0
        assert_eq!(n.value, BigUint::from(0b1000_0101u32));
        assert_eq!(n.xmask, BigUint::from(0b0010_0000u32));
        assert_eq!(n.zmask, BigUint::from(0b0001_1000u32));
    }

    #[test]
    fn hex_planes_expand_to_nibbles() {
        let n = VerilogNumber::parse("16'hAxZ_3").unwrap();
        assert_eq!(n.size, 16);
        assert_eq!(n.value, BigUint::from(0xA003u32));
        assert_eq!(n.xmask, BigUint::from(0x0F00u32));
        assert_eq!(n.zmask, BigUint::from(0x00F0u32));
    }

    #[test]
    fn sized_decimal() {
        let n = VerilogNumber::parse("10'd1_023").unwrap();
        assert_eq!((n.size, n.value), (10, BigUint::from(1023u32)));
    }

    #[test]
    fn zero_size_is_rejected() {
        assert_eq!(
            VerilogNumber::parse("0'b1"),
            Err(NumberError::ZeroSize("0'b1".to_string()))
        );
    }

    #[test]
    fn as_bin_round_trips_planes() {
        let n = VerilogNumber::parse("8'b10xz01").unwrap();
        assert_eq!(n.as_bin(), "8'b10xz01");
        let zero = VerilogNumber::parse("4'b0").unwrap();
        assert_eq!(zero.as_bin(), "4'b0");
    }
}
