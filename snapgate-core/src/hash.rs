//! Row-wise difference hashing for screenshots.
//!
//! A [`PerceptualHash`] is an arbitrary-width bit vector. Hashes derived from
//! images encode, row by row, whether each pixel of a small grayscale raster
//! is strictly brighter than its left neighbour. Global brightness shifts and
//! resampling noise rarely flip that sign, so two renderings of the same page
//! land within a few bits of each other.
//!
//! # Bit length
//!
//! A bit budget of `b` yields a raster of side `n = floor(sqrt(b))` and a hash
//! of `n * (n - 1)` bits, not `b` bits: the first pixel of every row has no
//! left neighbour. The default budget of 1024 gives 992 bits. Stored
//! baselines depend on this layout, so it must not change.
//!
//! # Usage
//!
//! ```no_run
//! use snapgate_core::PerceptualHash;
//!
//! let expected = image::open("expected.png").unwrap();
//! let actual = image::open("actual.png").unwrap();
//! let a = PerceptualHash::derive(&expected, 1024);
//! let b = PerceptualHash::derive(&actual, 1024);
//! let same = a.equal(&b, 6);
//! ```

use std::fmt;
use std::str::FromStr;

use image::DynamicImage;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, SnapgateError};
use crate::imageops;

/// Default bit budget (a 32x32 raster).
pub const DEFAULT_HASH_BITS: u32 = 1024;

/// Default Hamming distance below which two hashes are considered equal.
pub const DEFAULT_THRESHOLD: u32 = 6;

/// Textual marker of an absent hash. Not a base-62 digit, so no present
/// hash can render to it.
pub const ABSENT_MARKER: &str = "-";

const BASE62_DIGITS: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Perceptual hash as a little-endian vector of 64-bit limbs.
///
/// Limbs are kept normalized (no trailing zero limbs) so that equal numbers
/// compare equal regardless of how they were produced. The absent hash is a
/// distinct value from zero; arithmetic treats it as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PerceptualHash {
    limbs: Option<Vec<u64>>,
}

impl PerceptualHash {
    /// The absent hash (no value recorded).
    pub fn absent() -> Self {
        Self { limbs: None }
    }

    /// A present hash with no bits set.
    pub fn zero() -> Self {
        Self {
            limbs: Some(Vec::new()),
        }
    }

    pub fn from_u64(value: u64) -> Self {
        Self::from_limbs(vec![value])
    }

    /// Build from little-endian limbs.
    pub fn from_limbs(limbs: Vec<u64>) -> Self {
        let mut hash = Self { limbs: Some(limbs) };
        hash.normalize();
        hash
    }

    pub fn is_absent(&self) -> bool {
        self.limbs.is_none()
    }

    /// Number of bits a given budget actually produces.
    pub fn bit_len(bits: u32) -> u32 {
        let side = grid_side(bits);
        side * side.saturating_sub(1)
    }

    /// Derive the hash of an image for the given bit budget.
    pub fn derive(image: &DynamicImage, bits: u32) -> Self {
        let side = grid_side(bits);
        if side < 2 {
            return Self::zero();
        }
        let gray = imageops::grayscale_downsample(image, side, side);

        let mut hash = Self::zero();
        let mut n = 0usize;
        for y in 0..side {
            let mut left = gray.get_pixel(0, y)[0];
            for x in 1..side {
                let right = gray.get_pixel(x, y)[0];
                if right > left {
                    hash.set_bit(n);
                }
                n += 1;
                left = right;
            }
        }
        hash
    }

    pub fn bit(&self, n: usize) -> bool {
        self.limbs()
            .get(n / 64)
            .is_some_and(|limb| limb & (1u64 << (n % 64)) != 0)
    }

    /// Bitwise XOR: the bits on which two hashes disagree.
    pub fn xor(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| a ^ b)
    }

    /// Bitwise OR: the union of two differences.
    pub fn or(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| a | b)
    }

    pub fn count_ones(&self) -> u32 {
        self.limbs().iter().map(|limb| limb.count_ones()).sum()
    }

    /// Hamming distance (population count of the XOR).
    pub fn distance(&self, other: &Self) -> u32 {
        let (a, b) = (self.limbs(), other.limbs());
        (0..a.len().max(b.len()))
            .map(|i| {
                let x = a.get(i).copied().unwrap_or(0);
                let y = b.get(i).copied().unwrap_or(0);
                (x ^ y).count_ones()
            })
            .sum()
    }

    /// True when the hashes differ in at most `threshold` bits.
    pub fn equal(&self, other: &Self, threshold: u32) -> bool {
        self.distance(other) <= threshold
    }

    /// The XOR difference together with the equality verdict.
    pub fn difference(&self, other: &Self, threshold: u32) -> (Self, bool) {
        let diff = self.xor(other);
        let equal = diff.count_ones() <= threshold;
        (diff, equal)
    }

    fn limbs(&self) -> &[u64] {
        self.limbs.as_deref().unwrap_or(&[])
    }

    fn set_bit(&mut self, n: usize) {
        let limbs = self.limbs.get_or_insert_with(Vec::new);
        let index = n / 64;
        if limbs.len() <= index {
            limbs.resize(index + 1, 0);
        }
        limbs[index] |= 1u64 << (n % 64);
    }

    fn zip_with(&self, other: &Self, op: impl Fn(u64, u64) -> u64) -> Self {
        let (a, b) = (self.limbs(), other.limbs());
        let limbs = (0..a.len().max(b.len()))
            .map(|i| op(a.get(i).copied().unwrap_or(0), b.get(i).copied().unwrap_or(0)))
            .collect();
        Self::from_limbs(limbs)
    }

    fn normalize(&mut self) {
        if let Some(limbs) = self.limbs.as_mut() {
            while limbs.last() == Some(&0) {
                limbs.pop();
            }
        }
    }

    fn to_base62(&self) -> String {
        let limbs = self.limbs();
        if limbs.is_empty() {
            return "0".to_string();
        }

        let mut value = limbs.to_vec();
        let mut digits = Vec::new();
        while !value.is_empty() {
            let mut rem: u128 = 0;
            for limb in value.iter_mut().rev() {
                let acc = (rem << 64) | u128::from(*limb);
                *limb = (acc / 62) as u64;
                rem = acc % 62;
            }
            digits.push(BASE62_DIGITS[rem as usize]);
            while value.last() == Some(&0) {
                value.pop();
            }
        }
        digits.reverse();
        String::from_utf8(digits).unwrap_or_default()
    }

    fn from_base62(text: &str) -> Result<Self> {
        if text.is_empty() {
            return Err(SnapgateError::InvalidHash("empty hash string".into()));
        }

        let mut limbs: Vec<u64> = Vec::new();
        for c in text.bytes() {
            let digit = match c {
                b'0'..=b'9' => c - b'0',
                b'a'..=b'z' => c - b'a' + 10,
                b'A'..=b'Z' => c - b'A' + 36,
                _ => {
                    return Err(SnapgateError::InvalidHash(format!(
                        "invalid base-62 digit {:?} in {text:?}",
                        c as char
                    )))
                }
            };
            let mut carry = u128::from(digit);
            for limb in limbs.iter_mut() {
                let acc = u128::from(*limb) * 62 + carry;
                *limb = acc as u64;
                carry = acc >> 64;
            }
            if carry > 0 {
                limbs.push(carry as u64);
            }
        }
        Ok(Self::from_limbs(limbs))
    }
}

fn grid_side(bits: u32) -> u32 {
    f64::from(bits).sqrt().floor() as u32
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_absent() {
            f.write_str(ABSENT_MARKER)
        } else {
            f.write_str(&self.to_base62())
        }
    }
}

impl FromStr for PerceptualHash {
    type Err = SnapgateError;

    fn from_str(s: &str) -> Result<Self> {
        if s == ABSENT_MARKER {
            return Ok(Self::absent());
        }
        Self::from_base62(s)
    }
}

impl Serialize for PerceptualHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if self.is_absent() {
            serializer.serialize_none()
        } else {
            serializer.serialize_str(&self.to_base62())
        }
    }
}

impl<'de> Deserialize<'de> for PerceptualHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(Self::absent()),
            Some(text) => Self::from_base62(&text).map_err(serde::de::Error::custom),
        }
    }
}
