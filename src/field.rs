//! Finite fields used as the value type of shares.
//!
//! The arithmetic domain is a prime field [`Fp`], the binary domain (bits of daBits and edaBits)
//! is [`Gf2k64`], where addition is XOR and multiplication of 0/1 values is AND.

use std::{
    fmt::{self, Debug, Display},
    hash::Hash,
    ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign},
};

use rand::Rng;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::Error;

/// The operations the preprocessing engine needs from a field.
pub trait Field:
    Copy
    + Debug
    + Display
    + Default
    + Eq
    + Hash
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + Serialize
    + DeserializeOwned
{
    /// The additive identity.
    const ZERO: Self;
    /// The multiplicative identity.
    const ONE: Self;
    /// Bit length of the largest field element (as an integer).
    const BITS: usize;
    /// Length of the fixed-width wire encoding.
    const BYTES: usize;
    /// Whether `1 + 1 = 0`.
    const CHARACTERISTIC_TWO: bool;

    /// Maps an integer into the field.
    ///
    /// For prime fields this reduces modulo the prime, for binary fields the bits of `x` are
    /// the coefficients of the polynomial.
    fn from_u64(x: u64) -> Self;

    /// The canonical integer representative, inverse of [`Field::from_u64`] on its image.
    fn to_u64(self) -> u64;

    /// Samples a uniformly random element.
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self;

    /// The multiplicative inverse, `None` for zero.
    fn inverse(self) -> Option<Self>;

    /// A square root, `None` if `self` is not a square.
    fn sqrt(self) -> Option<Self>;

    /// Identifies the field in file headers and setup agreement.
    fn signature() -> String;

    /// Appends the fixed-width big-endian encoding to `buf`.
    fn pack(&self, buf: &mut Vec<u8>) {
        let bytes = self.to_u64().to_be_bytes();
        buf.extend_from_slice(&bytes[8 - Self::BYTES..]);
    }

    /// Decodes the first [`Field::BYTES`] bytes of `bytes`.
    fn unpack(bytes: &[u8]) -> Result<Self, Error> {
        let Some(bytes) = bytes.get(..Self::BYTES) else {
            return Err(Error::Decode(format!(
                "{} needs {} bytes, got {}",
                Self::signature(),
                Self::BYTES,
                bytes.len()
            )));
        };
        let mut be = [0; 8];
        be[8 - Self::BYTES..].copy_from_slice(bytes);
        let x = u64::from_be_bytes(be);
        let value = Self::from_u64(x);
        if value.to_u64() != x {
            return Err(Error::Decode(format!(
                "{x} is out of range for {}",
                Self::signature()
            )));
        }
        Ok(value)
    }

    /// Raises `self` to the power `e`.
    fn pow(self, mut e: u64) -> Self {
        let mut base = self;
        let mut acc = Self::ONE;
        while e > 0 {
            if e & 1 == 1 {
                acc *= base;
            }
            base *= base;
            e >>= 1;
        }
        acc
    }

    /// `0` or `1` depending on `bit`.
    fn from_bit(bit: bool) -> Self {
        if bit { Self::ONE } else { Self::ZERO }
    }

    /// Whether the element is `0` or `1`.
    fn is_bit(self) -> bool {
        self == Self::ZERO || self == Self::ONE
    }
}

/// The prime field of integers modulo `P`.
///
/// `P` must be an odd prime below `2^62`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Fp<const P: u64>(u64);

/// The prime field with 251 elements.
pub type Fp251 = Fp<251>;

/// The prime field modulo the Mersenne prime `2^61 - 1`.
pub type Mersenne61 = Fp<{ (1 << 61) - 1 }>;

impl<const P: u64> Fp<P> {
    /// The modulus.
    pub const MODULUS: u64 = P;
}

impl<const P: u64> TryFrom<u64> for Fp<P> {
    type Error = String;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value < P {
            Ok(Fp(value))
        } else {
            Err(format!("{value} is not reduced modulo {P}"))
        }
    }
}

impl<const P: u64> From<Fp<P>> for u64 {
    fn from(value: Fp<P>) -> Self {
        value.0
    }
}

impl<const P: u64> Display for Fp<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<const P: u64> Add for Fp<P> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        let sum = self.0 + rhs.0;
        Fp(if sum >= P { sum - P } else { sum })
    }
}

impl<const P: u64> Sub for Fp<P> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        if self.0 >= rhs.0 {
            Fp(self.0 - rhs.0)
        } else {
            Fp(self.0 + P - rhs.0)
        }
    }
}

impl<const P: u64> Mul for Fp<P> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Fp(((self.0 as u128 * rhs.0 as u128) % P as u128) as u64)
    }
}

impl<const P: u64> Neg for Fp<P> {
    type Output = Self;

    fn neg(self) -> Self {
        if self.0 == 0 { self } else { Fp(P - self.0) }
    }
}

impl<const P: u64> AddAssign for Fp<P> {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<const P: u64> SubAssign for Fp<P> {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl<const P: u64> MulAssign for Fp<P> {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl<const P: u64> Field for Fp<P> {
    const ZERO: Self = Fp(0);
    const ONE: Self = Fp(1);
    const BITS: usize = (u64::BITS - P.leading_zeros()) as usize;
    const BYTES: usize = Self::BITS.div_ceil(8);
    const CHARACTERISTIC_TWO: bool = false;

    fn from_u64(x: u64) -> Self {
        Fp(x % P)
    }

    fn to_u64(self) -> u64 {
        self.0
    }

    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Fp(rng.random_range(0..P))
    }

    fn inverse(self) -> Option<Self> {
        if self.0 == 0 {
            None
        } else {
            Some(self.pow(P - 2))
        }
    }

    /// Tonelli-Shanks.
    fn sqrt(self) -> Option<Self> {
        if self.0 == 0 {
            return Some(self);
        }
        if self.pow((P - 1) / 2) != Self::ONE {
            return None;
        }
        let mut q = P - 1;
        let mut s = 0;
        while q % 2 == 0 {
            q /= 2;
            s += 1;
        }
        let mut z = Fp(2);
        while z.pow((P - 1) / 2) == Self::ONE {
            z = z + Self::ONE;
        }
        let mut m = s;
        let mut c = z.pow(q);
        let mut t = self.pow(q);
        let mut r = self.pow(q.div_ceil(2));
        while t != Self::ONE {
            let mut i = 0;
            let mut t2 = t;
            while t2 != Self::ONE {
                t2 *= t2;
                i += 1;
            }
            let b = c.pow(1 << (m - i - 1));
            m = i;
            c = b * b;
            t *= c;
            r *= b;
        }
        Some(r)
    }

    fn signature() -> String {
        format!("p{P}")
    }
}

/// The binary field GF(2^64), reduced modulo `x^64 + x^4 + x^3 + x + 1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gf2k64(u64);

const GF2K64_REDUCTION: u64 = 0b1_1011;

fn clmul(a: u64, b: u64) -> u128 {
    let mut r = 0u128;
    for i in 0..64 {
        if (b >> i) & 1 == 1 {
            r ^= (a as u128) << i;
        }
    }
    r
}

fn reduce(x: u128) -> u64 {
    let (hi, lo) = ((x >> 64) as u64, x as u64);
    let folded = clmul(hi, GF2K64_REDUCTION);
    let (hi, lo) = ((folded >> 64) as u64, lo ^ folded as u64);
    lo ^ clmul(hi, GF2K64_REDUCTION) as u64
}

impl Display for Gf2k64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl Add for Gf2k64 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Gf2k64(self.0 ^ rhs.0)
    }
}

impl Sub for Gf2k64 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Gf2k64(self.0 ^ rhs.0)
    }
}

impl Mul for Gf2k64 {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Gf2k64(reduce(clmul(self.0, rhs.0)))
    }
}

impl Neg for Gf2k64 {
    type Output = Self;

    fn neg(self) -> Self {
        self
    }
}

impl AddAssign for Gf2k64 {
    fn add_assign(&mut self, rhs: Self) {
        self.0 ^= rhs.0;
    }
}

impl SubAssign for Gf2k64 {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 ^= rhs.0;
    }
}

impl MulAssign for Gf2k64 {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl Field for Gf2k64 {
    const ZERO: Self = Gf2k64(0);
    const ONE: Self = Gf2k64(1);
    const BITS: usize = 64;
    const BYTES: usize = 8;
    const CHARACTERISTIC_TWO: bool = true;

    fn from_u64(x: u64) -> Self {
        Gf2k64(x)
    }

    fn to_u64(self) -> u64 {
        self.0
    }

    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Gf2k64(rng.random())
    }

    fn inverse(self) -> Option<Self> {
        if self.0 == 0 {
            return None;
        }
        // a^(2^64 - 2) = a^(2 + 4 + ... + 2^63)
        let mut acc = Self::ONE;
        let mut square = self;
        for _ in 1..64 {
            square *= square;
            acc *= square;
        }
        Some(acc)
    }

    /// Squaring is a bijection, so every element is a square: `sqrt(a) = a^(2^63)`.
    fn sqrt(self) -> Option<Self> {
        let mut r = self;
        for _ in 0..63 {
            r *= r;
        }
        Some(r)
    }

    fn signature() -> String {
        "gf2k64".to_string()
    }
}
