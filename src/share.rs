//! Authenticated Shamir shares and the correlated-randomness tuples built from them.
//!
//! Party `i` holds the evaluation at `x = i + 1` of a degree-`t` polynomial whose constant term
//! is the secret, together with the evaluation of a second polynomial sharing `alpha * secret`,
//! where `alpha` is the (itself Shamir-shared) global MAC key. Shares are linear: adding shares or
//! scaling them by public values works locally, multiplying two shares needs a protocol round.

use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Error, field::Field, field::Gf2k64};

/// The share of one party of a secret value and of its MAC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Share<F: Field> {
    /// This party's share of the value.
    pub value: F,
    /// This party's share of `alpha * value`.
    pub mac: F,
}

/// A share in the binary domain, used for the bits of daBits and edaBits.
pub type BitShare = Share<Gf2k64>;

impl<F: Field> Share<F> {
    /// Length of the packed encoding.
    pub const SIZE: usize = 2 * F::BYTES;

    /// Creates a share from its value and MAC parts.
    pub fn new(value: F, mac: F) -> Self {
        Share { value, mac }
    }

    /// The share of the public constant `c`, given this party's share of the MAC key.
    ///
    /// Every party holds `c` itself, which is a valid degree-0 sharing.
    pub fn constant(c: F, alpha: F) -> Self {
        Share {
            value: c,
            mac: alpha * c,
        }
    }

    /// Adds the public constant `c` to the shared value.
    pub fn add_public(self, c: F, alpha: F) -> Self {
        self + Self::constant(c, alpha)
    }

    /// Appends `value ‖ mac` to `buf`.
    pub fn pack(&self, buf: &mut Vec<u8>) {
        self.value.pack(buf);
        self.mac.pack(buf);
    }

    /// Decodes a share from the first [`Share::SIZE`] bytes of `bytes`.
    pub fn unpack(bytes: &[u8]) -> Result<Self, Error> {
        let value = F::unpack(bytes)?;
        let mac = F::unpack(bytes.get(F::BYTES..).unwrap_or_default())?;
        Ok(Share { value, mac })
    }
}

impl<F: Field> Add for Share<F> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Share {
            value: self.value + rhs.value,
            mac: self.mac + rhs.mac,
        }
    }
}

impl<F: Field> Sub for Share<F> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Share {
            value: self.value - rhs.value,
            mac: self.mac - rhs.mac,
        }
    }
}

impl<F: Field> Neg for Share<F> {
    type Output = Self;

    fn neg(self) -> Self {
        Share {
            value: -self.value,
            mac: -self.mac,
        }
    }
}

impl<F: Field> AddAssign for Share<F> {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<F: Field> SubAssign for Share<F> {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

/// Scaling by a public value.
impl<F: Field> Mul<F> for Share<F> {
    type Output = Self;

    fn mul(self, rhs: F) -> Self {
        Share {
            value: self.value * rhs,
            mac: self.mac * rhs,
        }
    }
}

/// The Shamir threshold for `n` parties with an honest majority.
pub fn threshold(n: usize) -> usize {
    (n - 1) / 2
}

/// The evaluation point of party `i`.
pub(crate) fn point<F: Field>(i: usize) -> F {
    F::from_u64(i as u64 + 1)
}

/// Splits `secret` into `n` evaluations of a random polynomial of degree `t`.
pub(crate) fn deal<F: Field, R: Rng + ?Sized>(
    secret: F,
    t: usize,
    n: usize,
    rng: &mut R,
) -> Vec<F> {
    let coefficients: Vec<F> = (0..t).map(|_| F::random(rng)).collect();
    (0..n)
        .map(|i| {
            let x = point::<F>(i);
            // Horner's rule, constant term last
            let mut y = F::ZERO;
            for c in coefficients.iter().rev() {
                y = (y + *c) * x;
            }
            y + secret
        })
        .collect()
}

/// The Lagrange coefficients for interpolating `f(0)` from the evaluations of all `n` parties.
///
/// These are valid for every polynomial of degree below `n`, which covers both degree-`t`
/// shares and degree-`2t` products.
pub(crate) fn lagrange_at_zero<F: Field>(n: usize) -> Result<Vec<F>, Error> {
    let points: Vec<F> = (0..n).map(point).collect();
    if points.contains(&F::ZERO) {
        return Err(Error::SetupMismatch(format!(
            "{} has too few elements for {n} evaluation points",
            F::signature()
        )));
    }
    (0..n)
        .map(|i| {
            let mut num = F::ONE;
            let mut den = F::ONE;
            for j in (0..n).filter(|j| *j != i) {
                num *= points[j];
                den *= points[j] - points[i];
            }
            den.inverse().map(|inv| num * inv).ok_or_else(|| {
                Error::SetupMismatch(format!(
                    "{} has too few elements for {n} evaluation points",
                    F::signature()
                ))
            })
        })
        .collect()
}

/// Reconstructs a secret from the evaluations of all parties.
pub(crate) fn reconstruct<F: Field>(shares: &[F], lagrange: &[F]) -> F {
    shares
        .iter()
        .zip(lagrange)
        .fold(F::ZERO, |acc, (s, l)| acc + *s * *l)
}

/// A multiplication triple `(a, b, c)` with `c = a * b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Triple<F: Field> {
    /// The first factor.
    pub a: Share<F>,
    /// The second factor.
    pub b: Share<F>,
    /// The product.
    pub c: Share<F>,
}

/// A square `(a, s)` with `s = a * a`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Square<F: Field> {
    /// The random value.
    pub a: Share<F>,
    /// Its square.
    pub s: Share<F>,
}

/// An inverse pair `(a, i)` with `a * i = 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Inverse<F: Field> {
    /// The random nonzero value.
    pub a: Share<F>,
    /// Its inverse.
    pub inv: Share<F>,
}

/// The same random bit shared in the arithmetic and in the binary domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Dabit<F: Field> {
    /// The arithmetic share.
    pub a: Share<F>,
    /// The binary share.
    pub b: BitShare,
}

/// A random integer shared in the arithmetic domain together with its bits in the binary domain.
///
/// Bit 0 is the least significant one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Edabit<F: Field> {
    /// The arithmetic share of the integer.
    pub a: Share<F>,
    /// The binary shares of the bits.
    pub bits: Vec<BitShare>,
}

/// A bit-major batch of edaBits as consumed by vectorized online code.
///
/// `b[j][i]` is bit `j` of the `i`-th edaBit whose arithmetic share is `a[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct EdabitVec<F: Field> {
    /// The arithmetic shares.
    pub a: Vec<Share<F>>,
    /// The binary shares, one vector per bit position.
    pub b: Vec<Vec<BitShare>>,
}

impl<F: Field> EdabitVec<F> {
    /// Maximum number of edaBits in one batch.
    pub const MAX_SIZE: usize = 64;

    /// Groups edaBits of `n_bits` bits into bit-major batches of up to [`EdabitVec::MAX_SIZE`].
    pub fn from_edabits(edabits: Vec<Edabit<F>>, n_bits: usize) -> Vec<Self> {
        let mut vecs = vec![];
        let mut current = EdabitVec {
            a: vec![],
            b: vec![vec![]; n_bits],
        };
        for e in edabits {
            current.a.push(e.a);
            for (column, bit) in current.b.iter_mut().zip(e.bits) {
                column.push(bit);
            }
            if current.a.len() == Self::MAX_SIZE {
                vecs.push(std::mem::replace(
                    &mut current,
                    EdabitVec {
                        a: vec![],
                        b: vec![vec![]; n_bits],
                    },
                ));
            }
        }
        if !current.a.is_empty() {
            vecs.push(current);
        }
        vecs
    }

    /// The number of edaBits in this batch.
    pub fn len(&self) -> usize {
        self.a.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }

    /// The `i`-th edaBit of the batch.
    pub fn get(&self, i: usize) -> Option<Edabit<F>> {
        let a = *self.a.get(i)?;
        let bits = self
            .b
            .iter()
            .map(|column| column.get(i).copied())
            .collect::<Option<Vec<_>>>()?;
        Some(Edabit { a, bits })
    }
}

/// A tuple for injecting a private input of party `owner`.
///
/// The owner knows `mask` in the clear, all other parties hold `mask = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct InputTuple<F: Field> {
    /// The share of the random mask.
    pub share: Share<F>,
    /// The mask in the clear at the owner.
    pub mask: F,
}

/// Fixed-width packing of tuples, used for persisted preprocessing.
pub trait Packed: Sized {
    /// Length of the packed encoding.
    fn size(n_bits: usize) -> usize;
    /// Appends the packed encoding to `buf`.
    fn pack(&self, buf: &mut Vec<u8>);
    /// Decodes a tuple of `n_bits` bits (ignored by fixed-size tuples).
    fn unpack(bytes: &[u8], n_bits: usize) -> Result<Self, Error>;
}

fn shares_at<F: Field>(bytes: &[u8], i: usize) -> Result<Share<F>, Error> {
    Share::unpack(bytes.get(i * Share::<F>::SIZE..).unwrap_or_default())
}

impl<F: Field> Packed for Share<F> {
    fn size(_: usize) -> usize {
        Self::SIZE
    }

    fn pack(&self, buf: &mut Vec<u8>) {
        Share::pack(self, buf)
    }

    fn unpack(bytes: &[u8], _: usize) -> Result<Self, Error> {
        Share::unpack(bytes)
    }
}

impl<F: Field> Packed for Triple<F> {
    fn size(_: usize) -> usize {
        3 * Share::<F>::SIZE
    }

    fn pack(&self, buf: &mut Vec<u8>) {
        self.a.pack(buf);
        self.b.pack(buf);
        self.c.pack(buf);
    }

    fn unpack(bytes: &[u8], _: usize) -> Result<Self, Error> {
        Ok(Triple {
            a: shares_at(bytes, 0)?,
            b: shares_at(bytes, 1)?,
            c: shares_at(bytes, 2)?,
        })
    }
}

impl<F: Field> Packed for Square<F> {
    fn size(_: usize) -> usize {
        2 * Share::<F>::SIZE
    }

    fn pack(&self, buf: &mut Vec<u8>) {
        self.a.pack(buf);
        self.s.pack(buf);
    }

    fn unpack(bytes: &[u8], _: usize) -> Result<Self, Error> {
        Ok(Square {
            a: shares_at(bytes, 0)?,
            s: shares_at(bytes, 1)?,
        })
    }
}

impl<F: Field> Packed for Inverse<F> {
    fn size(_: usize) -> usize {
        2 * Share::<F>::SIZE
    }

    fn pack(&self, buf: &mut Vec<u8>) {
        self.a.pack(buf);
        self.inv.pack(buf);
    }

    fn unpack(bytes: &[u8], _: usize) -> Result<Self, Error> {
        Ok(Inverse {
            a: shares_at(bytes, 0)?,
            inv: shares_at(bytes, 1)?,
        })
    }
}

impl<F: Field> Packed for Dabit<F> {
    fn size(_: usize) -> usize {
        Share::<F>::SIZE + BitShare::SIZE
    }

    fn pack(&self, buf: &mut Vec<u8>) {
        self.a.pack(buf);
        self.b.pack(buf);
    }

    fn unpack(bytes: &[u8], _: usize) -> Result<Self, Error> {
        Ok(Dabit {
            a: Share::unpack(bytes)?,
            b: Share::unpack(bytes.get(Share::<F>::SIZE..).unwrap_or_default())?,
        })
    }
}

impl<F: Field> Packed for Edabit<F> {
    fn size(n_bits: usize) -> usize {
        Share::<F>::SIZE + n_bits * BitShare::SIZE
    }

    fn pack(&self, buf: &mut Vec<u8>) {
        self.a.pack(buf);
        for bit in &self.bits {
            bit.pack(buf);
        }
    }

    fn unpack(bytes: &[u8], n_bits: usize) -> Result<Self, Error> {
        let a = Share::unpack(bytes)?;
        let rest = bytes.get(Share::<F>::SIZE..).unwrap_or_default();
        let bits = (0..n_bits)
            .map(|j| shares_at::<Gf2k64>(rest, j))
            .collect::<Result<_, _>>()?;
        Ok(Edabit { a, bits })
    }
}

impl<F: Field> Packed for InputTuple<F> {
    fn size(_: usize) -> usize {
        Share::<F>::SIZE + F::BYTES
    }

    fn pack(&self, buf: &mut Vec<u8>) {
        self.share.pack(buf);
        self.mask.pack(buf);
    }

    fn unpack(bytes: &[u8], _: usize) -> Result<Self, Error> {
        Ok(InputTuple {
            share: Share::unpack(bytes)?,
            mask: F::unpack(bytes.get(Share::<F>::SIZE..).unwrap_or_default())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::rng;

    use super::*;
    use crate::field::{Fp251, Mersenne61};

    #[test]
    fn deal_and_reconstruct() {
        let mut rng = rng();
        for n in [3, 4, 5, 7] {
            let lagrange = lagrange_at_zero::<Mersenne61>(n).unwrap();
            let secret = Mersenne61::random(&mut rng);
            let shares = deal(secret, threshold(n), n, &mut rng);
            assert_eq!(reconstruct(&shares, &lagrange), secret);
        }
    }

    #[test]
    fn products_of_shares_reconstruct() {
        let mut rng = rng();
        let n = 5;
        let lagrange = lagrange_at_zero::<Fp251>(n).unwrap();
        let (x, y) = (Fp251::from_u64(17), Fp251::from_u64(100));
        let xs = deal(x, threshold(n), n, &mut rng);
        let ys = deal(y, threshold(n), n, &mut rng);
        let products: Vec<_> = xs.iter().zip(&ys).map(|(a, b)| *a * *b).collect();
        assert_eq!(reconstruct(&products, &lagrange), x * y);
    }

    #[test]
    fn binary_field_sharing() {
        let mut rng = rng();
        let n = 4;
        let lagrange = lagrange_at_zero::<Gf2k64>(n).unwrap();
        let shares = deal(Gf2k64::ONE, threshold(n), n, &mut rng);
        assert_eq!(reconstruct(&shares, &lagrange), Gf2k64::ONE);
    }

    #[test]
    fn public_constants_are_authenticated() {
        let mut rng = rng();
        let n = 3;
        let lagrange = lagrange_at_zero::<Fp251>(n).unwrap();
        let alpha = Fp251::from_u64(42);
        let alphas = deal(alpha, threshold(n), n, &mut rng);
        let c = Fp251::from_u64(9);
        let shares: Vec<_> = alphas.iter().map(|a| Share::constant(c, *a)).collect();
        let values: Vec<_> = shares.iter().map(|s| s.value).collect();
        let macs: Vec<_> = shares.iter().map(|s| s.mac).collect();
        assert_eq!(reconstruct(&values, &lagrange), c);
        assert_eq!(reconstruct(&macs, &lagrange), alpha * c);
    }

    #[test]
    fn too_small_field_is_rejected() {
        assert!(matches!(
            lagrange_at_zero::<Fp251>(251),
            Err(Error::SetupMismatch(_))
        ));
    }

    #[test]
    fn edabit_vec_layout() {
        let bit = |b| BitShare::new(Gf2k64::from_bit(b), Gf2k64::ZERO);
        let edabits: Vec<_> = (0..70u64)
            .map(|i| Edabit {
                a: Share::new(Mersenne61::from_u64(i), Mersenne61::ZERO),
                bits: vec![bit(i & 1 == 1), bit(i & 2 == 2)],
            })
            .collect();
        let vecs = EdabitVec::from_edabits(edabits.clone(), 2);
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[0].len(), 64);
        assert_eq!(vecs[1].len(), 6);
        assert_eq!(vecs[1].b[1][3], bit(67 & 2 == 2));
        assert_eq!(vecs[1].get(3), Some(edabits[67].clone()));
    }

    #[test]
    fn packed_tuples() -> Result<(), Error> {
        let s = |x| Share::new(Mersenne61::from_u64(x), Mersenne61::from_u64(x + 1));
        let triple = Triple {
            a: s(1),
            b: s(2),
            c: s(3),
        };
        let edabit = Edabit {
            a: s(5),
            bits: vec![BitShare::new(Gf2k64::ONE, Gf2k64::from_u64(77)); 3],
        };
        let mut buf = vec![];
        triple.pack(&mut buf);
        Packed::pack(&edabit, &mut buf);
        assert_eq!(buf.len(), Triple::<Mersenne61>::size(0) + Edabit::<Mersenne61>::size(3));
        assert_eq!(<Triple<Mersenne61> as Packed>::unpack(&buf, 0)?, triple);
        let rest = &buf[Triple::<Mersenne61>::size(0)..];
        assert_eq!(<Edabit<Mersenne61> as Packed>::unpack(rest, 3)?, edabit);
        assert!(<Edabit<Mersenne61> as Packed>::unpack(&rest[..20], 3).is_err());
        Ok(())
    }
}
