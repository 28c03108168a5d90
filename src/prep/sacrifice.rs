//! Upgrading semi-honestly generated tuples to malicious security.
//!
//! Candidates are permuted with a jointly tossed seed. The first `C` candidates are opened and
//! checked directly (cut-and-choose); the rest is split into buckets of `B` where one tuple
//! survives and the others are spent on checking it. Every opened value is MAC-checked before the
//! survivors are released.

use rand::seq::SliceRandom;
use tracing::{Level, debug, instrument};

use crate::{
    Error, OfflineCheck,
    bit_adder::{self, compose},
    channel::Channel,
    field::{Field, Gf2k64},
    session::Session,
    share::{Dabit, Edabit, InputTuple, Share, Square, Triple},
};

use super::sources::{BitSource, DabitSource, EdabitSource, InputSource, TripleSource};

/// Bucket checks per worker range.
const GRANULARITY: usize = 256;

/// Bucket layout of a sacrifice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShuffleSacrifice {
    /// Tuples per bucket, one of which survives.
    pub bucket_size: usize,
    /// Tuples opened for cut-and-choose.
    pub cut: usize,
}

impl ShuffleSacrifice {
    /// A layout with buckets of `bucket_size`, opening as many tuples for cut-and-choose.
    pub fn new(bucket_size: usize) -> Self {
        ShuffleSacrifice {
            bucket_size,
            cut: bucket_size,
        }
    }

    /// The number of candidates needed for `n` survivors.
    pub fn minimum_n_inputs(&self, n: usize) -> usize {
        n * self.bucket_size + self.cut
    }

    /// Permutes the candidates with shared randomness, then splits off the cut-and-choose part.
    ///
    /// Openings still pending from before the sacrifice are MAC-checked first, so that a failure
    /// there is reported as [`Error::MacCheckFailed`] rather than as a failed sacrifice.
    ///
    /// Returns `(opened, rest)`; `rest` has exactly `minimum_n_inputs(n) - cut` elements.
    async fn shuffle<C: Channel, F: Field, T>(
        &self,
        session: &mut Session<'_, C, F>,
        mut candidates: Vec<T>,
        n: usize,
    ) -> Result<(Vec<T>, Vec<T>), Error> {
        let needed = self.minimum_n_inputs(n);
        if candidates.len() != needed {
            return Err(Error::Misuse(format!(
                "sacrifice of {n} needs {needed} candidates, got {}",
                candidates.len()
            )));
        }
        session.check().await?;
        let mut rng = session.shared_rng().await?;
        candidates.shuffle(&mut rng);
        let rest = candidates.split_off(self.cut);
        Ok((candidates, rest))
    }

    /// Indices `(kept, checking)` of bucket members for `n` survivors.
    fn buckets(&self, n: usize) -> Vec<(usize, usize)> {
        let b = self.bucket_size;
        (0..n)
            .flat_map(move |i| (1..b).map(move |j| (i, i + n * j)))
            .collect()
    }

    /// Checks triples: cut-and-choose on `c = ab`, then every survivor `(a, b, c)` against its
    /// bucket mates `(f, g, h)` through `c - h - b(a - f) - f(b - g) = 0`.
    #[instrument(level = Level::DEBUG, skip_all, fields(n = n), err)]
    pub async fn triple_sacrifice<C: Channel, F: Field>(
        &self,
        session: &mut Session<'_, C, F>,
        candidates: Vec<Triple<F>>,
        n: usize,
    ) -> Result<Vec<Triple<F>>, Error> {
        let (opened, rest) = self.shuffle(session, candidates, n).await?;
        let shares: Vec<_> = opened.iter().flat_map(|t| [t.a, t.b, t.c]).collect();
        let values = session.open(&shares).await?;
        if values.chunks_exact(3).any(|v| v[0] * v[1] != v[2]) {
            return Err(Error::OfflineCheckFailed(OfflineCheck::TripleCutAndChoose));
        }

        let buckets = self.buckets(n);
        let queues = session.queues().clone();
        let masks = queues.distribute(buckets.len(), GRANULARITY, |range| {
            range
                .flat_map(|m| {
                    let (i, k) = buckets[m];
                    [rest[i].a - rest[k].a, rest[i].b - rest[k].b]
                })
                .collect()
        });
        let rho_sigma = session.open(&masks).await?;
        let zeros = queues.distribute(buckets.len(), GRANULARITY, |range| {
            range
                .map(|m| {
                    let (kept, check) = (rest[buckets[m].0], rest[buckets[m].1]);
                    let (rho, sigma) = (rho_sigma[2 * m], rho_sigma[2 * m + 1]);
                    kept.c - check.c - kept.b * rho - check.a * sigma
                })
                .collect()
        });
        session
            .check_for_zero(&zeros, OfflineCheck::TripleSacrifice)
            .await?;
        session.check().await.map_err(Error::offline)?;
        debug!(n, "triples sacrificed");
        Ok(rest.into_iter().take(n).collect())
    }

    /// Checks squares: cut-and-choose on `s = a²`, then every survivor `(a, s)` against its
    /// bucket mates `(f, t)` through `s - t - (a - f)(a + f) = 0`.
    pub async fn square_sacrifice<C: Channel, F: Field>(
        &self,
        session: &mut Session<'_, C, F>,
        candidates: Vec<Square<F>>,
        n: usize,
    ) -> Result<Vec<Square<F>>, Error> {
        let (opened, rest) = self.shuffle(session, candidates, n).await?;
        let shares: Vec<_> = opened.iter().flat_map(|s| [s.a, s.s]).collect();
        let values = session.open(&shares).await?;
        if values.chunks_exact(2).any(|v| v[0] * v[0] != v[1]) {
            return Err(Error::OfflineCheckFailed(OfflineCheck::SquareCutAndChoose));
        }

        let buckets = self.buckets(n);
        let queues = session.queues().clone();
        let masks = queues.distribute(buckets.len(), GRANULARITY, |range| {
            range
                .map(|m| rest[buckets[m].0].a - rest[buckets[m].1].a)
                .collect()
        });
        let rho = session.open(&masks).await?;
        let zeros = queues.distribute(buckets.len(), GRANULARITY, |range| {
            range
                .map(|m| {
                    let (kept, check) = (rest[buckets[m].0], rest[buckets[m].1]);
                    kept.s - check.s - (kept.a + check.a) * rho[m]
                })
                .collect()
        });
        session
            .check_for_zero(&zeros, OfflineCheck::SquareSacrifice)
            .await?;
        session.check().await.map_err(Error::offline)?;
        Ok(rest.into_iter().take(n).collect())
    }

    /// Checks daBits: cut-and-choose on both halves being the same bit, then every survivor
    /// against its bucket mates by comparing the XOR computed in both domains.
    #[instrument(level = Level::DEBUG, skip_all, fields(n = n), err)]
    pub async fn dabit_sacrifice<C: Channel, F: Field>(
        &self,
        session: &mut Session<'_, C, F>,
        candidates: Vec<Dabit<F>>,
        n: usize,
    ) -> Result<Vec<Dabit<F>>, Error> {
        let (opened, rest) = self.shuffle(session, candidates, n).await?;
        let arith: Vec<_> = opened.iter().map(|d| d.a).collect();
        let binary: Vec<_> = opened.iter().map(|d| d.b).collect();
        let arith = session.open(&arith).await?;
        let binary = session.open_binary(&binary).await?;
        if arith
            .iter()
            .zip(&binary)
            .any(|(a, b)| !same_bit(*a, *b))
        {
            return Err(Error::OfflineCheckFailed(OfflineCheck::DabitCutAndChoose));
        }

        let buckets = self.buckets(n);
        let (kept, checks): (Vec<_>, Vec<_>) = buckets
            .iter()
            .map(|(i, k)| (rest[*i].a, rest[*k].a))
            .unzip();
        let products = session.mul(&kept, &checks).await?;
        let two = F::from_u64(2);
        let queues = session.queues().clone();
        let arith = queues.distribute(buckets.len(), GRANULARITY, |range| {
            range
                .map(|m| kept[m] + checks[m] - products[m] * two)
                .collect()
        });
        let binary = queues.distribute(buckets.len(), GRANULARITY, |range| {
            range
                .map(|m| rest[buckets[m].0].b + rest[buckets[m].1].b)
                .collect()
        });
        let arith = session.open(&arith).await?;
        let binary = session.open_binary(&binary).await?;
        if arith
            .iter()
            .zip(&binary)
            .any(|(a, b)| !same_bit(*a, *b))
        {
            return Err(Error::OfflineCheckFailed(OfflineCheck::DabitSacrifice));
        }
        session.check().await.map_err(Error::offline)?;
        Ok(rest.into_iter().take(n).collect())
    }

    /// Checks raw edaBits: cut-and-choose on the bits recomposing to the integer, then every
    /// survivor against its bucket mates by adding them in both domains.
    #[instrument(level = Level::DEBUG, skip_all, fields(n = n), err)]
    pub async fn edabit_sacrifice<C: Channel, F: Field>(
        &self,
        session: &mut Session<'_, C, F>,
        candidates: Vec<Edabit<F>>,
        n: usize,
    ) -> Result<Vec<Edabit<F>>, Error> {
        let length = candidates.first().map_or(0, |e| e.bits.len());
        if candidates.iter().any(|e| e.bits.len() != length) || length >= 64 {
            return Err(Error::Misuse("edaBits of unusable bit lengths".to_string()));
        }
        let (opened, rest) = self.shuffle(session, candidates, n).await?;
        let arith: Vec<_> = opened.iter().map(|e| e.a).collect();
        let binary: Vec<_> = opened.iter().flat_map(|e| e.bits.iter().copied()).collect();
        let arith = session.open(&arith).await?;
        let binary = session.open_binary(&binary).await?;
        if !recomposes(&arith, &binary, length) {
            return Err(Error::OfflineCheckFailed(OfflineCheck::EdabitCutAndChoose));
        }

        let buckets = self.buckets(n);
        let sums = session
            .queues()
            .distribute(buckets.len(), GRANULARITY, |range| {
                range
                    .map(|m| rest[buckets[m].0].a + rest[buckets[m].1].a)
                    .collect()
            });
        let (xs, ys): (Vec<_>, Vec<_>) = buckets
            .iter()
            .map(|(i, k)| (rest[*i].bits.clone(), rest[*k].bits.clone()))
            .unzip();
        let bit_sums = bit_adder::add(session, &xs, &ys, length + 1).await?;
        let arith = session.open(&sums).await?;
        let binary: Vec<_> = bit_sums.into_iter().flatten().collect();
        let binary = session.open_binary(&binary).await?;
        if !recomposes(&arith, &binary, length + 1) {
            return Err(Error::OfflineCheckFailed(OfflineCheck::EdabitSacrifice));
        }
        session.check().await.map_err(Error::offline)?;
        Ok(rest.into_iter().take(n).collect())
    }
}

fn same_bit<F: Field>(a: F, b: Gf2k64) -> bool {
    a.is_bit() && b.is_bit() && (a == F::ONE) == (b == Gf2k64::ONE)
}

/// Whether every opened integer equals the integer of its `length` opened bits.
fn recomposes<F: Field>(arith: &[F], binary: &[Gf2k64], length: usize) -> bool {
    if length == 0 {
        return arith.iter().all(|a| *a == F::ZERO);
    }
    binary.len() == arith.len() * length
        && arith
            .iter()
            .zip(binary.chunks_exact(length))
            .all(|(a, bits)| compose(bits).is_some_and(|x| F::from_u64(x) == *a))
}

/// Wraps a tuple source and sacrifices everything it produces.
#[derive(Debug, Clone)]
pub struct Sacrificed<S> {
    inner: S,
    sacrifice: ShuffleSacrifice,
}

impl<S> Sacrificed<S> {
    /// Sacrifices the output of `inner` in buckets of `bucket_size`.
    pub fn new(inner: S, bucket_size: usize) -> Self {
        Sacrificed {
            inner,
            sacrifice: ShuffleSacrifice::new(bucket_size),
        }
    }

    /// The bucket layout.
    pub fn sacrifice(&self) -> ShuffleSacrifice {
        self.sacrifice
    }
}

impl<F: Field, S: TripleSource<F>> TripleSource<F> for Sacrificed<S> {
    async fn triples<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Vec<Triple<F>>, Error> {
        let candidates = self
            .inner
            .triples(session, self.sacrifice.minimum_n_inputs(n))
            .await?;
        self.sacrifice.triple_sacrifice(session, candidates, n).await
    }

    async fn squares<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Vec<Square<F>>, Error> {
        let candidates = self
            .inner
            .squares(session, self.sacrifice.minimum_n_inputs(n))
            .await?;
        self.sacrifice.square_sacrifice(session, candidates, n).await
    }
}

impl<F: Field, S: TripleSource<F> + DabitSource<F>> BitSource<F> for Sacrificed<S> {
    /// Bits from squares in odd characteristic: for `s = a²` opened, `(a / √s + 1) / 2` is a bit
    /// since `a / √s = ±1`. In characteristic two, the arithmetic halves of daBits.
    async fn bits<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Vec<Share<F>>, Error> {
        if F::CHARACTERISTIC_TWO {
            let dabits = self.dabits(session, n).await?;
            return Ok(dabits.into_iter().map(|d| d.a).collect());
        }
        let half = F::from_u64(2)
            .inverse()
            .ok_or_else(|| Error::Misuse(format!("2 is not invertible in {}", F::signature())))?;
        let mut bits = Vec::with_capacity(n);
        while bits.len() < n {
            let squares = self.squares(session, n - bits.len()).await?;
            let shares: Vec<_> = squares.iter().map(|s| s.s).collect();
            let opened = session.open(&shares).await?;
            let alpha = session.alpha();
            for (square, s) in squares.into_iter().zip(opened) {
                if s == F::ZERO {
                    continue;
                }
                let root_inv = s
                    .sqrt()
                    .and_then(F::inverse)
                    .ok_or(Error::OfflineCheckFailed(OfflineCheck::BitFromSquare))?;
                bits.push((square.a * root_inv).add_public(F::ONE, alpha) * half);
            }
            session.check().await.map_err(Error::offline)?;
        }
        Ok(bits)
    }
}

impl<F: Field, S: DabitSource<F>> DabitSource<F> for Sacrificed<S> {
    async fn dabits<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Vec<Dabit<F>>, Error> {
        let candidates = self
            .inner
            .dabits(session, self.sacrifice.minimum_n_inputs(n))
            .await?;
        self.sacrifice.dabit_sacrifice(session, candidates, n).await
    }
}

impl<F: Field, S: EdabitSource<F>> EdabitSource<F> for Sacrificed<S> {
    async fn raw_edabits<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n_bits: usize,
        n: usize,
    ) -> Result<Vec<Edabit<F>>, Error> {
        let candidates = self
            .inner
            .raw_edabits(session, n_bits, self.sacrifice.minimum_n_inputs(n))
            .await?;
        self.sacrifice.edabit_sacrifice(session, candidates, n).await
    }
}

impl<F: Field, S: InputSource<F>> InputSource<F> for Sacrificed<S> {
    async fn inputs<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        owner: usize,
        n: usize,
    ) -> Result<Vec<InputTuple<F>>, Error> {
        self.inner.inputs(session, owner, n).await
    }
}
