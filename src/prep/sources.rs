//! Capability traits of tuple generators.
//!
//! A buffer refills itself by asking its source for a batch of a given size. Sources compose:
//! [`crate::prep::Sacrificed`] wraps any source and checks its output before handing it on.

use std::future::Future;

use crate::{
    Error, OfflineCheck,
    channel::Channel,
    field::{Field, Gf2k64},
    session::Session,
    share::{Dabit, Edabit, InputTuple, Inverse, Share, Square, Triple},
};

/// Generates multiplication triples and squares.
pub trait TripleSource<F: Field> {
    /// Produces exactly `n` triples.
    fn triples<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> impl Future<Output = Result<Vec<Triple<F>>, Error>>;

    /// Produces exactly `n` squares.
    fn squares<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> impl Future<Output = Result<Vec<Square<F>>, Error>>;

    /// Produces `n` inverse pairs if the source stores them, otherwise they are derived from
    /// triples by the buffer.
    fn stored_inverses<C: Channel>(
        &mut self,
        _session: &mut Session<'_, C, F>,
        _n: usize,
    ) -> impl Future<Output = Result<Option<Vec<Inverse<F>>>, Error>> {
        async { Ok(None) }
    }
}

/// Generates random bits in the arithmetic domain.
pub trait BitSource<F: Field> {
    /// Produces exactly `n` shared random bits.
    fn bits<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> impl Future<Output = Result<Vec<Share<F>>, Error>>;
}

/// Generates random bits shared in both domains.
pub trait DabitSource<F: Field> {
    /// Produces exactly `n` daBits.
    fn dabits<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> impl Future<Output = Result<Vec<Dabit<F>>, Error>>;
}

/// Generates random integers shared in the arithmetic domain together with their bits.
pub trait EdabitSource<F: Field>: DabitSource<F> {
    /// Produces exactly `n` edaBits whose integers are sums of one `n_bits`-bit contribution per
    /// party. They carry [`raw_edabit_length`] bits.
    fn raw_edabits<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n_bits: usize,
        n: usize,
    ) -> impl Future<Output = Result<Vec<Edabit<F>>, Error>>;

    /// Produces exactly `n` edaBits of `n_bits` bits.
    ///
    /// Strict edaBits encode an integer below `2^n_bits`. Loose ones only agree with their bits
    /// modulo `2^n_bits`, which is cheaper because no daBits are spent on removing the carries.
    fn edabits<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        strict: bool,
        n_bits: usize,
        n: usize,
    ) -> impl Future<Output = Result<Vec<Edabit<F>>, Error>> {
        async move {
            let raw = self.raw_edabits(session, n_bits, n).await?;
            if strict {
                let extra = raw_edabit_length(n_bits, session.player().num_players()) - n_bits;
                let dabits = self.dabits(session, n * extra).await?;
                sanitize(session, raw, dabits, n_bits).await
            } else {
                Ok(raw
                    .into_iter()
                    .map(|mut e| {
                        e.bits.truncate(n_bits);
                        e
                    })
                    .collect())
            }
        }
    }
}

/// Generates tuples for private inputs.
pub trait InputSource<F: Field> {
    /// Produces exactly `n` input tuples of `owner`.
    fn inputs<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        owner: usize,
        n: usize,
    ) -> impl Future<Output = Result<Vec<InputTuple<F>>, Error>>;
}

/// The bit length of a sum of `num_players` integers of `n_bits` bits.
pub fn raw_edabit_length(n_bits: usize, num_players: usize) -> usize {
    n_bits + (usize::BITS - (num_players - 1).leading_zeros()) as usize
}

/// Turns raw edaBits into strict edaBits of `n_bits` bits, using one daBit per removed bit.
///
/// For every bit `b_j` with `j >= n_bits`, `b_j ^ d` is opened for a fresh daBit `(m, d)`; the
/// arithmetic share of `b_j` is then `x + m - 2xm` for the opened `x`, and `2^j` times it is
/// subtracted from the integer.
///
/// Openings pending from before are MAC-checked on their own first, so that only a failure on the
/// masked bits counts as a failed offline check.
pub async fn sanitize<C: Channel, F: Field>(
    session: &mut Session<'_, C, F>,
    raw: Vec<Edabit<F>>,
    dabits: Vec<Dabit<F>>,
    n_bits: usize,
) -> Result<Vec<Edabit<F>>, Error> {
    let extra: usize = raw.iter().map(|e| e.bits.len().saturating_sub(n_bits)).sum();
    if dabits.len() < extra {
        return Err(Error::Misuse(format!(
            "{extra} daBits needed for sanitizing, got {}",
            dabits.len()
        )));
    }
    session.check().await?;
    let masked: Vec<_> = raw
        .iter()
        .flat_map(|e| e.bits.iter().skip(n_bits))
        .zip(&dabits)
        .map(|(b, d)| *b + d.b)
        .collect();
    let opened = session.open_binary(&masked).await?;
    let alpha = session.alpha();
    let two = F::from_u64(2);
    let mut opened = opened.into_iter().zip(&dabits);
    let mut sanitized = Vec::with_capacity(raw.len());
    for mut edabit in raw {
        for j in n_bits..edabit.bits.len() {
            let Some((x, dabit)) = opened.next() else {
                return Err(Error::Misuse("too few masked bits opened".to_string()));
            };
            let x = if x == Gf2k64::ZERO {
                F::ZERO
            } else if x == Gf2k64::ONE {
                F::ONE
            } else {
                return Err(Error::OfflineCheckFailed(OfflineCheck::EdabitSanitize));
            };
            // b_j = x + m - 2xm with x public
            let bit = dabit.a * (F::ONE - two * x) + Share::constant(x, alpha);
            edabit.a -= bit * two.pow(j as u64);
        }
        edabit.bits.truncate(n_bits);
        sanitized.push(edabit);
    }
    session.check().await.map_err(Error::offline)?;
    Ok(sanitized)
}
