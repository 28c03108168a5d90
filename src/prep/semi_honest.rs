//! Tuple generation that is correct as long as all parties follow the protocol.

use rand::Rng;
use tracing::{Level, instrument};

use crate::{
    Error,
    bit_adder,
    channel::Channel,
    field::{Field, Gf2k64},
    session::Session,
    share::{BitShare, Dabit, Edabit, InputTuple, Share, Square, Triple},
};

use super::sources::{
    BitSource, DabitSource, EdabitSource, InputSource, TripleSource, raw_edabit_length,
};

/// Generates tuples from random sharings, joint multiplications and private inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SemiHonest;

/// Random bits of this party, one vector per requested tuple.
fn random_bits(n: usize) -> Vec<bool> {
    let mut rng = rand::rng();
    (0..n).map(|_| rng.random()).collect()
}

/// XORs the bits contributed by all parties in the arithmetic domain.
///
/// Odd characteristic needs `x + y - 2xy`, one multiplication round per contributor.
async fn xor_all<C: Channel, F: Field>(
    session: &mut Session<'_, C, F>,
    by_owner: Vec<Vec<Share<F>>>,
) -> Result<Vec<Share<F>>, Error> {
    let mut contributions = by_owner.into_iter();
    let mut acc = contributions.next().unwrap_or_default();
    for bits in contributions {
        if F::CHARACTERISTIC_TWO {
            for (a, b) in acc.iter_mut().zip(bits) {
                *a += b;
            }
        } else {
            let products = session.mul(&acc, &bits).await?;
            let two = F::from_u64(2);
            for ((a, b), ab) in acc.iter_mut().zip(bits).zip(products) {
                *a = *a + b - ab * two;
            }
        }
    }
    Ok(acc)
}

/// XORs the bits contributed by all parties in the binary domain.
fn xor_binary(by_owner: Vec<Vec<BitShare>>) -> Vec<BitShare> {
    let mut contributions = by_owner.into_iter();
    let mut acc = contributions.next().unwrap_or_default();
    for bits in contributions {
        for (a, b) in acc.iter_mut().zip(bits) {
            *a += b;
        }
    }
    acc
}

impl<F: Field> TripleSource<F> for SemiHonest {
    #[instrument(level = Level::DEBUG, skip_all, fields(n = n), err)]
    async fn triples<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Vec<Triple<F>>, Error> {
        let a = session.random(n).await?;
        let b = session.random(n).await?;
        let c = session.mul(&a, &b).await?;
        Ok(a.into_iter()
            .zip(b)
            .zip(c)
            .map(|((a, b), c)| Triple { a, b, c })
            .collect())
    }

    async fn squares<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Vec<Square<F>>, Error> {
        let a = session.random(n).await?;
        let s = session.mul(&a, &a).await?;
        Ok(a.into_iter().zip(s).map(|(a, s)| Square { a, s }).collect())
    }
}

impl<F: Field> BitSource<F> for SemiHonest {
    async fn bits<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Vec<Share<F>>, Error> {
        let mine: Vec<F> = random_bits(n).into_iter().map(F::from_bit).collect();
        let by_owner = session.input_all(&mine).await?;
        xor_all(session, by_owner).await
    }
}

impl<F: Field> DabitSource<F> for SemiHonest {
    async fn dabits<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Vec<Dabit<F>>, Error> {
        let mine = random_bits(n);
        let arith: Vec<F> = mine.iter().map(|b| F::from_bit(*b)).collect();
        let binary: Vec<Gf2k64> = mine.iter().map(|b| Gf2k64::from_bit(*b)).collect();
        let arith = session.input_all(&arith).await?;
        let binary = session.input_all_binary(&binary).await?;
        let a = xor_all(session, arith).await?;
        let b = xor_binary(binary);
        Ok(a.into_iter().zip(b).map(|(a, b)| Dabit { a, b }).collect())
    }
}

impl<F: Field> EdabitSource<F> for SemiHonest {
    #[instrument(level = Level::DEBUG, skip_all, fields(n_bits = n_bits, n = n), err)]
    async fn raw_edabits<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n_bits: usize,
        n: usize,
    ) -> Result<Vec<Edabit<F>>, Error> {
        let num_players = session.player().num_players();
        let length = raw_edabit_length(n_bits, num_players);
        // the sacrifice adds two raw edaBits, which must not wrap around
        if F::CHARACTERISTIC_TWO || n_bits == 0 || length + 2 > F::BITS {
            return Err(Error::Misuse(format!(
                "{} cannot hold edaBits of {n_bits} bits for {num_players} parties",
                F::signature()
            )));
        }
        let mine: Vec<u64> = {
            let mut rng = rand::rng();
            (0..n).map(|_| rng.random::<u64>() & ((1 << n_bits) - 1)).collect()
        };
        let arith: Vec<F> = mine.iter().map(|x| F::from_u64(*x)).collect();
        let binary: Vec<Gf2k64> = mine
            .iter()
            .flat_map(|x| (0..n_bits).map(move |j| Gf2k64::from_bit(x >> j & 1 == 1)))
            .collect();
        let arith = session.input_all(&arith).await?;
        let binary = session.input_all_binary(&binary).await?;

        let mut a = vec![Share::default(); n];
        for contribution in arith {
            for (sum, x) in a.iter_mut().zip(contribution) {
                *sum += x;
            }
        }
        let operands = binary
            .into_iter()
            .map(|bits| bits.chunks(n_bits).map(<[_]>::to_vec).collect())
            .collect();
        let bits = bit_adder::sum(session, operands, length).await?;
        Ok(a.into_iter()
            .zip(bits)
            .map(|(a, bits)| Edabit { a, bits })
            .collect())
    }
}

impl<F: Field> InputSource<F> for SemiHonest {
    async fn inputs<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        owner: usize,
        n: usize,
    ) -> Result<Vec<InputTuple<F>>, Error> {
        let masks: Vec<F> = if owner == session.player().my_num() {
            let mut rng = rand::rng();
            (0..n).map(|_| F::random(&mut rng)).collect()
        } else {
            vec![]
        };
        let shares = session.input(owner, &masks, n).await?;
        Ok(shares
            .into_iter()
            .enumerate()
            .map(|(i, share)| InputTuple {
                share,
                mask: masks.get(i).copied().unwrap_or(F::ZERO),
            })
            .collect())
    }
}
