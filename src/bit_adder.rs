//! Ripple-carry addition of secret-shared bit vectors in the binary domain.

use crate::{Error, channel::Channel, field::Field, session::Session, share::BitShare};

/// Adds `xs[i] + ys[i]` for every `i` and returns the lowest `out_bits` bits of each sum.
///
/// Operands are little-endian bit vectors and may be shorter than `out_bits`; missing bits are
/// zero. All sums are computed together, one multiplication round per carry.
pub async fn add<C: Channel, F: Field>(
    session: &mut Session<'_, C, F>,
    xs: &[Vec<BitShare>],
    ys: &[Vec<BitShare>],
    out_bits: usize,
) -> Result<Vec<Vec<BitShare>>, Error> {
    if xs.len() != ys.len() {
        return Err(Error::Misuse(format!(
            "cannot add {} to {} bit vectors",
            xs.len(),
            ys.len()
        )));
    }
    let bit = |v: &[BitShare], j: usize| v.get(j).copied().unwrap_or_default();
    let m = xs.len();
    let mut carries = vec![BitShare::default(); m];
    let mut sums = vec![Vec::with_capacity(out_bits); m];
    for j in 0..out_bits {
        for i in 0..m {
            sums[i].push(bit(&xs[i], j) + bit(&ys[i], j) + carries[i]);
        }
        if j + 1 == out_bits {
            break;
        }
        // carry = maj(x, y, c) = ((x ^ c) & (y ^ c)) ^ c
        let left: Vec<BitShare> = (0..m).map(|i| bit(&xs[i], j) + carries[i]).collect();
        let right: Vec<BitShare> = (0..m).map(|i| bit(&ys[i], j) + carries[i]).collect();
        let products = session.mul_binary(&left, &right).await?;
        for (carry, p) in carries.iter_mut().zip(products) {
            *carry += p;
        }
    }
    Ok(sums)
}

/// Sums several batches of bit vectors elementwise: the result holds, for every `i`, the lowest
/// `out_bits` bits of `operands[0][i] + operands[1][i] + ...`.
///
/// Operands are added pairwise in a tree, so the round count grows with the logarithm of the
/// number of operands.
pub async fn sum<C: Channel, F: Field>(
    session: &mut Session<'_, C, F>,
    operands: Vec<Vec<Vec<BitShare>>>,
    out_bits: usize,
) -> Result<Vec<Vec<BitShare>>, Error> {
    let mut level = operands;
    while level.len() > 1 {
        let odd = if level.len() % 2 == 1 { level.pop() } else { None };
        let mut xs = vec![];
        let mut ys = vec![];
        let mut sizes = vec![];
        let mut pairs = level.into_iter();
        while let (Some(x), Some(y)) = (pairs.next(), pairs.next()) {
            if x.len() != y.len() {
                return Err(Error::Misuse("operands of different batch sizes".to_string()));
            }
            sizes.push(x.len());
            xs.extend(x);
            ys.extend(y);
        }
        let mut sums = add(session, &xs, &ys, out_bits).await?;
        let mut next = Vec::with_capacity(sizes.len() + 1);
        for size in sizes {
            let rest = sums.split_off(size);
            next.push(std::mem::replace(&mut sums, rest));
        }
        next.extend(odd);
        level = next;
    }
    let mut result = level
        .pop()
        .ok_or_else(|| Error::Misuse("sum of no operands".to_string()))?;
    for bits in result.iter_mut() {
        bits.resize(out_bits, BitShare::default());
    }
    Ok(result)
}

/// The integer whose little-endian bits are the opened `bits`.
///
/// Fails unless every element is 0 or 1 and the integer fits into 64 bits.
pub fn compose<F: Field>(bits: &[F]) -> Option<u64> {
    if bits.len() > 64 {
        return None;
    }
    bits.iter().enumerate().try_fold(0u64, |acc, (j, b)| {
        if *b == F::ZERO {
            Some(acc)
        } else if *b == F::ONE {
            Some(acc | 1 << j)
        } else {
            None
        }
    })
}
