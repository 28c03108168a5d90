//! Commitments and multi-party coin tossing.

use rand::{SeedableRng, random};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{Error, channel::Channel, player::Player};

/// A BLAKE3 commitment to a value and a random nonce.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct Commitment(pub(crate) [u8; 32]);

/// The opening of a [`Commitment`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct Opening {
    pub(crate) value: Vec<u8>,
    pub(crate) nonce: [u8; 32],
}

/// Commits to `value` with a fresh random nonce, binding the commitment to `party`.
pub(crate) fn commit(party: usize, value: Vec<u8>) -> (Commitment, Opening) {
    let opening = Opening {
        value,
        nonce: random(),
    };
    (hash(party, &opening), opening)
}

/// Verifies that `opening` matches the commitment of `party`.
pub(crate) fn open_commitment(party: usize, commitment: &Commitment, opening: &Opening) -> bool {
    hash(party, opening) == *commitment
}

fn hash(party: usize, opening: &Opening) -> Commitment {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(party as u64).to_be_bytes());
    hasher.update(&opening.nonce);
    hasher.update(&opening.value);
    Commitment(hasher.finalize().into())
}

/// Every party commits to a value, then all values are opened and verified.
///
/// Returns the values of all parties in party order.
pub(crate) async fn commit_and_open<C: Channel>(
    player: &Player<'_, C>,
    phase: &str,
    value: Vec<u8>,
) -> Result<Vec<Vec<u8>>, Error> {
    let i = player.my_num();
    let (commitment, opening) = commit(i, value);
    let commitments = player
        .verified_broadcast(&format!("{phase} commit"), &[commitment])
        .await?;
    let openings = player
        .broadcast(&format!("{phase} open"), &[opening])
        .await?;
    let mut values = Vec::with_capacity(player.num_players());
    for (k, (commitment, opening)) in commitments.iter().zip(openings).enumerate() {
        let (Some(commitment), Some(opening)) = (commitment.first(), opening.into_iter().next())
        else {
            return Err(Error::CommitmentMismatch(k));
        };
        if !open_commitment(k, commitment, &opening) {
            return Err(Error::CommitmentMismatch(k));
        }
        values.push(opening.value);
    }
    Ok(values)
}

/// Multi-party coin tossing to generate shared randomness.
///
/// Each party contributes a committed random seed; the XOR of all seeds seeds a `ChaCha20Rng`
/// that every party can use to derive the same public random values.
pub(crate) async fn shared_rng<C: Channel>(player: &Player<'_, C>) -> Result<ChaCha20Rng, Error> {
    let seed = random::<[u8; 32]>();
    let seeds = commit_and_open(player, "RNG", seed.to_vec()).await?;
    let mut seed_xor = [0u8; 32];
    for (k, seed) in seeds.iter().enumerate() {
        if seed.len() != 32 {
            return Err(Error::CommitmentMismatch(k));
        }
        seed_xor
            .iter_mut()
            .zip(seed)
            .for_each(|(xor_byte, byte)| *xor_byte ^= *byte);
    }
    trace!("shared RNG seeded");
    Ok(ChaCha20Rng::from_seed(seed_xor))
}
