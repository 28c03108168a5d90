//! Tree-structured summation of additive shares.
//!
//! In each summing round, parties outside the current set of summers send their vectors to a
//! summer and drop out, until only the root (relative index 0) is left. The root then sends the
//! sum down a broadcast tree. Relative indices are taken with respect to a root that rotates with
//! every run so that the load of summing is spread over all parties.

use tracing::trace;

use crate::{Error, channel::Channel, field::Field, player::Player};

/// Sums one vector of additive shares per party and makes the result known to every party.
#[derive(Debug, Clone)]
pub struct TreeSum {
    opening_sum: usize,
    max_broadcast: usize,
    base_player: usize,
}

impl TreeSum {
    /// Creates a tree with fan-in `opening_sum` and fan-out `max_broadcast`. Values below 2 mean
    /// "all parties".
    pub fn new(opening_sum: usize, max_broadcast: usize) -> Self {
        TreeSum {
            opening_sum,
            max_broadcast,
            base_player: 0,
        }
    }

    /// Runs the summation of `values` with all other parties.
    pub async fn run<F: Field, C: Channel>(
        &mut self,
        mut values: Vec<F>,
        player: &Player<'_, C>,
    ) -> Result<Vec<F>, Error> {
        if values.is_empty() {
            return Ok(values);
        }
        let n = player.num_players();
        let len = values.len();
        let opening_sum = if self.opening_sum < 2 { n } else { self.opening_sum };
        let max_broadcast = if self.max_broadcast < 2 { n } else { self.max_broadcast };
        let base = self.base_player;
        let rel = (player.my_num() + n - base) % n;
        let abs = |rel: usize| (base + rel) % n;

        let mut sum_players = n;
        loop {
            let last_sum_players = sum_players;
            sum_players = (sum_players + opening_sum - 2) / opening_sum;
            if sum_players == 0 {
                break;
            }
            if rel >= sum_players && rel < last_sum_players {
                player
                    .send_to(abs(rel % sum_players), "tree sum", &values)
                    .await?;
            }
            if rel < sum_players {
                let mut sender = rel + sum_players;
                while sender < last_sum_players {
                    let received: Vec<F> = player.recv_from(abs(sender), "tree sum", len).await?;
                    for (v, r) in values.iter_mut().zip(received) {
                        *v += r;
                    }
                    sender += sum_players;
                }
            }
        }

        if rel == 0 {
            for child in 1..max_broadcast.min(n) {
                player.send_to(abs(child), "tree broadcast", &values).await?;
            }
        } else {
            values = player
                .recv_from(abs(rel / max_broadcast), "tree broadcast", len)
                .await?;
            if rel * max_broadcast < n {
                for child in (0..max_broadcast).map(|i| rel * max_broadcast + i) {
                    if child < n {
                        player.send_to(abs(child), "tree broadcast", &values).await?;
                    }
                }
            }
        }
        trace!(len, base, "tree sum done");
        self.base_player = (base + 1) % n;
        Ok(values)
    }
}

/// Sums one vector of additive shares per party by sending every vector to every party.
pub async fn direct_sum<F: Field, C: Channel>(
    values: Vec<F>,
    player: &Player<'_, C>,
) -> Result<Vec<F>, Error> {
    if values.is_empty() {
        return Ok(values);
    }
    let all = player.broadcast("direct sum", &values).await?;
    let mut sum = vec![F::ZERO; values.len()];
    for contribution in all {
        for (s, v) in sum.iter_mut().zip(contribution) {
            *s += v;
        }
    }
    Ok(sum)
}
