//! The network view of one party: its index, the number of parties and typed messaging.

use futures::future::try_join_all;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    Error,
    channel::{self, Channel, SimpleChannel, recv_vec_from, scatter, send_to, unverified_broadcast},
};

/// One party's handle to the other parties.
#[derive(Debug)]
pub struct Player<'a, C: Channel> {
    channel: &'a C,
    my_num: usize,
    num_players: usize,
}

impl<C: Channel> Clone for Player<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: Channel> Copy for Player<'_, C> {}

impl<'a, C: Channel> Player<'a, C> {
    /// Creates the handle of party `my_num` out of `num_players`.
    pub fn new(channel: &'a C, my_num: usize, num_players: usize) -> Result<Self, Error> {
        if my_num >= num_players {
            return Err(Error::Misuse(format!(
                "party {my_num} does not exist among {num_players} parties"
            )));
        }
        Ok(Player {
            channel,
            my_num,
            num_players,
        })
    }

    /// The index of this party.
    pub fn my_num(&self) -> usize {
        self.my_num
    }

    /// The number of parties.
    pub fn num_players(&self) -> usize {
        self.num_players
    }

    /// The indices of all other parties.
    pub fn others(&self) -> impl Iterator<Item = usize> + use<'a, C> {
        let me = self.my_num;
        (0..self.num_players).filter(move |p| *p != me)
    }

    /// Sends a message to party `p`.
    pub async fn send_to<T: Serialize>(
        &self,
        p: usize,
        phase: &str,
        msg: &[T],
    ) -> Result<(), Error> {
        Ok(send_to(self.channel, p, phase, msg).await?)
    }

    /// Receives a message of exactly `len` elements from party `p`.
    pub async fn recv_from<T: DeserializeOwned>(
        &self,
        p: usize,
        phase: &str,
        len: usize,
    ) -> Result<Vec<T>, Error> {
        Ok(recv_vec_from(self.channel, p, phase, len).await?)
    }

    /// Sends `msgs[p]` to every other party `p` and receives one message of the same length from
    /// each of them. The entry of this party is left empty.
    pub async fn exchange<T: Serialize + DeserializeOwned>(
        &self,
        phase: &str,
        msgs: &[Vec<T>],
    ) -> Result<Vec<Vec<T>>, Error> {
        if msgs.len() != self.num_players {
            return Err(Error::Misuse(format!(
                "{phase}: {} messages for {} parties",
                msgs.len(),
                self.num_players
            )));
        }
        Ok(scatter(self.channel, self.my_num, phase, msgs).await?)
    }

    /// Sends `msg` to all other parties and returns everyone's message, including our own.
    ///
    /// The messages are not checked for consistency, see [`Player::verified_broadcast`].
    pub async fn broadcast<T: Serialize + DeserializeOwned + Clone>(
        &self,
        phase: &str,
        msg: &[T],
    ) -> Result<Vec<Vec<T>>, Error> {
        Ok(unverified_broadcast(self.channel, self.my_num, self.num_players, phase, msg).await?)
    }

    /// Broadcast with abort: after the broadcast, every party echoes a hash of what it received
    /// from everyone else, which detects a party sending different messages to different parties.
    pub async fn verified_broadcast<T: Serialize + DeserializeOwned + Clone>(
        &self,
        phase: &str,
        msg: &[T],
    ) -> Result<Vec<Vec<T>>, Error> {
        let received = self.broadcast(phase, msg).await?;
        if self.num_players <= 2 {
            return Ok(received);
        }
        let hashes = received
            .iter()
            .map(|v| hash(v))
            .collect::<Result<Vec<[u8; 32]>, Error>>()?;
        let echo_phase = format!("{phase} (echo)");
        let echoes = self.broadcast(&echo_phase, &hashes).await?;
        for (k, echo) in echoes.iter().enumerate() {
            for j in (0..self.num_players).filter(|j| *j != self.my_num && *j != k) {
                if echo[j] != hashes[j] {
                    return Err(Error::InconsistentBroadcast(phase.to_string()));
                }
            }
        }
        Ok(received)
    }
}

fn hash<T: Serialize>(msg: &[T]) -> Result<[u8; 32], Error> {
    let bytes = bincode::serialize(msg).map_err(|e| channel::Error {
        phase: "broadcast verification".to_string(),
        reason: channel::ErrorKind::SerdeError(format!("{e:?}")),
    })?;
    Ok(blake3::hash(&bytes).into())
}

/// Runs `party` for each of `num_players` parties over in-process [`SimpleChannel`]s and returns
/// the results in party order.
///
/// All parties are polled concurrently on the current task, which makes this suitable for tests,
/// benchmarks and local simulations.
pub async fn simulate<T>(
    num_players: usize,
    party: impl AsyncFn(Player<'_, SimpleChannel>) -> Result<T, Error>,
) -> Result<Vec<T>, Error> {
    let channels = SimpleChannel::channels(num_players);
    let players = channels
        .iter()
        .enumerate()
        .map(|(i, channel)| Player::new(channel, i, num_players))
        .collect::<Result<Vec<_>, _>>()?;
    try_join_all(players.into_iter().map(|p| party(p))).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exchange_and_broadcast() -> Result<(), Error> {
        let results = simulate(4, async |p| {
            let msgs: Vec<Vec<u32>> = (0..4).map(|k| vec![(10 * p.my_num() + k) as u32]).collect();
            let received = p.exchange("test exchange", &msgs).await?;
            let all = p.verified_broadcast("test bcast", &[p.my_num() as u8]).await?;
            Ok((received, all))
        })
        .await?;
        for (i, (received, all)) in results.into_iter().enumerate() {
            for k in (0..4).filter(|k| *k != i) {
                assert_eq!(received[k], vec![(10 * k + i) as u32]);
            }
            assert!(received[i].is_empty());
            assert_eq!(all, vec![vec![0], vec![1], vec![2], vec![3]]);
        }
        Ok(())
    }

    #[tokio::test]
    async fn length_mismatch_is_an_error() {
        let res = simulate(2, async |p| {
            let len = if p.my_num() == 0 { 1 } else { 2 };
            let msgs = vec![vec![0u8; len]; 2];
            p.exchange("uneven", &msgs).await
        })
        .await;
        assert!(matches!(res, Err(Error::Channel(_))));
    }
}
