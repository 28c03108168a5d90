//! The per-party-thread context that every preprocessing call runs in.
//!
//! A [`Session`] bundles the network handle, the run parameters and the MAC key of both domains.
//! It is created once per party-thread by [`Session::setup`] and passed by reference to buffers,
//! sacrifice and checks.

use std::sync::Arc;

use rand_chacha::ChaCha20Rng;
use tracing::{Level, debug, info, instrument};

use crate::{
    Error,
    channel::Channel,
    cointoss::shared_rng,
    config::Config,
    error::OfflineCheck,
    field::{Field, Gf2k64},
    mac_check::MacCheck,
    player::Player,
    prep::files::read_mac_keys,
    protocol::Protocol,
    share::{BitShare, InputTuple, Share},
    thread_queues::ThreadQueues,
};

/// Multiplication and opening state of one field.
#[derive(Debug)]
pub struct Domain<F: Field> {
    /// Multiplication, random sharings and inputs.
    pub protocol: Protocol<F>,
    /// Openings and their MAC check.
    pub mac_check: MacCheck<F>,
}

impl<F: Field> Domain<F> {
    async fn setup<C: Channel>(
        player: &Player<'_, C>,
        config: &Config,
        queues: &Arc<ThreadQueues>,
        mac_key: Option<F>,
    ) -> Result<Self, Error> {
        let mut protocol = Protocol::new(player.my_num(), player.num_players(), queues.clone())?;
        let alpha = match mac_key {
            Some(alpha) => alpha,
            None => {
                let keys = protocol.random_values(player, 1).await?;
                keys.first()
                    .copied()
                    .ok_or_else(|| Error::Misuse("no MAC key generated".to_string()))?
            }
        };
        protocol.set_mac_key(alpha);
        let mac_check = MacCheck::new(alpha, protocol.lagrange(), config, queues.clone());
        Ok(Domain {
            protocol,
            mac_check,
        })
    }

    /// This party's share of the MAC key of the domain.
    pub fn mac_key(&self) -> F {
        self.protocol.mac_key()
    }
}

/// Context of one party-thread: network, configuration and both domains.
#[derive(Debug)]
pub struct Session<'a, C: Channel, F: Field> {
    player: Player<'a, C>,
    config: Config,
    queues: Arc<ThreadQueues>,
    arith: Domain<F>,
    binary: Domain<Gf2k64>,
}

impl<'a, C: Channel, F: Field> Session<'a, C, F> {
    /// Agrees on the run parameters with all other parties and sets up the MAC keys.
    ///
    /// With live preprocessing the keys are generated jointly, otherwise they are loaded from the
    /// key files written by the dealer.
    #[instrument(level = Level::DEBUG, skip_all, fields(party = player.my_num()), err)]
    pub async fn setup(player: Player<'a, C>, config: Config) -> Result<Self, Error> {
        config.validate()?;
        agree::<C, F>(&player, &config).await?;
        let queues = Arc::new(ThreadQueues::new(config.threads)?);
        let (arith_key, binary_key) = if config.live_prep {
            (None, None)
        } else {
            let (a, b) = read_mac_keys::<F>(&config, player.num_players(), player.my_num())?;
            (Some(a), Some(b))
        };
        let arith = Domain::setup(&player, &config, &queues, arith_key).await?;
        let binary = Domain::setup(&player, &config, &queues, binary_key).await?;
        info!(
            players = player.num_players(),
            field = F::signature(),
            model = ?config.security_model,
            live = config.live_prep,
            "session ready"
        );
        Ok(Session {
            player,
            config,
            queues,
            arith,
            binary,
        })
    }

    /// The network handle.
    pub fn player(&self) -> Player<'a, C> {
        self.player
    }

    /// The run parameters.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The worker pool of this party-thread.
    pub fn queues(&self) -> &Arc<ThreadQueues> {
        &self.queues
    }

    /// The arithmetic domain.
    pub fn arith(&mut self) -> &mut Domain<F> {
        &mut self.arith
    }

    /// The binary domain.
    pub fn binary(&mut self) -> &mut Domain<Gf2k64> {
        &mut self.binary
    }

    /// This party's share of the arithmetic MAC key.
    pub fn alpha(&self) -> F {
        self.arith.mac_key()
    }

    /// This party's share of the binary MAC key.
    pub fn binary_alpha(&self) -> Gf2k64 {
        self.binary.mac_key()
    }

    /// A random generator whose stream all parties agree on.
    pub async fn shared_rng(&self) -> Result<ChaCha20Rng, Error> {
        shared_rng(&self.player).await
    }

    /// Opens arithmetic shares, deferring their MAC check.
    pub async fn open(&mut self, shares: &[Share<F>]) -> Result<Vec<F>, Error> {
        self.arith.mac_check.open(&self.player, shares).await
    }

    /// Opens binary shares, deferring their MAC check.
    pub async fn open_binary(&mut self, shares: &[BitShare]) -> Result<Vec<Gf2k64>, Error> {
        self.binary.mac_check.open(&self.player, shares).await
    }

    /// Opens arithmetic shares to `receiver` only, consuming one input tuple of `receiver` per
    /// share.
    ///
    /// The masked values `x - r` are opened to everyone and MAC-checked like any other opening;
    /// only the receiver knows `r` and learns `x`. Everyone else gets `None`.
    pub async fn open_to(
        &mut self,
        receiver: usize,
        shares: &[Share<F>],
        tuples: &[InputTuple<F>],
    ) -> Result<Option<Vec<F>>, Error> {
        if receiver >= self.player.num_players() {
            return Err(Error::Misuse(format!("output to unknown party {receiver}")));
        }
        if shares.len() != tuples.len() {
            return Err(Error::Misuse(format!(
                "{} shares need as many input tuples, got {}",
                shares.len(),
                tuples.len()
            )));
        }
        let masked: Vec<_> = shares
            .iter()
            .zip(tuples)
            .map(|(x, t)| *x - t.share)
            .collect();
        let masked = self.open(&masked).await?;
        if receiver != self.player.my_num() {
            return Ok(None);
        }
        Ok(Some(
            masked.into_iter().zip(tuples).map(|(y, t)| y + t.mask).collect(),
        ))
    }

    /// Runs the MAC check of everything opened so far in both domains.
    pub async fn check(&mut self) -> Result<(), Error> {
        self.arith.mac_check.check(&self.player).await?;
        self.binary.mac_check.check(&self.player).await
    }

    /// Fails with `which` unless all arithmetic `shares` open to zero.
    pub async fn check_for_zero(
        &mut self,
        shares: &[Share<F>],
        which: OfflineCheck,
    ) -> Result<(), Error> {
        self.arith
            .mac_check
            .check_for_zero(&self.player, shares, which)
            .await
    }

    /// Fails with `which` unless all binary `shares` open to zero.
    pub async fn check_for_zero_binary(
        &mut self,
        shares: &[BitShare],
        which: OfflineCheck,
    ) -> Result<(), Error> {
        self.binary
            .mac_check
            .check_for_zero(&self.player, shares, which)
            .await
    }

    /// Multiplies arithmetic shares elementwise.
    pub async fn mul(&mut self, xs: &[Share<F>], ys: &[Share<F>]) -> Result<Vec<Share<F>>, Error> {
        self.arith.protocol.mul(&self.player, xs, ys).await
    }

    /// Multiplies binary shares elementwise.
    pub async fn mul_binary(
        &mut self,
        xs: &[BitShare],
        ys: &[BitShare],
    ) -> Result<Vec<BitShare>, Error> {
        self.binary.protocol.mul(&self.player, xs, ys).await
    }

    /// Authenticated shares of `n` random arithmetic values.
    pub async fn random(&mut self, n: usize) -> Result<Vec<Share<F>>, Error> {
        self.arith.protocol.get_random(&self.player, n).await
    }

    /// Shares `n` private arithmetic values of `owner`; other parties pass an empty slice.
    pub async fn input(
        &mut self,
        owner: usize,
        values: &[F],
        n: usize,
    ) -> Result<Vec<Share<F>>, Error> {
        self.arith
            .protocol
            .input(&self.player, owner, values, n)
            .await
    }

    /// Every party shares the same number of arithmetic values, returned by owner.
    pub async fn input_all(&mut self, values: &[F]) -> Result<Vec<Vec<Share<F>>>, Error> {
        self.arith.protocol.input_all(&self.player, values).await
    }

    /// Every party shares the same number of binary values, returned by owner.
    pub async fn input_all_binary(
        &mut self,
        values: &[Gf2k64],
    ) -> Result<Vec<Vec<BitShare>>, Error> {
        self.binary.protocol.input_all(&self.player, values).await
    }

    /// Shares the private `value` of `owner` by consuming an input tuple.
    ///
    /// The owner broadcasts `value - mask`; all parties add it to their share of the mask. Other
    /// parties pass `None`.
    pub async fn input_with_tuple(
        &mut self,
        owner: usize,
        tuple: InputTuple<F>,
        value: Option<F>,
    ) -> Result<Share<F>, Error> {
        let masked = match (owner == self.player.my_num(), value) {
            (true, Some(value)) => value - tuple.mask,
            (true, None) => {
                return Err(Error::Misuse(format!("party {owner} has no input value")));
            }
            (false, _) => F::ZERO,
        };
        let all = self
            .player
            .verified_broadcast("masked input", &[masked])
            .await?;
        let masked = all
            .get(owner)
            .and_then(|v| v.first())
            .copied()
            .ok_or_else(|| Error::Misuse(format!("input of unknown party {owner}")))?;
        Ok(tuple.share.add_public(masked, self.alpha()))
    }
}

/// The parameters all parties must agree on, hashed.
fn setup_digest<F: Field>(num_players: usize, config: &Config) -> Result<[u8; 32], Error> {
    let params = (
        num_players,
        F::signature(),
        Gf2k64::signature(),
        config.opening,
        config.opening_sum,
        config.max_broadcast,
        config.security_model,
        config.security,
        config.bucket_size,
        config.batch_size,
        config.live_prep,
    );
    let bytes = bincode::serialize(&params).map_err(|e| Error::Decode(e.to_string()))?;
    Ok(blake3::hash(&bytes).into())
}

async fn agree<C: Channel, F: Field>(player: &Player<'_, C>, config: &Config) -> Result<(), Error> {
    let digest = setup_digest::<F>(player.num_players(), config)?;
    let digests = player.verified_broadcast("setup", &[digest]).await?;
    for (k, theirs) in digests.iter().enumerate() {
        if theirs.first() != Some(&digest) {
            return Err(Error::SetupMismatch(format!(
                "party {k} runs with different parameters"
            )));
        }
    }
    debug!("parameters agreed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SecurityModel,
        field::{Fp251, Mersenne61},
        player::simulate,
    };

    #[tokio::test]
    async fn mismatched_parameters_are_rejected() {
        let res = simulate(3, async |p| {
            let config = Config {
                bucket_size: if p.my_num() == 2 { 5 } else { 4 },
                ..Config::default()
            };
            Session::<_, Fp251>::setup(p, config).await.map(|_| ())
        })
        .await;
        assert!(matches!(res, Err(Error::SetupMismatch(_))));

        let res = simulate(3, async |p| {
            let config = Config {
                security_model: if p.my_num() == 0 {
                    SecurityModel::SemiHonest
                } else {
                    SecurityModel::Malicious
                },
                ..Config::default()
            };
            Session::<_, Mersenne61>::setup(p, config).await.map(|_| ())
        })
        .await;
        assert!(matches!(res, Err(Error::SetupMismatch(_))));
    }

    #[tokio::test]
    async fn too_few_parties() {
        let res = simulate(2, async |p| {
            Session::<_, Fp251>::setup(p, Config::default()).await.map(|_| ())
        })
        .await;
        assert!(matches!(res, Err(Error::SetupMismatch(_))));
    }

    #[tokio::test]
    async fn private_inputs_with_tuples() -> Result<(), Error> {
        let results = simulate(3, async |p| {
            let mut session = Session::<_, Mersenne61>::setup(p, Config::default()).await?;
            let masks = if p.my_num() == 1 {
                vec![Mersenne61::from_u64(1234)]
            } else {
                vec![]
            };
            let share = session.input(1, &masks, 1).await?[0];
            let tuple = InputTuple {
                share,
                mask: masks.first().copied().unwrap_or(Mersenne61::ZERO),
            };
            let value = (p.my_num() == 1).then(|| Mersenne61::from_u64(99));
            let x = session.input_with_tuple(1, tuple, value).await?;
            let y = session.random(1).await?[0];
            let xy = session.mul(&[x], &[y]).await?[0];
            let opened = session.open(&[x, y, xy]).await?;
            session.check().await?;
            Ok(opened)
        })
        .await?;
        for opened in results {
            assert_eq!(opened[0], Mersenne61::from_u64(99));
            assert_eq!(opened[0] * opened[1], opened[2]);
        }
        Ok(())
    }

    #[tokio::test]
    async fn zero_checks_in_both_domains() -> Result<(), Error> {
        simulate(3, async |p| {
            let mut session = Session::<_, Fp251>::setup(p, Config::default()).await?;
            let x = session.random(4).await?;
            let diff: Vec<_> = x.iter().map(|s| *s - *s).collect();
            session
                .check_for_zero(&diff, OfflineCheck::TripleSacrifice)
                .await?;
            let zero = vec![BitShare::default(); 2];
            session
                .check_for_zero_binary(&zero, OfflineCheck::DabitSacrifice)
                .await?;
            let one = vec![BitShare::constant(Gf2k64::ONE, session.binary_alpha())];
            let res = session
                .check_for_zero_binary(&one, OfflineCheck::DabitSacrifice)
                .await;
            assert!(matches!(
                res,
                Err(Error::OfflineCheckFailed(OfflineCheck::DabitSacrifice))
            ));
            session.check().await
        })
        .await?;
        Ok(())
    }
}
