//! Joint multiplication, random sharings and private inputs over one field.
//!
//! Products of two degree-`t` shares are local degree-`2t` shares of the product. One round of
//! resharing brings them back to degree `t`: every party deals its local product with a fresh
//! degree-`t` polynomial, and every recipient recombines what it receives with the Lagrange
//! coefficients of all `n` evaluation points. The MAC of a product is reduced the same way from
//! the local product of one MAC share with the other value share.

use std::{collections::VecDeque, sync::Arc};

use tracing::{Level, instrument, trace};

use crate::{
    Error,
    channel::Channel,
    field::Field,
    player::Player,
    share::{Share, deal, lagrange_at_zero, threshold},
    thread_queues::ThreadQueues,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MulState {
    Idle,
    Preparing,
    Exchanged,
}

/// The multiplication and sharing protocol of one party over the field `F`.
#[derive(Debug)]
pub struct Protocol<F: Field> {
    alpha: F,
    my_num: usize,
    num_players: usize,
    threshold: usize,
    lagrange: Vec<F>,
    queues: Arc<ThreadQueues>,
    state: MulState,
    products: Vec<F>,
    results: VecDeque<Share<F>>,
    muls: u64,
}

impl<F: Field> Protocol<F> {
    /// Creates the protocol state of party `my_num` out of `num_players`.
    ///
    /// The MAC key share is zero until [`Protocol::set_mac_key`] is called, which is only
    /// meaningful for generating the key itself with [`Protocol::random_values`].
    pub fn new(
        my_num: usize,
        num_players: usize,
        queues: Arc<ThreadQueues>,
    ) -> Result<Self, Error> {
        if num_players < 3 {
            return Err(Error::SetupMismatch(format!(
                "honest-majority sharing needs at least 3 parties, got {num_players}"
            )));
        }
        Ok(Protocol {
            alpha: F::ZERO,
            my_num,
            num_players,
            threshold: threshold(num_players),
            lagrange: lagrange_at_zero(num_players)?,
            queues,
            state: MulState::Idle,
            products: vec![],
            results: VecDeque::new(),
            muls: 0,
        })
    }

    /// Sets this party's share of the MAC key.
    pub fn set_mac_key(&mut self, alpha: F) {
        self.alpha = alpha;
    }

    /// This party's share of the MAC key.
    pub fn mac_key(&self) -> F {
        self.alpha
    }

    /// This party's Lagrange coefficient for reconstructing from all parties.
    pub fn lagrange(&self) -> F {
        self.lagrange[self.my_num]
    }

    /// The Shamir threshold.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// The number of products computed so far.
    pub fn mul_count(&self) -> u64 {
        self.muls
    }

    /// Starts a new batch of multiplications, dropping unfinished results.
    pub fn init_mul(&mut self) {
        self.state = MulState::Preparing;
        self.products.clear();
        self.results.clear();
    }

    /// Queues the product `x * y`.
    pub fn prepare_mul(&mut self, x: Share<F>, y: Share<F>) -> Result<(), Error> {
        if self.state != MulState::Preparing {
            return Err(Error::Misuse("prepare_mul called before init_mul".to_string()));
        }
        self.products.push(x.value * y.value);
        self.products.push(x.mac * y.value);
        Ok(())
    }

    /// Runs the resharing round for all queued products.
    pub async fn exchange<C: Channel>(&mut self, player: &Player<'_, C>) -> Result<(), Error> {
        if self.state != MulState::Preparing {
            return Err(Error::Misuse("exchange called before init_mul".to_string()));
        }
        let products = std::mem::take(&mut self.products);
        let reduced = self.reduce_degree(player, &products).await?;
        self.results = reduced
            .chunks_exact(2)
            .map(|c| Share::new(c[0], c[1]))
            .collect();
        self.muls += self.results.len() as u64;
        self.state = MulState::Exchanged;
        Ok(())
    }

    /// Returns the next product in the order of [`Protocol::prepare_mul`].
    pub fn finalize_mul(&mut self) -> Result<Share<F>, Error> {
        if self.state != MulState::Exchanged {
            return Err(Error::Misuse("finalize_mul called before exchange".to_string()));
        }
        self.results
            .pop_front()
            .ok_or_else(|| Error::Misuse("more products finalized than prepared".to_string()))
    }

    /// Multiplies `xs` and `ys` elementwise in one round.
    pub async fn mul<C: Channel>(
        &mut self,
        player: &Player<'_, C>,
        xs: &[Share<F>],
        ys: &[Share<F>],
    ) -> Result<Vec<Share<F>>, Error> {
        if xs.len() != ys.len() {
            return Err(Error::Misuse(format!(
                "cannot multiply {} by {} shares",
                xs.len(),
                ys.len()
            )));
        }
        self.init_mul();
        for (x, y) in xs.iter().zip(ys) {
            self.prepare_mul(*x, *y)?;
        }
        self.exchange(player).await?;
        (0..xs.len()).map(|_| self.finalize_mul()).collect()
    }

    /// Deals a fresh degree-`t` sharing of each of `secrets` to all parties and returns what
    /// every party dealt to us, indexed by dealer.
    async fn reshare<C: Channel>(
        &self,
        player: &Player<'_, C>,
        phase: &str,
        secrets: &[F],
    ) -> Result<Vec<Vec<F>>, Error> {
        let mut msgs = self.deal_all(secrets);
        let mut received = player.exchange(phase, &msgs).await?;
        received[self.my_num] = std::mem::take(&mut msgs[self.my_num]);
        Ok(received)
    }

    /// Deals every secret and groups the evaluations by recipient.
    fn deal_all(&self, secrets: &[F]) -> Vec<Vec<F>> {
        let (t, n) = (self.threshold, self.num_players);
        let dealt: Vec<Vec<F>> = self.queues.distribute(secrets.len(), 64, |range| {
            let mut rng = rand::rng();
            range.map(|k| deal(secrets[k], t, n, &mut rng)).collect()
        });
        let mut msgs = vec![Vec::with_capacity(secrets.len()); n];
        for evaluations in dealt {
            for (msg, y) in msgs.iter_mut().zip(evaluations) {
                msg.push(y);
            }
        }
        msgs
    }

    /// Turns local shares of degree up to `2t` into degree-`t` shares of the same secrets.
    pub async fn reduce_degree<C: Channel>(
        &self,
        player: &Player<'_, C>,
        values: &[F],
    ) -> Result<Vec<F>, Error> {
        if values.is_empty() {
            return Ok(vec![]);
        }
        let received = self.reshare(player, "reduce degree", values).await?;
        let lagrange = &self.lagrange;
        trace!(len = values.len(), "degree reduced");
        Ok(self.queues.distribute(values.len(), 256, |range| {
            range
                .map(|k| {
                    received
                        .iter()
                        .zip(lagrange)
                        .fold(F::ZERO, |acc, (shares, l)| acc + shares[k] * *l)
                })
                .collect()
        }))
    }

    /// Shares of `n` random values without MACs, as needed for generating the MAC key.
    pub async fn random_values<C: Channel>(
        &self,
        player: &Player<'_, C>,
        n: usize,
    ) -> Result<Vec<F>, Error> {
        if n == 0 {
            return Ok(vec![]);
        }
        let secrets: Vec<F> = {
            let mut rng = rand::rng();
            (0..n).map(|_| F::random(&mut rng)).collect()
        };
        let received = self.reshare(player, "random", &secrets).await?;
        let mut sums = vec![F::ZERO; n];
        for shares in received {
            for (sum, s) in sums.iter_mut().zip(shares) {
                *sum += s;
            }
        }
        Ok(sums)
    }

    /// Authenticated shares of `n` random values that no party knows.
    #[instrument(level = Level::DEBUG, skip_all, fields(n = n), err)]
    pub async fn get_random<C: Channel>(
        &self,
        player: &Player<'_, C>,
        n: usize,
    ) -> Result<Vec<Share<F>>, Error> {
        let values = self.random_values(player, n).await?;
        self.authenticate(player, values).await
    }

    /// Adds MACs to degree-`t` shares by reducing `alpha_i * x_i`.
    async fn authenticate<C: Channel>(
        &self,
        player: &Player<'_, C>,
        values: Vec<F>,
    ) -> Result<Vec<Share<F>>, Error> {
        let products: Vec<F> = values.iter().map(|v| self.alpha * *v).collect();
        let macs = self.reduce_degree(player, &products).await?;
        Ok(values
            .into_iter()
            .zip(macs)
            .map(|(v, m)| Share::new(v, m))
            .collect())
    }

    /// Shares `n` private values of `owner`.
    ///
    /// Only the owner's `values` are used; all other parties pass an empty slice.
    pub async fn input<C: Channel>(
        &self,
        player: &Player<'_, C>,
        owner: usize,
        values: &[F],
        n: usize,
    ) -> Result<Vec<Share<F>>, Error> {
        if owner >= self.num_players {
            return Err(Error::Misuse(format!("input of unknown party {owner}")));
        }
        let shares = if owner == self.my_num {
            if values.len() != n {
                return Err(Error::Misuse(format!(
                    "{} input values announced as {n}",
                    values.len()
                )));
            }
            let mut msgs = self.deal_all(values);
            for p in player.others() {
                player.send_to(p, "input", &msgs[p]).await?;
            }
            std::mem::take(&mut msgs[self.my_num])
        } else {
            player.recv_from(owner, "input", n).await?
        };
        self.authenticate(player, shares).await
    }

    /// Every party shares its `values`; all parties must share the same number of values.
    ///
    /// Returns the shares indexed by owner.
    pub async fn input_all<C: Channel>(
        &self,
        player: &Player<'_, C>,
        values: &[F],
    ) -> Result<Vec<Vec<Share<F>>>, Error> {
        let len = values.len();
        let received = self.reshare(player, "input all", values).await?;
        let flat: Vec<F> = received.into_iter().flatten().collect();
        let mut shares = self.authenticate(player, flat).await?;
        let mut by_owner = Vec::with_capacity(self.num_players);
        for _ in 0..self.num_players {
            let rest = shares.split_off(len.min(shares.len()));
            by_owner.push(std::mem::replace(&mut shares, rest));
        }
        Ok(by_owner)
    }
}
