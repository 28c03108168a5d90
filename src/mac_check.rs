//! Opening of shares with deferred MAC verification.
//!
//! Opened values are first used optimistically. Every opened `(mac share, value)` pair is kept
//! until [`MacCheck::check`] verifies a random linear combination of all of them at once:
//! with public coefficients `r_j` from a coin toss, party `i` computes
//! `sigma_i = lambda_i * (sum_j r_j * mac_ij - alpha_i * sum_j r_j * value_j)`, where `lambda_i`
//! turns Shamir shares into additive ones. All `sigma_i` are committed, opened and must sum to 0.
//!
//! A single combination catches a wrong value except with probability about `1/|F|`. Small fields
//! repeat it with independent coefficients until the statistical security parameter is reached.

use std::sync::Arc;

use tracing::{Level, debug, instrument};

use crate::{
    Error,
    channel::Channel,
    cointoss::{commit_and_open, shared_rng},
    config::{Config, OpeningMode},
    error::OfflineCheck,
    field::Field,
    player::Player,
    share::Share,
    thread_queues::ThreadQueues,
    tree_sum::{TreeSum, direct_sum},
};

/// Opens shares of one field and keeps track of what still needs to be checked.
#[derive(Debug)]
pub struct MacCheck<F: Field> {
    alpha: F,
    lambda: F,
    mode: OpeningMode,
    tree: TreeSum,
    popen_max: usize,
    repetitions: usize,
    queues: Arc<ThreadQueues>,
    prepared: Vec<Share<F>>,
    macs: Vec<F>,
    values: Vec<F>,
}

impl<F: Field> MacCheck<F> {
    /// Creates the opening state of a party holding the MAC key share `alpha` and the Lagrange
    /// coefficient `lambda`.
    pub fn new(alpha: F, lambda: F, config: &Config, queues: Arc<ThreadQueues>) -> Self {
        MacCheck {
            alpha,
            lambda,
            mode: config.opening,
            tree: TreeSum::new(config.opening_sum, config.max_broadcast),
            popen_max: config.popen_max,
            repetitions: config.security.div_ceil(F::BITS - 1).max(1),
            queues,
            prepared: vec![],
            macs: vec![],
            values: vec![],
        }
    }

    /// Discards shares prepared but not yet exchanged.
    pub fn init_open(&mut self) {
        self.prepared.clear();
    }

    /// Queues a share for the next [`MacCheck::exchange`].
    pub fn prepare_open(&mut self, share: Share<F>) {
        self.prepared.push(share);
    }

    /// Opens all prepared shares and returns the values in the order they were prepared.
    ///
    /// The opened values are added to the pending list; if that grows beyond `popen_max`, a MAC
    /// check runs before returning.
    pub async fn exchange<C: Channel>(&mut self, player: &Player<'_, C>) -> Result<Vec<F>, Error> {
        let prepared = std::mem::take(&mut self.prepared);
        let contributions = prepared.iter().map(|s| s.value * self.lambda).collect();
        let opened = match self.mode {
            OpeningMode::Tree => self.tree.run(contributions, player).await?,
            OpeningMode::Direct => direct_sum(contributions, player).await?,
        };
        for (share, value) in prepared.into_iter().zip(&opened) {
            self.add_to_check(share, *value);
        }
        if self.waiting_for_check() > self.popen_max {
            self.check(player).await?;
        }
        Ok(opened)
    }

    /// Opens `shares` in one exchange.
    pub async fn open<C: Channel>(
        &mut self,
        player: &Player<'_, C>,
        shares: &[Share<F>],
    ) -> Result<Vec<F>, Error> {
        self.init_open();
        for share in shares {
            self.prepare_open(*share);
        }
        self.exchange(player).await
    }

    /// Records a share whose value became public some other way.
    pub fn add_to_check(&mut self, share: Share<F>, value: F) {
        self.macs.push(share.mac);
        self.values.push(value);
    }

    /// Independent random combinations computed per check.
    pub fn repetitions(&self) -> usize {
        self.repetitions
    }

    /// The number of opened values not yet checked.
    pub fn waiting_for_check(&self) -> usize {
        self.values.len()
    }

    /// Verifies the MACs of all values opened since the last check.
    #[instrument(level = Level::DEBUG, skip_all, fields(pending = self.values.len()), err)]
    pub async fn check<C: Channel>(&mut self, player: &Player<'_, C>) -> Result<(), Error> {
        if self.values.is_empty() {
            return Ok(());
        }
        let macs = std::mem::take(&mut self.macs);
        let values = std::mem::take(&mut self.values);
        let mut rng = shared_rng(player).await?;
        let mut bytes = vec![];
        for _ in 0..self.repetitions {
            let coefficients: Vec<F> = (0..values.len()).map(|_| F::random(&mut rng)).collect();
            let partial_sums = self.queues.distribute(values.len(), 1024, |range| {
                let mut mac_sum = F::ZERO;
                let mut value_sum = F::ZERO;
                for j in range {
                    mac_sum += coefficients[j] * macs[j];
                    value_sum += coefficients[j] * values[j];
                }
                vec![(mac_sum, value_sum)]
            });
            let (mac_sum, value_sum) = partial_sums
                .into_iter()
                .fold((F::ZERO, F::ZERO), |(m, v), (pm, pv)| (m + pm, v + pv));
            let sigma = self.lambda * (mac_sum - self.alpha * value_sum);
            sigma.pack(&mut bytes);
        }

        let sigmas = commit_and_open(player, "MAC check", bytes).await?;
        let mut sums = vec![F::ZERO; self.repetitions];
        for sigma in sigmas {
            for (k, sum) in sums.iter_mut().enumerate() {
                let part = sigma.get(k * F::BYTES..).unwrap_or_default();
                *sum += F::unpack(part)?;
            }
        }
        if sums.iter().any(|sum| *sum != F::ZERO) {
            return Err(Error::MacCheckFailed);
        }
        debug!(
            checked = values.len(),
            repetitions = self.repetitions,
            "MAC check passed"
        );
        Ok(())
    }

    /// Opens `shares` and fails with `which` unless all of them are zero.
    ///
    /// The MAC check of the opened values is left to the next [`MacCheck::check`].
    pub async fn check_for_zero<C: Channel>(
        &mut self,
        player: &Player<'_, C>,
        shares: &[Share<F>],
        which: OfflineCheck,
    ) -> Result<(), Error> {
        let opened = self.open(player, shares).await?;
        if opened.iter().any(|v| *v != F::ZERO) {
            return Err(Error::OfflineCheckFailed(which));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::rng;

    use super::*;
    use crate::{
        field::{Fp251, Mersenne61},
        player::simulate,
        share::{deal, lagrange_at_zero, threshold},
    };

    /// Trusted-dealer shares of `secrets` under `alpha` for `n` parties, indexed by party.
    fn dealt<F: Field>(alpha: F, secrets: &[F], n: usize) -> (Vec<F>, Vec<Vec<Share<F>>>) {
        let mut rng = rng();
        let t = threshold(n);
        let alphas = deal(alpha, t, n, &mut rng);
        let mut shares = vec![vec![]; n];
        for secret in secrets {
            let values = deal(*secret, t, n, &mut rng);
            let macs = deal(alpha * *secret, t, n, &mut rng);
            for i in 0..n {
                shares[i].push(Share::new(values[i], macs[i]));
            }
        }
        (alphas, shares)
    }

    fn secrets<F: Field>(n: u64) -> Vec<F> {
        (0..n).map(|i| F::from_u64(3 * i + 1)).collect()
    }

    async fn open_and_check<F: Field>(
        n: usize,
        config: Config,
        tamper: Option<F>,
    ) -> Result<Vec<Vec<F>>, Error> {
        let secrets = secrets::<F>(20);
        let (alphas, shares) = dealt(F::from_u64(77), &secrets, n);
        let lagrange = lagrange_at_zero::<F>(n)?;
        simulate(n, async |p| {
            let i = p.my_num();
            let queues = Arc::new(ThreadQueues::new(1)?);
            let mut mc = MacCheck::new(alphas[i], lagrange[i], &config, queues);
            let mut mine = shares[i].clone();
            if let (Some(delta), 0) = (tamper, i) {
                mine[5].value += delta;
            }
            let opened = mc.open(&p, &mine).await?;
            assert_eq!(mc.waiting_for_check(), 20);
            mc.check(&p).await?;
            assert_eq!(mc.waiting_for_check(), 0);
            Ok(opened)
        })
        .await
    }

    #[tokio::test]
    async fn honest_openings_pass() -> Result<(), Error> {
        for opening in [OpeningMode::Tree, OpeningMode::Direct] {
            let config = Config {
                opening,
                opening_sum: 2,
                max_broadcast: 2,
                ..Config::default()
            };
            for opened in open_and_check::<Fp251>(5, config.clone(), None).await? {
                assert_eq!(opened, secrets::<Fp251>(20));
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn tampered_share_is_detected() -> Result<(), Error> {
        for _ in 0..10 {
            let res =
                open_and_check::<Mersenne61>(3, Config::default(), Some(Mersenne61::ONE)).await;
            assert!(matches!(res, Err(Error::MacCheckFailed)));
        }
        Ok(())
    }

    #[tokio::test]
    async fn small_fields_repeat_the_check() -> Result<(), Error> {
        let queues = Arc::new(ThreadQueues::new(0)?);
        let config = Config::default();
        let small = MacCheck::new(Fp251::ONE, Fp251::ONE, &config, queues.clone());
        assert_eq!(small.repetitions(), 6);
        let large = MacCheck::new(Mersenne61::ONE, Mersenne61::ONE, &config, queues.clone());
        assert_eq!(large.repetitions(), 1);
        let weak = Config {
            security: 5,
            ..Config::default()
        };
        assert_eq!(MacCheck::new(Fp251::ONE, Fp251::ONE, &weak, queues).repetitions(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn tampered_share_is_detected_in_small_field() -> Result<(), Error> {
        // one combination alone would miss about one in 251 runs
        for _ in 0..20 {
            let res = open_and_check::<Fp251>(5, Config::default(), Some(Fp251::ONE)).await;
            assert!(matches!(res, Err(Error::MacCheckFailed)));
        }
        Ok(())
    }

    #[tokio::test]
    async fn automatic_check_after_popen_max() -> Result<(), Error> {
        let n = 3;
        let secrets = secrets::<Mersenne61>(10);
        let (alphas, shares) = dealt(Mersenne61::from_u64(5), &secrets, n);
        let lagrange = lagrange_at_zero::<Mersenne61>(n)?;
        let config = Config {
            popen_max: 4,
            ..Config::default()
        };
        simulate(n, async |p| {
            let i = p.my_num();
            let queues = Arc::new(ThreadQueues::new(0)?);
            let mut mc = MacCheck::new(alphas[i], lagrange[i], &config, queues);
            mc.open(&p, &shares[i][..3]).await?;
            assert_eq!(mc.waiting_for_check(), 3);
            mc.open(&p, &shares[i][3..]).await?;
            assert_eq!(mc.waiting_for_check(), 0);
            Ok(())
        })
        .await?;
        Ok(())
    }

    #[tokio::test]
    async fn nonzero_check_value() -> Result<(), Error> {
        let n = 3;
        let secrets = vec![Mersenne61::ZERO, Mersenne61::ONE];
        let (alphas, shares) = dealt(Mersenne61::from_u64(5), &secrets, n);
        let lagrange = lagrange_at_zero::<Mersenne61>(n)?;
        let res = simulate(n, async |p| {
            let i = p.my_num();
            let queues = Arc::new(ThreadQueues::new(0)?);
            let mut mc = MacCheck::new(alphas[i], lagrange[i], &Config::default(), queues);
            mc.check_for_zero(&p, &shares[i][..1], OfflineCheck::TripleSacrifice)
                .await?;
            mc.check_for_zero(&p, &shares[i], OfflineCheck::TripleSacrifice)
                .await
        })
        .await;
        assert!(matches!(
            res,
            Err(Error::OfflineCheckFailed(OfflineCheck::TripleSacrifice))
        ));
        Ok(())
    }
}
