use std::collections::HashSet;

use polyprep::{
    Config, Error, OfflineCheck, SecurityModel,
    bit_adder::compose,
    channel::Channel,
    field::{Field, Fp251, Mersenne61},
    player::simulate,
    positions::{Dtype, FieldType},
    prep::{
        BufferPrep, DabitSource, EdabitSource, Preprocessing, Sacrificed, SemiHonest,
        TripleSource,
    },
    session::Session,
    share::{Dabit, Edabit, Share, Square, Triple},
};

fn config(batch_size: usize, security_model: SecurityModel) -> Config {
    Config {
        batch_size,
        security_model,
        ..Config::default()
    }
}

#[tokio::test]
async fn end_to_end_triples_over_small_field() -> Result<(), Error> {
    for model in [SecurityModel::SemiHonest, SecurityModel::Malicious] {
        let config = config(16, model);
        let results = simulate(3, async |p| {
            let mut session = Session::<_, Fp251>::setup(p, config.clone()).await?;
            let mut prep = Preprocessing::from_session(&session);
            let mut shares = vec![];
            for _ in 0..16 {
                let t = prep.get_triple(&mut session).await?;
                shares.extend([t.a, t.b, t.c]);
            }
            let opened = session.open(&shares).await?;
            session.check().await?;
            assert_eq!(prep.refills().get(FieldType::Arithmetic, Dtype::Triple), 1);
            Ok(opened)
        })
        .await?;
        for opened in results {
            assert_eq!(opened.len(), 48);
            for abc in opened.chunks(3) {
                assert_eq!(abc[0] * abc[1], abc[2]);
            }
        }
    }
    Ok(())
}

#[tokio::test]
async fn ten_thousand_triples() -> Result<(), Error> {
    let config = config(1000, SecurityModel::SemiHonest);
    let results = simulate(3, async |p| {
        let mut session = Session::<_, Fp251>::setup(p, config.clone()).await?;
        let mut prep = Preprocessing::from_session(&session);
        let mut shares = Vec::with_capacity(30_000);
        for _ in 0..10_000 {
            let t = prep.get_triple(&mut session).await?;
            shares.extend([t.a, t.b, t.c]);
        }
        let opened = session.open(&shares).await?;
        session.check().await?;
        Ok(opened)
    })
    .await?;
    for opened in results {
        assert!(opened.chunks(3).all(|abc| abc[0] * abc[1] == abc[2]));
    }
    Ok(())
}

#[tokio::test]
async fn refills_match_consumption() -> Result<(), Error> {
    let config = config(16, SecurityModel::SemiHonest);
    let results = simulate(3, async |p| {
        let mut session = Session::<_, Mersenne61>::setup(p, config.clone()).await?;
        let mut prep = Preprocessing::from_session(&session);
        let mut shares = vec![];
        for _ in 0..50 {
            let t = prep.get_triple(&mut session).await?;
            shares.extend([t.a, t.b]);
        }
        let refills = prep.refills().get(FieldType::Arithmetic, Dtype::Triple);
        let used = prep.usage().get(FieldType::Arithmetic, Dtype::Triple);
        let opened = session.open(&shares).await?;
        session.check().await?;
        Ok((refills, used, opened))
    })
    .await?;
    for (refills, used, opened) in results {
        assert_eq!(refills, 50_u64.div_ceil(16));
        assert_eq!(used, 50);
        let distinct: HashSet<_> = opened.chunks(2).map(|ab| (ab[0], ab[1])).collect();
        assert_eq!(distinct.len(), 50);
    }
    Ok(())
}

#[tokio::test]
async fn squares_inverses_and_bits() -> Result<(), Error> {
    for model in [SecurityModel::SemiHonest, SecurityModel::Malicious] {
        let config = config(20, model);
        let results = simulate(3, async |p| {
            let mut session = Session::<_, Fp251>::setup(p, config.clone()).await?;
            let mut prep = Preprocessing::from_session(&session);
            let mut squares = vec![];
            let mut inverses = vec![];
            let mut bits = vec![];
            for _ in 0..30 {
                let s = prep.get_square(&mut session).await?;
                squares.extend([s.a, s.s]);
                let i = prep.get_inverse(&mut session).await?;
                inverses.extend([i.a, i.inv]);
                bits.push(prep.get_bit(&mut session).await?);
            }
            let squares = session.open(&squares).await?;
            let inverses = session.open(&inverses).await?;
            let bits = session.open(&bits).await?;
            session.check().await?;
            // inverses are drawn from triples without counting them as used
            assert_eq!(prep.usage().get(FieldType::Arithmetic, Dtype::Triple), 0);
            assert_eq!(prep.usage().get(FieldType::Arithmetic, Dtype::Inverse), 30);
            Ok((squares, inverses, bits))
        })
        .await?;
        for (squares, inverses, bits) in results {
            assert!(squares.chunks(2).all(|s| s[0] * s[0] == s[1]));
            assert!(inverses.chunks(2).all(|i| i[0] * i[1] == Fp251::ONE));
            assert!(bits.iter().all(|b| b.is_bit()));
        }
    }
    Ok(())
}

#[tokio::test]
async fn dabits_agree_across_domains() -> Result<(), Error> {
    for model in [SecurityModel::SemiHonest, SecurityModel::Malicious] {
        let config = Config {
            threads: 2,
            ..config(32, model)
        };
        let results = simulate(4, async |p| {
            let mut session = Session::<_, Mersenne61>::setup(p, config.clone()).await?;
            let mut prep = Preprocessing::from_session(&session);
            let mut arith = vec![];
            let mut binary = vec![];
            for _ in 0..40 {
                let d = prep.get_dabit(&mut session).await?;
                arith.push(d.a);
                binary.push(d.b);
            }
            let arith = session.open(&arith).await?;
            let binary = session.open_binary(&binary).await?;
            session.check().await?;
            Ok((arith, binary))
        })
        .await?;
        for (arith, binary) in results {
            for (a, b) in arith.iter().zip(binary) {
                assert!(a.is_bit() && b.is_bit());
                assert_eq!(a.to_u64(), b.to_u64());
            }
        }
    }
    Ok(())
}

#[tokio::test]
async fn edabits_agree_across_domains() -> Result<(), Error> {
    let n_bits = 32;
    for model in [SecurityModel::SemiHonest, SecurityModel::Malicious] {
        let config = config(50, model);
        let results = simulate(3, async |p| {
            let mut session = Session::<_, Mersenne61>::setup(p, config.clone()).await?;
            let mut prep = Preprocessing::from_session(&session);
            let mut opened = vec![];
            for strict in [true, false] {
                let vec = prep.get_edabitvec(&mut session, strict, n_bits).await?;
                assert_eq!(vec.len(), 64);
                assert_eq!(vec.b.len(), n_bits);
                let a = session.open(&vec.a).await?;
                let mut bits = vec![];
                for column in &vec.b {
                    bits.push(session.open_binary(column).await?);
                }
                opened.push((strict, a, bits));
            }
            session.check().await?;
            Ok(opened)
        })
        .await?;
        for opened in results {
            for (strict, a, bits) in opened {
                for (i, a) in a.iter().enumerate() {
                    let column: Vec<_> = bits.iter().map(|column| column[i]).collect();
                    let x = compose(&column).expect("bits are bits");
                    if strict {
                        assert_eq!(a.to_u64(), x);
                    } else {
                        assert_eq!(a.to_u64() % (1 << n_bits), x);
                    }
                }
            }
        }
    }
    Ok(())
}

#[tokio::test]
async fn input_tuples_inject_private_values() -> Result<(), Error> {
    let config = config(4, SecurityModel::Malicious);
    let results = simulate(3, async |p| {
        let mut session = Session::<_, Mersenne61>::setup(p, config.clone()).await?;
        let mut prep = Preprocessing::from_session(&session);
        let mut shares = vec![];
        for k in 0..6 {
            let owner = k % 3;
            let tuple = prep.get_input(&mut session, owner).await?;
            let value = (owner == p.my_num()).then(|| Mersenne61::from_u64(100 + k as u64));
            shares.push(session.input_with_tuple(owner, tuple, value).await?);
        }
        let opened = session.open(&shares).await?;
        session.check().await?;
        assert_eq!(prep.usage().inputs(FieldType::Arithmetic, 2), 2);
        Ok(opened)
    })
    .await?;
    for opened in results {
        assert_eq!(opened, (100..106).map(Mersenne61::from_u64).collect::<Vec<_>>());
    }
    Ok(())
}

#[tokio::test]
async fn tampered_opening_fails_the_mac_check() {
    let res = simulate(3, async |p| {
        let mut session = Session::<_, Mersenne61>::setup(p, Config::default()).await?;
        let mut x = session.random(3).await?;
        if p.my_num() == 0 {
            x[1].value += Mersenne61::from_u64(5);
        }
        session.open(&x).await?;
        session.check().await
    })
    .await;
    assert!(matches!(res, Err(Error::MacCheckFailed)));
}

#[tokio::test]
async fn online_cheating_is_not_blamed_on_preprocessing() {
    let config = config(8, SecurityModel::Malicious);
    let res = simulate(3, async |p| {
        let mut session = Session::<_, Mersenne61>::setup(p, config.clone()).await?;
        let mut prep = Preprocessing::from_session(&session);
        let mut x = session.random(3).await?;
        if p.my_num() == 0 {
            x[1].value += Mersenne61::from_u64(5);
        }
        session.open(&x).await?;
        // the refill runs a sacrifice, which must not swallow the pending online opening
        prep.get_triple(&mut session).await
    })
    .await;
    assert!(matches!(res, Err(Error::MacCheckFailed)));
}

#[tokio::test]
async fn private_output_reaches_only_the_receiver() -> Result<(), Error> {
    let config = config(4, SecurityModel::Malicious);
    let results = simulate(3, async |p| {
        let mut session = Session::<_, Mersenne61>::setup(p, config.clone()).await?;
        let mut prep = Preprocessing::from_session(&session);
        let x = session.random(3).await?;
        let mut tuples = vec![];
        for _ in 0..3 {
            tuples.push(prep.get_input(&mut session, 1).await?);
        }
        let private = session.open_to(1, &x, &tuples).await?;
        let public = session.open(&x).await?;
        session.check().await?;

        let misuse = session.open_to(3, &x, &tuples).await;
        assert!(matches!(misuse, Err(Error::Misuse(_))));
        let misuse = session.open_to(1, &x, &tuples[..2]).await;
        assert!(matches!(misuse, Err(Error::Misuse(_))));
        Ok((private, public))
    })
    .await?;
    for (i, (private, public)) in results.into_iter().enumerate() {
        if i == 1 {
            assert_eq!(private, Some(public));
        } else {
            assert_eq!(private, None);
        }
    }
    Ok(())
}

#[tokio::test]
async fn tampered_private_output_fails_the_mac_check() {
    let config = config(4, SecurityModel::Malicious);
    let res = simulate(3, async |p| {
        let mut session = Session::<_, Mersenne61>::setup(p, config.clone()).await?;
        let mut prep = Preprocessing::from_session(&session);
        let mut x = session.random(2).await?;
        let tuples = vec![
            prep.get_input(&mut session, 0).await?,
            prep.get_input(&mut session, 0).await?,
        ];
        if p.my_num() == 2 {
            x[0].value += Mersenne61::ONE;
        }
        session.open_to(0, &x, &tuples).await?;
        session.check().await
    })
    .await;
    assert!(matches!(res, Err(Error::MacCheckFailed)));
}

#[tokio::test]
async fn leftovers_are_accounted() -> Result<(), Error> {
    let config = config(8, SecurityModel::SemiHonest);
    simulate(3, async |p| {
        let mut session = Session::<_, Fp251>::setup(p, config.clone()).await?;
        let mut prep = Preprocessing::from_session(&session);
        prep.get_triple(&mut session).await?;
        assert_eq!(prep.buffered().get(FieldType::Arithmetic, Dtype::Triple), 7);
        prep.discard();
        assert!(prep.buffered().is_empty());

        prep.get_square(&mut session).await?;
        prep.push_state();
        assert!(prep.buffered().is_empty());
        prep.get_triple(&mut session).await?;
        // dropping accounts for the nested buffers and those set aside
        drop(prep);
        Ok(())
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn nested_states_keep_outer_buffers() -> Result<(), Error> {
    let config = config(8, SecurityModel::SemiHonest);
    simulate(3, async |p| {
        let mut session = Session::<_, Fp251>::setup(p, config.clone()).await?;
        let mut prep = Preprocessing::from_session(&session);
        prep.get_triple(&mut session).await?;
        prep.push_state();
        prep.get_triple(&mut session).await?;
        assert_eq!(prep.refills().get(FieldType::Arithmetic, Dtype::Triple), 2);
        prep.pop_state()?;
        for _ in 0..7 {
            prep.get_triple(&mut session).await?;
        }
        assert_eq!(prep.refills().get(FieldType::Arithmetic, Dtype::Triple), 2);
        assert!(matches!(prep.pop_state(), Err(Error::Misuse(_))));
        Ok(())
    })
    .await?;
    Ok(())
}

/// Produces triples with `c = ab + 1` for one candidate of every batch, with valid MACs.
struct CorruptTriples;

impl<F: Field> TripleSource<F> for CorruptTriples {
    async fn triples<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Vec<Triple<F>>, Error> {
        let mut triples = SemiHonest.triples(session, n).await?;
        let alpha = session.alpha();
        let bad = &mut triples[n / 2];
        bad.c = bad.c.add_public(F::ONE, alpha);
        Ok(triples)
    }

    async fn squares<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Vec<Square<F>>, Error> {
        SemiHonest.squares(session, n).await
    }
}

#[tokio::test]
async fn corrupted_triples_are_rejected() {
    let config = Config {
        threads: 2,
        ..config(10, SecurityModel::Malicious)
    };
    for _ in 0..20 {
        let res = simulate(3, async |p| {
            let mut session = Session::<_, Mersenne61>::setup(p, config.clone()).await?;
            let source = Sacrificed::new(CorruptTriples, config.bucket_size);
            let mut prep = BufferPrep::new(source, &config, 3);
            prep.get_triple(&mut session).await
        })
        .await;
        assert!(matches!(
            res,
            Err(Error::OfflineCheckFailed(
                OfflineCheck::TripleCutAndChoose | OfflineCheck::TripleSacrifice
            ))
        ));
    }
}

#[tokio::test]
async fn corrupted_triples_pass_without_sacrifice() -> Result<(), Error> {
    let config = config(10, SecurityModel::SemiHonest);
    let results = simulate(3, async |p| {
        let mut session = Session::<_, Mersenne61>::setup(p, config.clone()).await?;
        let mut prep = BufferPrep::new(CorruptTriples, &config, 3);
        let mut shares = vec![];
        for _ in 0..10 {
            let t = prep.get_triple(&mut session).await?;
            shares.extend([t.a, t.b, t.c]);
        }
        let opened = session.open(&shares).await?;
        session.check().await?;
        Ok(opened)
    })
    .await?;
    for opened in results {
        let wrong = opened.chunks(3).filter(|t| t[0] * t[1] != t[2]).count();
        assert_eq!(wrong, 1);
    }
    Ok(())
}

/// Produces daBits whose arithmetic half is flipped for one candidate of every batch.
struct CorruptDabits;

impl<F: Field> DabitSource<F> for CorruptDabits {
    async fn dabits<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Vec<Dabit<F>>, Error> {
        let mut dabits = SemiHonest.dabits(session, n).await?;
        let alpha = session.alpha();
        let bad = &mut dabits[n / 2];
        bad.a = Share::constant(F::ONE, alpha) - bad.a;
        Ok(dabits)
    }
}

#[tokio::test]
async fn corrupted_dabits_are_rejected() {
    let config = config(10, SecurityModel::Malicious);
    for _ in 0..20 {
        let res = simulate(3, async |p| {
            let mut session = Session::<_, Mersenne61>::setup(p, config.clone()).await?;
            let source = Sacrificed::new(CorruptDabits, config.bucket_size);
            let mut prep = BufferPrep::new(source, &config, 3);
            prep.get_dabit(&mut session).await
        })
        .await;
        assert!(matches!(
            res,
            Err(Error::OfflineCheckFailed(
                OfflineCheck::DabitCutAndChoose | OfflineCheck::DabitSacrifice
            ))
        ));
    }
}

/// Produces edaBits whose integer is one too large for one candidate of every batch.
struct CorruptEdabits;

impl<F: Field> DabitSource<F> for CorruptEdabits {
    async fn dabits<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Vec<Dabit<F>>, Error> {
        SemiHonest.dabits(session, n).await
    }
}

impl<F: Field> EdabitSource<F> for CorruptEdabits {
    async fn raw_edabits<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n_bits: usize,
        n: usize,
    ) -> Result<Vec<Edabit<F>>, Error> {
        let mut edabits = SemiHonest.raw_edabits(session, n_bits, n).await?;
        let alpha = session.alpha();
        let bad = &mut edabits[n / 2];
        bad.a = bad.a.add_public(F::ONE, alpha);
        Ok(edabits)
    }
}

#[tokio::test]
async fn corrupted_edabits_are_rejected() {
    let config = config(10, SecurityModel::Malicious);
    for _ in 0..20 {
        let res = simulate(3, async |p| {
            let mut session = Session::<_, Mersenne61>::setup(p, config.clone()).await?;
            let source = Sacrificed::new(CorruptEdabits, config.bucket_size);
            let mut prep = BufferPrep::new(source, &config, 3);
            prep.get_edabitvec(&mut session, false, 8).await
        })
        .await;
        assert!(matches!(
            res,
            Err(Error::OfflineCheckFailed(
                OfflineCheck::EdabitCutAndChoose | OfflineCheck::EdabitSacrifice
            ))
        ));
    }
}
