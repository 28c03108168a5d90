use polyprep::{
    Config, Error,
    bit_adder::compose,
    channel::Channel,
    field::{Field, Fp251, Mersenne61},
    player::simulate,
    positions::{Dtype, FieldType},
    prep::{Dealer, Preprocessing},
    session::Session,
    share::Triple,
};

fn file_config(dir: &tempfile::TempDir) -> Config {
    Config {
        live_prep: false,
        prep_dir: dir.path().to_path_buf(),
        batch_size: 8,
        ..Config::default()
    }
}

async fn take<C: Channel>(
    prep: &mut Preprocessing<Mersenne61>,
    session: &mut Session<'_, C, Mersenne61>,
    n: usize,
) -> Result<Vec<Triple<Mersenne61>>, Error> {
    let mut triples = vec![];
    for _ in 0..n {
        triples.push(prep.get_triple(session).await?);
    }
    Ok(triples)
}

#[tokio::test]
async fn dealt_tuples_can_be_replayed() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let config = file_config(&dir);
    let dealer = Dealer::<Mersenne61>::new(&config, 3)?;
    dealer.triples(20)?;

    let results = simulate(3, async |p| {
        let mut session = Session::<_, Mersenne61>::setup(p, config.clone()).await?;
        let mut prep = Preprocessing::from_session(&session);
        let mut triples = take(&mut prep, &mut session, 4).await?;
        let pos = prep.tellg();
        let first = take(&mut prep, &mut session, 4).await?;
        prep.seekg(&pos)?;
        let replayed = take(&mut prep, &mut session, 4).await?;
        assert_eq!(first, replayed);
        assert_eq!(prep.tellg().get(FieldType::Arithmetic, Dtype::Triple), 8);
        triples.extend(replayed);
        triples.extend(take(&mut prep, &mut session, 12).await?);
        let exhausted = take(&mut prep, &mut session, 1).await;
        assert!(matches!(exhausted, Err(Error::MissingData(_))));

        let shares: Vec<_> = triples.iter().flat_map(|t| [t.a, t.b, t.c]).collect();
        let opened = session.open(&shares).await?;
        session.check().await?;
        Ok(opened)
    })
    .await?;
    for opened in results {
        assert_eq!(opened.len(), 60);
        assert!(opened.chunks(3).all(|t| t[0] * t[1] == t[2]));
    }
    Ok(())
}

#[tokio::test]
async fn every_kind_is_read_back() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let config = file_config(&dir);
    let n_bits = 20;
    let dealer = Dealer::<Mersenne61>::new(&config, 3)?;
    dealer.squares(8)?;
    dealer.inverses(8)?;
    dealer.bits(8)?;
    dealer.dabits(8)?;
    dealer.edabits(true, n_bits, 64)?;
    dealer.inputs(2, 8)?;

    let results = simulate(3, async |p| {
        let mut session = Session::<_, Mersenne61>::setup(p, config.clone()).await?;
        let mut prep = Preprocessing::from_session(&session);
        let mut arith = vec![];
        let mut binary = vec![];
        for _ in 0..8 {
            let s = prep.get_square(&mut session).await?;
            let i = prep.get_inverse(&mut session).await?;
            let d = prep.get_dabit(&mut session).await?;
            let bit = prep.get_bit(&mut session).await?;
            arith.extend([s.a, s.s, i.a, i.inv, d.a, bit]);
            binary.push(d.b);
        }
        let edabits = prep.get_edabitvec(&mut session, true, n_bits).await?;
        let tuple = prep.get_input(&mut session, 2).await?;
        let value = (p.my_num() == 2).then(|| Mersenne61::from_u64(4242));
        let input = session.input_with_tuple(2, tuple, value).await?;
        arith.push(input);

        let arith = session.open(&arith).await?;
        let binary = session.open_binary(&binary).await?;
        let a = session.open(&edabits.a).await?;
        let mut bits = vec![];
        for column in &edabits.b {
            bits.push(session.open_binary(column).await?);
        }
        session.check().await?;
        Ok((arith, binary, a, bits))
    })
    .await?;

    for (arith, binary, a, bits) in results {
        let (tuples, input) = arith.split_at(48);
        assert_eq!(input, [Mersenne61::from_u64(4242)]);
        for (t, b) in tuples.chunks(6).zip(binary) {
            assert_eq!(t[0] * t[0], t[1]);
            assert_eq!(t[2] * t[3], Mersenne61::ONE);
            assert_eq!(t[4].to_u64(), b.to_u64());
            assert!(t[5].is_bit());
        }
        assert_eq!(a.len(), 64);
        for (i, a) in a.iter().enumerate() {
            let column: Vec<_> = bits.iter().map(|column| column[i]).collect();
            assert_eq!(compose(&column), Some(a.to_u64()));
        }
    }
    Ok(())
}

#[tokio::test]
async fn missing_keys_and_tuples() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let config = file_config(&dir);
    let res = simulate(3, async |p| {
        Session::<_, Mersenne61>::setup(p, config.clone()).await?;
        Ok(())
    })
    .await;
    assert!(matches!(res, Err(Error::MissingData(_))));

    // keys of another field live in another directory
    Dealer::<Fp251>::new(&config, 3)?.triples(8)?;
    let res = simulate(3, async |p| {
        Session::<_, Mersenne61>::setup(p, config.clone()).await?;
        Ok(())
    })
    .await;
    assert!(matches!(res, Err(Error::MissingData(_))));

    Dealer::<Mersenne61>::new(&config, 3)?;
    let res = simulate(3, async |p| {
        let mut session = Session::<_, Mersenne61>::setup(p, config.clone()).await?;
        let mut prep = Preprocessing::from_session(&session);
        prep.get_triple(&mut session).await
    })
    .await;
    assert!(matches!(res, Err(Error::MissingData(_))));
    Ok(())
}
