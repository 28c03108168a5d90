//! Buffered correlated randomness.
//!
//! A [`BufferPrep`] hands out tuples one at a time and refills a kind's buffer with one batch
//! from its source whenever that buffer runs empty. Sources are chosen once per run: semi-honest
//! generation, generation followed by a sacrifice, or files written ahead of time.

pub mod files;
pub mod sacrifice;
pub mod semi_honest;
pub mod sources;

use std::collections::BTreeMap;

use tracing::{Level, debug, instrument};

pub use files::{Dealer, FileSource};
pub use sacrifice::{Sacrificed, ShuffleSacrifice};
pub use semi_honest::SemiHonest;
pub use sources::{BitSource, DabitSource, EdabitSource, InputSource, TripleSource};

use crate::{
    Error,
    channel::Channel,
    config::Config,
    field::Field,
    positions::{DataPositions, Dtype, FieldType},
    session::Session,
    share::{Dabit, Edabit, EdabitVec, InputTuple, Inverse, Share, Square, Triple},
};

/// The tuple sources selectable by configuration.
#[derive(Debug)]
pub enum Strategy {
    /// Semi-honest generation.
    SemiHonest(SemiHonest),
    /// Semi-honest generation followed by a sacrifice.
    Malicious(Sacrificed<SemiHonest>),
    /// Tuples read from persisted files.
    Files(FileSource),
}

impl Strategy {
    /// Picks the strategy for `config`: files unless live preprocessing is enabled, otherwise
    /// generation for the configured security model.
    pub fn from_config<F: Field>(config: &Config, num_players: usize, my_num: usize) -> Self {
        if !config.live_prep {
            Strategy::Files(FileSource::new::<F>(config, num_players, my_num))
        } else if config.is_malicious() {
            Strategy::Malicious(Sacrificed::new(SemiHonest, config.bucket_size))
        } else {
            Strategy::SemiHonest(SemiHonest)
        }
    }
}

impl<F: Field> TripleSource<F> for Strategy {
    async fn triples<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Vec<Triple<F>>, Error> {
        match self {
            Strategy::SemiHonest(s) => s.triples(session, n).await,
            Strategy::Malicious(s) => s.triples(session, n).await,
            Strategy::Files(s) => s.triples(session, n).await,
        }
    }

    async fn squares<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Vec<Square<F>>, Error> {
        match self {
            Strategy::SemiHonest(s) => s.squares(session, n).await,
            Strategy::Malicious(s) => s.squares(session, n).await,
            Strategy::Files(s) => s.squares(session, n).await,
        }
    }

    async fn stored_inverses<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Option<Vec<Inverse<F>>>, Error> {
        match self {
            Strategy::Files(s) => s.stored_inverses(session, n).await,
            Strategy::SemiHonest(_) | Strategy::Malicious(_) => Ok(None),
        }
    }
}

impl<F: Field> BitSource<F> for Strategy {
    async fn bits<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Vec<Share<F>>, Error> {
        match self {
            Strategy::SemiHonest(s) => s.bits(session, n).await,
            Strategy::Malicious(s) => s.bits(session, n).await,
            Strategy::Files(s) => s.bits(session, n).await,
        }
    }
}

impl<F: Field> DabitSource<F> for Strategy {
    async fn dabits<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Vec<Dabit<F>>, Error> {
        match self {
            Strategy::SemiHonest(s) => s.dabits(session, n).await,
            Strategy::Malicious(s) => s.dabits(session, n).await,
            Strategy::Files(s) => s.dabits(session, n).await,
        }
    }
}

impl<F: Field> EdabitSource<F> for Strategy {
    async fn raw_edabits<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        n_bits: usize,
        n: usize,
    ) -> Result<Vec<Edabit<F>>, Error> {
        match self {
            Strategy::SemiHonest(s) => s.raw_edabits(session, n_bits, n).await,
            Strategy::Malicious(s) => s.raw_edabits(session, n_bits, n).await,
            Strategy::Files(s) => s.raw_edabits(session, n_bits, n).await,
        }
    }

    async fn edabits<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        strict: bool,
        n_bits: usize,
        n: usize,
    ) -> Result<Vec<Edabit<F>>, Error> {
        match self {
            Strategy::SemiHonest(s) => s.edabits(session, strict, n_bits, n).await,
            Strategy::Malicious(s) => s.edabits(session, strict, n_bits, n).await,
            Strategy::Files(s) => s.edabits(session, strict, n_bits, n).await,
        }
    }
}

impl<F: Field> InputSource<F> for Strategy {
    async fn inputs<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        owner: usize,
        n: usize,
    ) -> Result<Vec<InputTuple<F>>, Error> {
        match self {
            Strategy::SemiHonest(s) => s.inputs(session, owner, n).await,
            Strategy::Malicious(s) => s.inputs(session, owner, n).await,
            Strategy::Files(s) => s.inputs(session, owner, n).await,
        }
    }
}

/// The buffers of all tuple kinds. Tuples are popped from the back, so batches are stored in
/// reverse to hand them out in the order they were produced.
#[derive(Debug, Default)]
struct Buffers<F: Field> {
    triples: Vec<Triple<F>>,
    squares: Vec<Square<F>>,
    inverses: Vec<Inverse<F>>,
    bits: Vec<Share<F>>,
    dabits: Vec<Dabit<F>>,
    edabits: BTreeMap<(bool, usize), Vec<EdabitVec<F>>>,
    inputs: BTreeMap<usize, Vec<InputTuple<F>>>,
}

impl<F: Field> Buffers<F> {
    fn leftovers(&self) -> DataPositions {
        let mut left = DataPositions::default();
        let arith = FieldType::Arithmetic;
        left.count(arith, Dtype::Triple, self.triples.len() as u64);
        left.count(arith, Dtype::Square, self.squares.len() as u64);
        left.count(arith, Dtype::Inverse, self.inverses.len() as u64);
        left.count(arith, Dtype::Bit, self.bits.len() as u64);
        left.count(arith, Dtype::Dabit, self.dabits.len() as u64);
        for ((strict, n_bits), vecs) in &self.edabits {
            let n: usize = vecs.iter().map(EdabitVec::len).sum();
            left.count_edabit(*strict, *n_bits, n as u64);
        }
        for (owner, tuples) in &self.inputs {
            left.count_input(arith, *owner, tuples.len() as u64);
        }
        left
    }
}

fn store<T>(buffer: &mut Vec<T>, mut batch: Vec<T>) {
    batch.reverse();
    *buffer = batch;
}

fn pop<T>(buffer: &mut Vec<T>, what: &str) -> Result<T, Error> {
    buffer
        .pop()
        .ok_or_else(|| Error::MissingData(format!("refill produced no {what}")))
}

/// Per-kind buffers over a tuple source `S`, counting consumption and refills.
#[derive(Debug)]
pub struct BufferPrep<F: Field, S> {
    source: S,
    batch_size: usize,
    buffers: Buffers<F>,
    saved: Vec<Buffers<F>>,
    usage: DataPositions,
    refills: DataPositions,
    do_count: bool,
}

/// Buffers over the configured strategy.
pub type Preprocessing<F> = BufferPrep<F, Strategy>;

impl<F: Field> Preprocessing<F> {
    /// Buffers over the strategy selected by the session's configuration.
    pub fn from_session<C: Channel>(session: &Session<'_, C, F>) -> Self {
        let player = session.player();
        let strategy =
            Strategy::from_config::<F>(session.config(), player.num_players(), player.my_num());
        BufferPrep::new(strategy, session.config(), player.num_players())
    }

    /// Restores the consumption counters to `pos`, dropping buffered tuples. File-backed
    /// sources continue reading right after the tuples counted in `pos`.
    pub fn seekg(&mut self, pos: &DataPositions) -> Result<(), Error> {
        self.discard();
        if let Strategy::Files(files) = &mut self.source {
            files.seekg(pos)?;
        }
        self.usage = pos.clone();
        Ok(())
    }
}

impl<F: Field, S> BufferPrep<F, S> {
    /// Creates empty buffers over `source`.
    pub fn new(source: S, config: &Config, num_players: usize) -> Self {
        BufferPrep {
            source,
            batch_size: config.batch_size,
            buffers: Buffers::default(),
            saved: vec![],
            usage: DataPositions::new(num_players),
            refills: DataPositions::new(num_players),
            do_count: true,
        }
    }

    /// The tuple source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The tuples handed out so far.
    pub fn usage(&self) -> &DataPositions {
        &self.usage
    }

    /// The number of refills per kind.
    pub fn refills(&self) -> &DataPositions {
        &self.refills
    }

    /// The current consumption position, to be restored with `seekg`.
    pub fn tellg(&self) -> DataPositions {
        self.usage.clone()
    }

    /// Sets all consumption counters to zero.
    pub fn reset_usage(&mut self) {
        self.usage.reset();
    }

    /// Sets aside the current buffers for a nested execution, which starts with empty buffers.
    pub fn push_state(&mut self) {
        self.saved.push(std::mem::take(&mut self.buffers));
    }

    /// Ends a nested execution: its leftover tuples are dropped and the buffers set aside by the
    /// matching [`BufferPrep::push_state`] are restored.
    pub fn pop_state(&mut self) -> Result<(), Error> {
        let saved = self
            .saved
            .pop()
            .ok_or_else(|| Error::Misuse("pop_state without push_state".to_string()))?;
        self.discard();
        self.buffers = saved;
        Ok(())
    }

    /// The tuples produced but not yet handed out, per kind.
    pub fn buffered(&self) -> DataPositions {
        self.buffers.leftovers()
    }

    /// Drops all buffered tuples, logging how many were left. Also runs when the buffers are
    /// dropped, for the current state and every state set aside by `push_state`.
    pub fn discard(&mut self) {
        let left = self.buffers.leftovers();
        if !left.is_empty() {
            left.log_cost("discarded");
        }
        self.buffers = Buffers::default();
    }

    fn count(&mut self, dtype: Dtype) {
        if self.do_count {
            self.usage.count(FieldType::Arithmetic, dtype, 1);
        }
    }

    fn refilled(&mut self, dtype: Dtype, n: usize) {
        self.refills.count(FieldType::Arithmetic, dtype, 1);
        debug!(kind = dtype.name(), n, "buffer refilled");
    }
}

impl<F: Field, S> Drop for BufferPrep<F, S> {
    fn drop(&mut self) {
        self.discard();
        while let Some(saved) = self.saved.pop() {
            self.buffers = saved;
            self.discard();
        }
    }
}

impl<F: Field, S: TripleSource<F>> BufferPrep<F, S> {
    /// The next multiplication triple.
    pub async fn get_triple<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
    ) -> Result<Triple<F>, Error> {
        if self.buffers.triples.is_empty() {
            let batch = self.source.triples(session, self.batch_size).await?;
            self.refilled(Dtype::Triple, batch.len());
            store(&mut self.buffers.triples, batch);
        }
        self.count(Dtype::Triple);
        pop(&mut self.buffers.triples, "triples")
    }

    /// The next square.
    pub async fn get_square<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
    ) -> Result<Square<F>, Error> {
        if self.buffers.squares.is_empty() {
            let batch = self.source.squares(session, self.batch_size).await?;
            self.refilled(Dtype::Square, batch.len());
            store(&mut self.buffers.squares, batch);
        }
        self.count(Dtype::Square);
        pop(&mut self.buffers.squares, "squares")
    }

    /// The next inverse pair.
    pub async fn get_inverse<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
    ) -> Result<Inverse<F>, Error> {
        if self.buffers.inverses.is_empty() {
            self.buffer_inverses(session).await?;
        }
        self.count(Dtype::Inverse);
        pop(&mut self.buffers.inverses, "inverses")
    }

    /// Fills the inverse buffer from stored inverses or, for live sources, from triples
    /// `(a, b, c)` with `c` opened: `(a, b / c)` is an inverse pair unless `c = 0`.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    async fn buffer_inverses<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
    ) -> Result<(), Error> {
        let batch_size = self.batch_size;
        if let Some(batch) = self.source.stored_inverses(session, batch_size).await? {
            self.refilled(Dtype::Inverse, batch.len());
            store(&mut self.buffers.inverses, batch);
            return Ok(());
        }
        let mut batch = Vec::with_capacity(batch_size);
        while batch.len() < batch_size {
            let needed = batch_size - batch.len();
            let do_count = std::mem::replace(&mut self.do_count, false);
            let mut triples = Vec::with_capacity(needed);
            let mut drawn = Ok(());
            for _ in 0..needed {
                match self.get_triple(session).await {
                    Ok(t) => triples.push(t),
                    Err(e) => {
                        drawn = Err(e);
                        break;
                    }
                }
            }
            self.do_count = do_count;
            drawn?;
            let cs: Vec<_> = triples.iter().map(|t| t.c).collect();
            let opened = session.open(&cs).await?;
            for (t, c) in triples.into_iter().zip(opened) {
                if let Some(c_inv) = c.inverse() {
                    batch.push(Inverse {
                        a: t.a,
                        inv: t.b * c_inv,
                    });
                }
            }
        }
        self.refilled(Dtype::Inverse, batch.len());
        store(&mut self.buffers.inverses, batch);
        Ok(())
    }
}

impl<F: Field, S: BitSource<F>> BufferPrep<F, S> {
    /// The next random bit.
    pub async fn get_bit<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
    ) -> Result<Share<F>, Error> {
        if self.buffers.bits.is_empty() {
            let batch = self.source.bits(session, self.batch_size).await?;
            self.refilled(Dtype::Bit, batch.len());
            store(&mut self.buffers.bits, batch);
        }
        self.count(Dtype::Bit);
        pop(&mut self.buffers.bits, "bits")
    }
}

impl<F: Field, S: DabitSource<F>> BufferPrep<F, S> {
    /// The next daBit.
    pub async fn get_dabit<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
    ) -> Result<Dabit<F>, Error> {
        if self.buffers.dabits.is_empty() {
            let batch = self.source.dabits(session, self.batch_size).await?;
            self.refilled(Dtype::Dabit, batch.len());
            store(&mut self.buffers.dabits, batch);
        }
        self.count(Dtype::Dabit);
        pop(&mut self.buffers.dabits, "daBits")
    }
}

impl<F: Field, S: EdabitSource<F>> BufferPrep<F, S> {
    /// The next batch of up to [`EdabitVec::MAX_SIZE`] edaBits of `n_bits` bits.
    pub async fn get_edabitvec<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        strict: bool,
        n_bits: usize,
    ) -> Result<EdabitVec<F>, Error> {
        let key = (strict, n_bits);
        if self.buffers.edabits.get(&key).is_none_or(Vec::is_empty) {
            let n = self.batch_size.div_ceil(EdabitVec::<F>::MAX_SIZE) * EdabitVec::<F>::MAX_SIZE;
            let edabits = self.source.edabits(session, strict, n_bits, n).await?;
            self.refills.count_edabit(strict, n_bits, 1);
            debug!(strict, n_bits, n = edabits.len(), "edaBit buffer refilled");
            let batch = EdabitVec::from_edabits(edabits, n_bits);
            store(self.buffers.edabits.entry(key).or_default(), batch);
        }
        let vec = pop(self.buffers.edabits.entry(key).or_default(), "edaBits")?;
        if self.do_count {
            self.usage.count_edabit(strict, n_bits, vec.len() as u64);
        }
        Ok(vec)
    }
}

impl<F: Field, S: InputSource<F>> BufferPrep<F, S> {
    /// The next input tuple of `owner`.
    pub async fn get_input<C: Channel>(
        &mut self,
        session: &mut Session<'_, C, F>,
        owner: usize,
    ) -> Result<InputTuple<F>, Error> {
        if self.buffers.inputs.get(&owner).is_none_or(Vec::is_empty) {
            let batch = self.source.inputs(session, owner, self.batch_size).await?;
            self.refills.count_input(FieldType::Arithmetic, owner, 1);
            debug!(owner, n = batch.len(), "input buffer refilled");
            store(self.buffers.inputs.entry(owner).or_default(), batch);
        }
        if self.do_count {
            self.usage.count_input(FieldType::Arithmetic, owner, 1);
        }
        pop(self.buffers.inputs.entry(owner).or_default(), "input tuples")
    }
}
