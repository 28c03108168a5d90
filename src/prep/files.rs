//! Persisted preprocessing: reading tuples from files and a trusted dealer that writes them.
//!
//! Every file starts with a header (`u64` big-endian length, then the signature
//! `"<kind>:<field>"`) followed by fixed-width packed entries.

use std::{
    collections::{HashMap, hash_map::Entry},
    fs::{self, File},
    io::{self, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use rand::Rng;
use tracing::{Level, debug, info, instrument};

use crate::{
    Error,
    channel::Channel,
    config::Config,
    field::{Field, Gf2k64},
    positions::{DataPositions, Dtype, FieldType},
    session::Session,
    share::{
        BitShare, Dabit, Edabit, InputTuple, Inverse, Packed, Share, Square, Triple, deal,
        lagrange_at_zero, threshold,
    },
};

use super::sources::{BitSource, DabitSource, EdabitSource, InputSource, TripleSource};

const MAX_SIGNATURE_LEN: u64 = 1024;

/// A persisted kind of tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stored {
    /// Tuples counted per [`Dtype`].
    Tuples(Dtype),
    /// Input tuples of the given owner.
    Inputs(usize),
    /// edaBits of one flavor and length.
    Edabits {
        /// Whether the integers are below `2^n_bits`.
        strict: bool,
        /// The number of bits.
        n_bits: usize,
    },
}

impl Stored {
    fn kind(&self) -> &'static str {
        match self {
            Stored::Tuples(dtype) => dtype.name(),
            Stored::Inputs(_) => "Inputs",
            Stored::Edabits { .. } => "Edabits",
        }
    }

    /// The file name for `player` and `thread`.
    pub fn file_name(&self, player: usize, thread: usize) -> String {
        match self {
            Stored::Tuples(dtype) => format!("{}-P{player}-T{thread}", dtype.name()),
            Stored::Inputs(owner) => format!("Inputs-P{player}-I{owner}-T{thread}"),
            Stored::Edabits { strict, n_bits } => {
                let flavor = if *strict { "strict" } else { "loose" };
                format!("Edabits-{flavor}-{n_bits}-P{player}-T{thread}")
            }
        }
    }

    /// The number of entries consumed according to `pos`.
    fn position(&self, pos: &DataPositions) -> u64 {
        match self {
            Stored::Tuples(dtype) => pos.get(FieldType::Arithmetic, *dtype),
            Stored::Inputs(owner) => pos.inputs(FieldType::Arithmetic, *owner),
            Stored::Edabits { strict, n_bits } => pos.edabits(*strict, *n_bits),
        }
    }
}

/// The directory of the files of a run with `num_players` parties over `F`.
pub fn data_dir<F: Field>(prep_dir: &Path, num_players: usize) -> PathBuf {
    prep_dir.join(format!("{num_players}-{}", F::signature()))
}

fn mac_key_file(dir: &Path, player: usize) -> PathBuf {
    dir.join(format!("MacKeys-P{player}"))
}

fn signature<F: Field>(kind: &str) -> String {
    format!("{kind}:{}", F::signature())
}

fn missing(path: &Path, e: io::Error) -> Error {
    match e.kind() {
        ErrorKind::NotFound | ErrorKind::UnexpectedEof => {
            Error::MissingData(format!("{}: {e}", path.display()))
        }
        _ => Error::Io(e),
    }
}

fn write_header(w: &mut impl Write, signature: &str) -> io::Result<()> {
    w.write_all(&(signature.len() as u64).to_be_bytes())?;
    w.write_all(signature.as_bytes())
}

/// Reads the header of `path` and fails unless it carries `expected`.
fn check_header(r: &mut impl Read, path: &Path, expected: &str) -> Result<u64, Error> {
    let mut len = [0; 8];
    r.read_exact(&mut len).map_err(|e| missing(path, e))?;
    let len = u64::from_be_bytes(len);
    if len > MAX_SIGNATURE_LEN {
        return Err(Error::Decode(format!(
            "{}: header of {len} bytes",
            path.display()
        )));
    }
    let mut signature = vec![0; len as usize];
    r.read_exact(&mut signature).map_err(|e| missing(path, e))?;
    if signature != expected.as_bytes() {
        return Err(Error::SetupMismatch(format!(
            "{} holds '{}', expected '{expected}'",
            path.display(),
            String::from_utf8_lossy(&signature)
        )));
    }
    Ok(8 + len)
}

/// An open file of packed tuples.
#[derive(Debug)]
struct TupleFile {
    path: PathBuf,
    reader: BufReader<File>,
    data_start: u64,
    entry_size: usize,
    n_bits: usize,
}

impl TupleFile {
    fn open<F: Field>(
        path: PathBuf,
        kind: &str,
        entry_size: usize,
        n_bits: usize,
    ) -> Result<Self, Error> {
        let file = File::open(&path).map_err(|e| missing(&path, e))?;
        let mut reader = BufReader::new(file);
        let data_start = check_header(&mut reader, &path, &signature::<F>(kind))?;
        debug!(path = %path.display(), "opened preprocessing file");
        Ok(TupleFile {
            path,
            reader,
            data_start,
            entry_size,
            n_bits,
        })
    }

    fn seek(&mut self, entry: u64) -> Result<(), Error> {
        self.reader
            .seek(SeekFrom::Start(self.data_start + entry * self.entry_size as u64))?;
        Ok(())
    }

    fn read<T: Packed>(&mut self, n: usize) -> Result<Vec<T>, Error> {
        let mut buf = vec![0; n * self.entry_size];
        self.reader.read_exact(&mut buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => Error::MissingData(format!(
                "{} has fewer than {n} entries left",
                self.path.display()
            )),
            _ => Error::Io(e),
        })?;
        buf.chunks_exact(self.entry_size)
            .map(|entry| T::unpack(entry, self.n_bits))
            .collect()
    }
}

/// Reads this party's MAC key shares of both domains.
pub fn read_mac_keys<F: Field>(
    config: &Config,
    num_players: usize,
    my_num: usize,
) -> Result<(F, Gf2k64), Error> {
    let path = mac_key_file(&data_dir::<F>(&config.prep_dir, num_players), my_num);
    let mut reader = BufReader::new(File::open(&path).map_err(|e| missing(&path, e))?);
    check_header(&mut reader, &path, &signature::<F>("MacKeys"))?;
    let mut buf = vec![0; F::BYTES + Gf2k64::BYTES];
    reader.read_exact(&mut buf).map_err(|e| missing(&path, e))?;
    Ok((F::unpack(&buf)?, Gf2k64::unpack(&buf[F::BYTES..])?))
}

/// Reads tuples written by a [`Dealer`] (or an external offline phase) for one party-thread.
#[derive(Debug)]
pub struct FileSource {
    dir: PathBuf,
    my_num: usize,
    thread: usize,
    files: HashMap<Stored, TupleFile>,
    start: DataPositions,
}

impl FileSource {
    /// Reads the files of party `my_num` in the directory `config` points to.
    pub fn new<F: Field>(config: &Config, num_players: usize, my_num: usize) -> Self {
        FileSource {
            dir: data_dir::<F>(&config.prep_dir, num_players),
            my_num,
            thread: config.thread_num,
            files: HashMap::new(),
            start: DataPositions::new(num_players),
        }
    }

    fn read<F: Field, T: Packed>(
        &mut self,
        stored: Stored,
        n: usize,
        n_bits: usize,
    ) -> Result<Vec<T>, Error> {
        let file = match self.files.entry(stored) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let path = self.dir.join(stored.file_name(self.my_num, self.thread));
                let mut file = TupleFile::open::<F>(path, stored.kind(), T::size(n_bits), n_bits)?;
                file.seek(stored.position(&self.start))?;
                e.insert(file)
            }
        };
        file.read(n)
    }

    /// Moves every file cursor to the entry after the ones counted in `pos`.
    pub fn seekg(&mut self, pos: &DataPositions) -> Result<(), Error> {
        self.start = pos.clone();
        for (stored, file) in self.files.iter_mut() {
            file.seek(stored.position(pos))?;
        }
        Ok(())
    }
}

impl<F: Field> TripleSource<F> for FileSource {
    async fn triples<C: Channel>(
        &mut self,
        _session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Vec<Triple<F>>, Error> {
        self.read::<F, _>(Stored::Tuples(Dtype::Triple), n, 0)
    }

    async fn squares<C: Channel>(
        &mut self,
        _session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Vec<Square<F>>, Error> {
        self.read::<F, _>(Stored::Tuples(Dtype::Square), n, 0)
    }

    async fn stored_inverses<C: Channel>(
        &mut self,
        _session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Option<Vec<Inverse<F>>>, Error> {
        self.read::<F, _>(Stored::Tuples(Dtype::Inverse), n, 0).map(Some)
    }
}

impl<F: Field> BitSource<F> for FileSource {
    async fn bits<C: Channel>(
        &mut self,
        _session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Vec<Share<F>>, Error> {
        self.read::<F, _>(Stored::Tuples(Dtype::Bit), n, 0)
    }
}

impl<F: Field> DabitSource<F> for FileSource {
    async fn dabits<C: Channel>(
        &mut self,
        _session: &mut Session<'_, C, F>,
        n: usize,
    ) -> Result<Vec<Dabit<F>>, Error> {
        self.read::<F, _>(Stored::Tuples(Dtype::Dabit), n, 0)
    }
}

impl<F: Field> EdabitSource<F> for FileSource {
    async fn raw_edabits<C: Channel>(
        &mut self,
        _session: &mut Session<'_, C, F>,
        n_bits: usize,
        _n: usize,
    ) -> Result<Vec<Edabit<F>>, Error> {
        Err(Error::Misuse(format!(
            "raw edaBits of {n_bits} bits are not persisted"
        )))
    }

    async fn edabits<C: Channel>(
        &mut self,
        _session: &mut Session<'_, C, F>,
        strict: bool,
        n_bits: usize,
        n: usize,
    ) -> Result<Vec<Edabit<F>>, Error> {
        self.read::<F, _>(Stored::Edabits { strict, n_bits }, n, n_bits)
    }
}

impl<F: Field> InputSource<F> for FileSource {
    async fn inputs<C: Channel>(
        &mut self,
        _session: &mut Session<'_, C, F>,
        owner: usize,
        n: usize,
    ) -> Result<Vec<InputTuple<F>>, Error> {
        self.read::<F, _>(Stored::Inputs(owner), n, 0)
    }
}

/// A trusted dealer that knows both MAC keys and writes consistent tuples for all parties.
///
/// Used for benchmarking and for testing the online consumers of preprocessing without running
/// the offline phase. Every call overwrites the files of its kind.
#[derive(Debug)]
pub struct Dealer<F: Field> {
    dir: PathBuf,
    num_players: usize,
    threshold: usize,
    thread: usize,
    alpha: F,
    beta: Gf2k64,
}

impl<F: Field> Dealer<F> {
    /// Creates the directory of the run and writes fresh MAC key shares for all parties.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    pub fn new(config: &Config, num_players: usize) -> Result<Self, Error> {
        lagrange_at_zero::<F>(num_players)?;
        lagrange_at_zero::<Gf2k64>(num_players)?;
        let dir = data_dir::<F>(&config.prep_dir, num_players);
        fs::create_dir_all(&dir)?;
        let mut rng = rand::rng();
        let dealer = Dealer {
            dir,
            num_players,
            threshold: threshold(num_players),
            thread: config.thread_num,
            alpha: F::random(&mut rng),
            beta: Gf2k64::random(&mut rng),
        };
        let alphas = deal(dealer.alpha, dealer.threshold, num_players, &mut rng);
        let betas = deal(dealer.beta, dealer.threshold, num_players, &mut rng);
        for (p, (alpha, beta)) in alphas.into_iter().zip(betas).enumerate() {
            let mut w = BufWriter::new(File::create(mac_key_file(&dealer.dir, p))?);
            write_header(&mut w, &signature::<F>("MacKeys"))?;
            let mut buf = vec![];
            alpha.pack(&mut buf);
            beta.pack(&mut buf);
            w.write_all(&buf)?;
            w.flush()?;
        }
        info!(dir = %dealer.dir.display(), num_players, "dealer keys written");
        Ok(dealer)
    }

    /// Authenticated shares of `x` under the key `key`, one per party.
    fn share_with<G: Field>(&self, x: G, key: G, rng: &mut impl Rng) -> Vec<Share<G>> {
        let values = deal(x, self.threshold, self.num_players, rng);
        let macs = deal(key * x, self.threshold, self.num_players, rng);
        values
            .into_iter()
            .zip(macs)
            .map(|(v, m)| Share::new(v, m))
            .collect()
    }

    fn share(&self, x: F, rng: &mut impl Rng) -> Vec<Share<F>> {
        self.share_with(x, self.alpha, rng)
    }

    fn share_bit(&self, b: bool, rng: &mut impl Rng) -> Vec<BitShare> {
        self.share_with(Gf2k64::from_bit(b), self.beta, rng)
    }

    /// Writes `n` tuples made by `make` for every party.
    fn write<T: Packed>(
        &self,
        stored: Stored,
        n: usize,
        mut make: impl FnMut(&mut rand::rngs::ThreadRng) -> Vec<T>,
    ) -> Result<(), Error> {
        let mut rng = rand::rng();
        let mut buffers = vec![vec![]; self.num_players];
        for _ in 0..n {
            for (buf, tuple) in buffers.iter_mut().zip(make(&mut rng)) {
                tuple.pack(buf);
            }
        }
        for (p, buf) in buffers.into_iter().enumerate() {
            let path = self.dir.join(stored.file_name(p, self.thread));
            let mut w = BufWriter::new(File::create(&path)?);
            write_header(&mut w, &signature::<F>(stored.kind()))?;
            w.write_all(&buf)?;
            w.flush()?;
        }
        debug!(kind = stored.kind(), n, "dealt");
        Ok(())
    }

    /// Writes `n` triples per party.
    pub fn triples(&self, n: usize) -> Result<(), Error> {
        self.write(Stored::Tuples(Dtype::Triple), n, |rng| {
            let (a, b) = (F::random(rng), F::random(rng));
            let (a, b, c) = (self.share(a, rng), self.share(b, rng), self.share(a * b, rng));
            a.into_iter()
                .zip(b)
                .zip(c)
                .map(|((a, b), c)| Triple { a, b, c })
                .collect()
        })
    }

    /// Writes `n` squares per party.
    pub fn squares(&self, n: usize) -> Result<(), Error> {
        self.write(Stored::Tuples(Dtype::Square), n, |rng| {
            let a = F::random(rng);
            let (a, s) = (self.share(a, rng), self.share(a * a, rng));
            a.into_iter().zip(s).map(|(a, s)| Square { a, s }).collect()
        })
    }

    /// Writes `n` inverse pairs per party.
    pub fn inverses(&self, n: usize) -> Result<(), Error> {
        self.write(Stored::Tuples(Dtype::Inverse), n, |rng| {
            let (a, inv) = loop {
                let a = F::random(rng);
                if let Some(inv) = a.inverse() {
                    break (a, inv);
                }
            };
            let (a, inv) = (self.share(a, rng), self.share(inv, rng));
            a.into_iter()
                .zip(inv)
                .map(|(a, inv)| Inverse { a, inv })
                .collect()
        })
    }

    /// Writes `n` random bits per party.
    pub fn bits(&self, n: usize) -> Result<(), Error> {
        self.write(Stored::Tuples(Dtype::Bit), n, |rng| {
            let b = rng.random::<bool>();
            self.share(F::from_bit(b), rng)
        })
    }

    /// Writes `n` daBits per party.
    pub fn dabits(&self, n: usize) -> Result<(), Error> {
        self.write(Stored::Tuples(Dtype::Dabit), n, |rng| {
            let bit = rng.random::<bool>();
            let a = self.share(F::from_bit(bit), rng);
            let b = self.share_bit(bit, rng);
            a.into_iter().zip(b).map(|(a, b)| Dabit { a, b }).collect()
        })
    }

    /// Writes `n` edaBits of `n_bits` bits per party.
    pub fn edabits(&self, strict: bool, n_bits: usize, n: usize) -> Result<(), Error> {
        if n_bits == 0 || n_bits >= 64 || n_bits >= F::BITS {
            return Err(Error::Misuse(format!(
                "{} cannot hold edaBits of {n_bits} bits",
                F::signature()
            )));
        }
        self.write(Stored::Edabits { strict, n_bits }, n, |rng| {
            let x = rng.random::<u64>() & ((1 << n_bits) - 1);
            let a = self.share(F::from_u64(x), rng);
            let mut bits = vec![vec![]; self.num_players];
            for j in 0..n_bits {
                for (party, share) in bits.iter_mut().zip(self.share_bit(x >> j & 1 == 1, rng)) {
                    party.push(share);
                }
            }
            a.into_iter()
                .zip(bits)
                .map(|(a, bits)| Edabit { a, bits })
                .collect()
        })
    }

    /// Writes `n` input tuples of `owner` per party.
    pub fn inputs(&self, owner: usize, n: usize) -> Result<(), Error> {
        if owner >= self.num_players {
            return Err(Error::Misuse(format!("input of unknown party {owner}")));
        }
        self.write(Stored::Inputs(owner), n, |rng| {
            let mask = F::random(rng);
            self.share(mask, rng)
                .into_iter()
                .enumerate()
                .map(|(p, share)| InputTuple {
                    share,
                    mask: if p == owner { mask } else { F::ZERO },
                })
                .collect()
        })
    }
}
