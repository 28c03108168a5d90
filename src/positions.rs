//! Usage counters of preprocessed data.

use std::{
    collections::BTreeMap,
    ops::{Add, Sub},
};

use serde::{Deserialize, Serialize};
use tracing::info;

/// The domain a tuple lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// The arithmetic field.
    Arithmetic,
    /// GF(2^64), the domain of bit shares.
    Binary,
}

impl FieldType {
    /// Both domains.
    pub const ALL: [FieldType; 2] = [FieldType::Arithmetic, FieldType::Binary];
}

/// Tuple kinds that are counted per domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Dtype {
    /// Multiplication triples.
    Triple,
    /// Squares.
    Square,
    /// Random bits.
    Bit,
    /// Inverse pairs.
    Inverse,
    /// daBits.
    Dabit,
}

impl Dtype {
    /// All kinds.
    pub const ALL: [Dtype; 5] = [
        Dtype::Triple,
        Dtype::Square,
        Dtype::Bit,
        Dtype::Inverse,
        Dtype::Dabit,
    ];

    /// The name used in file names and logs.
    pub fn name(self) -> &'static str {
        match self {
            Dtype::Triple => "Triples",
            Dtype::Square => "Squares",
            Dtype::Bit => "Bits",
            Dtype::Inverse => "Inverses",
            Dtype::Dabit => "daBits",
        }
    }
}

const N_FIELDS: usize = FieldType::ALL.len();
const N_DTYPES: usize = Dtype::ALL.len();

/// Per-kind, per-player counters of consumed (or produced) tuples.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPositions {
    files: [[u64; N_DTYPES]; N_FIELDS],
    inputs: Vec<[u64; N_FIELDS]>,
    edabits: BTreeMap<(bool, usize), u64>,
}

impl DataPositions {
    /// Empty counters for `num_players` parties.
    pub fn new(num_players: usize) -> Self {
        DataPositions {
            files: Default::default(),
            inputs: vec![[0; N_FIELDS]; num_players],
            edabits: BTreeMap::new(),
        }
    }

    /// The number of parties whose inputs are counted.
    pub fn num_players(&self) -> usize {
        self.inputs.len()
    }

    /// Resets all counters to zero.
    pub fn reset(&mut self) {
        *self = DataPositions::new(self.num_players());
    }

    /// Counts `n` tuples of `dtype` in `field`.
    pub fn count(&mut self, field: FieldType, dtype: Dtype, n: u64) {
        self.files[field as usize][dtype as usize] += n;
    }

    /// Counts one input tuple of `player` in `field`.
    pub fn count_input(&mut self, field: FieldType, player: usize, n: u64) {
        if player >= self.inputs.len() {
            self.inputs.resize(player + 1, [0; N_FIELDS]);
        }
        self.inputs[player][field as usize] += n;
    }

    /// Counts one edaBit (vector) of `n_bits` bits.
    pub fn count_edabit(&mut self, strict: bool, n_bits: usize, n: u64) {
        *self.edabits.entry((strict, n_bits)).or_default() += n;
    }

    /// The count of `dtype` in `field`.
    pub fn get(&self, field: FieldType, dtype: Dtype) -> u64 {
        self.files[field as usize][dtype as usize]
    }

    /// The count of input tuples of `player` in `field`.
    pub fn inputs(&self, field: FieldType, player: usize) -> u64 {
        self.inputs.get(player).map_or(0, |i| i[field as usize])
    }

    /// The count of edaBits of the given flavor and length.
    pub fn edabits(&self, strict: bool, n_bits: usize) -> u64 {
        self.edabits.get(&(strict, n_bits)).copied().unwrap_or(0)
    }

    /// The count of all edaBits of `n_bits` bits, strict and loose.
    pub fn total_edabits(&self, n_bits: usize) -> u64 {
        self.edabits(true, n_bits) + self.edabits(false, n_bits)
    }

    /// Adds all counters of `delta`.
    pub fn increase(&mut self, delta: &DataPositions) {
        for (mine, theirs) in self.files.iter_mut().zip(&delta.files) {
            for (a, b) in mine.iter_mut().zip(theirs) {
                *a += b;
            }
        }
        if self.inputs.len() < delta.inputs.len() {
            self.inputs.resize(delta.inputs.len(), [0; N_FIELDS]);
        }
        for (mine, theirs) in self.inputs.iter_mut().zip(&delta.inputs) {
            for (a, b) in mine.iter_mut().zip(theirs) {
                *a += b;
            }
        }
        for (key, n) in &delta.edabits {
            *self.edabits.entry(*key).or_default() += n;
        }
    }

    /// Whether nothing was counted.
    pub fn is_empty(&self) -> bool {
        self.files.iter().flatten().all(|n| *n == 0)
            && self.inputs.iter().flatten().all(|n| *n == 0)
            && self.edabits.values().all(|n| *n == 0)
    }

    /// Whether any counter exceeds the corresponding counter of `other`.
    pub fn any_more(&self, other: &DataPositions) -> bool {
        let files = self
            .files
            .iter()
            .flatten()
            .zip(other.files.iter().flatten())
            .any(|(a, b)| a > b);
        let inputs = self.inputs.iter().enumerate().any(|(player, counts)| {
            counts.iter().enumerate().any(|(field, n)| {
                *n > other.inputs.get(player).map_or(0, |i| i[field])
            })
        });
        let edabits = self
            .edabits
            .iter()
            .any(|(key, n)| *n > other.edabits.get(key).copied().unwrap_or(0));
        files || inputs || edabits
    }

    /// Logs all nonzero counters.
    pub fn log_cost(&self, what: &str) {
        for field in FieldType::ALL {
            for dtype in Dtype::ALL {
                let n = self.get(field, dtype);
                if n > 0 {
                    info!(?field, kind = dtype.name(), n, "{what}");
                }
            }
            for player in 0..self.inputs.len() {
                let n = self.inputs(field, player);
                if n > 0 {
                    info!(?field, kind = "Inputs", player, n, "{what}");
                }
            }
        }
        for ((strict, n_bits), n) in &self.edabits {
            if *n > 0 {
                info!(strict, n_bits, kind = "edaBits", n, "{what}");
            }
        }
    }
}

impl Add for &DataPositions {
    type Output = DataPositions;

    fn add(self, rhs: Self) -> DataPositions {
        let mut res = self.clone();
        res.increase(rhs);
        res
    }
}

/// Saturating difference of all counters.
impl Sub for &DataPositions {
    type Output = DataPositions;

    fn sub(self, rhs: Self) -> DataPositions {
        let mut res = self.clone();
        for (mine, theirs) in res.files.iter_mut().zip(&rhs.files) {
            for (a, b) in mine.iter_mut().zip(theirs) {
                *a = a.saturating_sub(*b);
            }
        }
        for (mine, theirs) in res.inputs.iter_mut().zip(&rhs.inputs) {
            for (a, b) in mine.iter_mut().zip(theirs) {
                *a = a.saturating_sub(*b);
            }
        }
        for (key, n) in res.edabits.iter_mut() {
            *n = n.saturating_sub(rhs.edabits.get(key).copied().unwrap_or(0));
        }
        res.edabits.retain(|_, n| *n > 0);
        res
    }
}
