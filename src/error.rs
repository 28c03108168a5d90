//! Errors raised while generating, checking or consuming preprocessed data.

use std::fmt;

use crate::channel;

/// Names the offline check that rejected a batch of correlated randomness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineCheck {
    /// An opened triple `(a, b, c)` did not satisfy `c = a * b`.
    TripleCutAndChoose,
    /// A triple bucket produced a nonzero check value.
    TripleSacrifice,
    /// An opened square `(a, s)` did not satisfy `s = a * a`.
    SquareCutAndChoose,
    /// A square bucket produced a nonzero check value.
    SquareSacrifice,
    /// An opened daBit was not a bit or differed between domains.
    DabitCutAndChoose,
    /// A daBit bucket XOR differed between domains.
    DabitSacrifice,
    /// An opened edaBit was not consistent with its bit decomposition.
    EdabitCutAndChoose,
    /// An edaBit bucket sum differed between domains.
    EdabitSacrifice,
    /// A masked high bit opened to a value other than 0 or 1 during sanitizing.
    EdabitSanitize,
    /// The square root of an opened square did not exist.
    BitFromSquare,
    /// The MAC check of values opened during a sacrifice failed.
    SacrificeMac,
}

impl fmt::Display for OfflineCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OfflineCheck::TripleCutAndChoose => "triple cut-and-choose",
            OfflineCheck::TripleSacrifice => "triple sacrifice",
            OfflineCheck::SquareCutAndChoose => "square cut-and-choose",
            OfflineCheck::SquareSacrifice => "square sacrifice",
            OfflineCheck::DabitCutAndChoose => "daBit cut-and-choose",
            OfflineCheck::DabitSacrifice => "daBit sacrifice",
            OfflineCheck::EdabitCutAndChoose => "edaBit cut-and-choose",
            OfflineCheck::EdabitSacrifice => "edaBit sacrifice",
            OfflineCheck::EdabitSanitize => "edaBit sanitize",
            OfflineCheck::BitFromSquare => "bit from square",
            OfflineCheck::SacrificeMac => "MAC check of sacrificed values",
        };
        f.write_str(name)
    }
}

/// The error type of all preprocessing and opening operations.
///
/// Every variant is fatal for the party-thread that raised it. The variants are kept distinct so
/// that a detected attack ([`Error::MacCheckFailed`], [`Error::OfflineCheckFailed`]) can be told
/// apart from a misconfigured run ([`Error::SetupMismatch`], [`Error::MissingData`]).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A message could not be sent or received.
    #[error("channel error: {0}")]
    Channel(#[from] channel::Error),
    /// The parties disagree on the parameters of the run.
    #[error("setup mismatch: {0}")]
    SetupMismatch(String),
    /// The online MAC check of opened values failed, some party cheated.
    #[error("MAC check failed, aborting")]
    MacCheckFailed,
    /// An offline sacrifice or cut-and-choose check failed, some party cheated.
    #[error("offline check failed ({0}), aborting")]
    OfflineCheckFailed(OfflineCheck),
    /// The opening of a commitment of the given party did not match.
    #[error("commitment of party {0} could not be opened")]
    CommitmentMismatch(usize),
    /// A broadcast value was not received identically by all parties.
    #[error("inconsistent broadcast in phase {0}")]
    InconsistentBroadcast(String),
    /// Persisted preprocessing data is exhausted or truncated.
    #[error("missing preprocessing data: {0}")]
    MissingData(String),
    /// The API was used in an invalid order or with invalid arguments.
    #[error("local misuse: {0}")]
    Misuse(String),
    /// Malformed wire or file data.
    #[error("decoding error: {0}")]
    Decode(String),
    /// An I/O error while accessing persisted preprocessing data.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Reports a failed MAC check of sacrificed values as a failed offline check.
    pub(crate) fn offline(self) -> Self {
        match self {
            Error::MacCheckFailed => Error::OfflineCheckFailed(OfflineCheck::SacrificeMac),
            e => e,
        }
    }
}
