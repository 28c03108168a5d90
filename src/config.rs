//! Run parameters shared by all parties.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::Error;

/// How opened values travel between parties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpeningMode {
    /// Shares are summed up a tree and the result is broadcast down a tree.
    #[default]
    Tree,
    /// Every party sends its share to every other party.
    Direct,
}

/// Which adversary the generated randomness must withstand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityModel {
    /// Semi-honestly generated tuples are used as they are.
    SemiHonest,
    /// Tuples are sacrificed before use.
    #[default]
    Malicious,
}

/// Parameters of a preprocessing run. All parties must use the same values for the fields that
/// are part of the setup agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of tuples produced by one refill of a buffer.
    pub batch_size: usize,
    /// Number of tuples per sacrifice bucket.
    pub bucket_size: usize,
    /// Statistical security parameter in bits.
    pub security: usize,
    /// Fan-in of the summing tree when opening, values below 2 mean all parties.
    pub opening_sum: usize,
    /// Fan-out of the broadcast tree when opening, values below 2 mean all parties.
    pub max_broadcast: usize,
    /// Tree or pairwise opening.
    pub opening: OpeningMode,
    /// Semi-honest or malicious generation.
    pub security_model: SecurityModel,
    /// Generate tuples during the run instead of reading them from `prep_dir`.
    pub live_prep: bool,
    /// Directory of persisted preprocessing data.
    pub prep_dir: PathBuf,
    /// Number of helper threads for local batch computations.
    pub threads: usize,
    /// Number of opened values after which a MAC check runs automatically.
    pub popen_max: usize,
    /// Index of this party-thread, used to locate persisted data.
    pub thread_num: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            batch_size: 1000,
            bucket_size: 4,
            security: 40,
            opening_sum: 0,
            max_broadcast: 0,
            opening: OpeningMode::Tree,
            security_model: SecurityModel::Malicious,
            live_prep: true,
            prep_dir: PathBuf::from("Player-Data"),
            threads: 0,
            popen_max: 1_000_000,
            thread_num: 0,
        }
    }
}

impl Config {
    /// Rejects parameters that cannot produce a working run.
    pub fn validate(&self) -> Result<(), Error> {
        if self.batch_size == 0 {
            return Err(Error::Misuse("batch size must be positive".to_string()));
        }
        if self.bucket_size < 2 {
            return Err(Error::Misuse(format!(
                "bucket size {} cannot detect cheating",
                self.bucket_size
            )));
        }
        if self.security == 0 {
            return Err(Error::Misuse("security parameter must be positive".to_string()));
        }
        if self.popen_max == 0 {
            return Err(Error::Misuse("popen_max must be positive".to_string()));
        }
        Ok(())
    }

    /// Whether tuples must survive a sacrifice before use.
    pub fn is_malicious(&self) -> bool {
        self.security_model == SecurityModel::Malicious
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_validation() -> Result<(), Box<dyn std::error::Error>> {
        let config = Config::default();
        config.validate()?;
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.bucket_size, 4);

        let bytes = bincode::serialize(&config)?;
        assert_eq!(bincode::deserialize::<Config>(&bytes)?, config);

        let invalid = Config {
            bucket_size: 1,
            ..Config::default()
        };
        assert!(matches!(invalid.validate(), Err(Error::Misuse(_))));
        let insecure = Config {
            security: 0,
            ..Config::default()
        };
        assert!(matches!(insecure.validate(), Err(Error::Misuse(_))));
        Ok(())
    }
}
