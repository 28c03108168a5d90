//! Correlated randomness for honest-majority multi-party computation with SPDZ-wise MACs.
//!
//! Values are Shamir-shared among `n >= 3` parties with threshold `t = (n - 1) / 2`. Every share
//! carries a share of `alpha * value` for a secret global MAC key `alpha`, so that any value that
//! is opened can later be verified in a single batched MAC check.
//!
//! ## Main Components
//!
//! * [`session::Session`]: the per-party-thread context holding the network handle, the
//!   configuration and the multiplication and opening state of both domains.
//! * [`mac_check::MacCheck`]: opening of shares (tree-structured or direct) with deferred,
//!   batched MAC verification.
//! * [`prep::BufferPrep`]: per-kind buffers of triples, squares, inverses, bits, daBits, edaBits
//!   and input tuples, refilled from a [`prep::Strategy`].
//! * [`prep::Sacrificed`]: turns semi-honestly generated tuples into tuples that are correct even
//!   against malicious parties, using cut-and-choose and bucket sacrifice.
//! * [`prep::files`]: persisted tuples and a trusted [`prep::Dealer`] for benchmarks and tests.
//!
//! ## Example
//!
//! ```
//! use polyprep::{
//!     Config, Error,
//!     field::Fp251,
//!     player::simulate,
//!     prep::Preprocessing,
//!     session::Session,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread()
//! #     .enable_all()
//! #     .build()
//! #     .unwrap()
//! #     .block_on(async {
//! let config = Config {
//!     batch_size: 16,
//!     ..Config::default()
//! };
//! let results = simulate(3, async |player| {
//!     let mut session = Session::<_, Fp251>::setup(player, config.clone()).await?;
//!     let mut prep = Preprocessing::from_session(&session);
//!     let triple = prep.get_triple(&mut session).await?;
//!     let opened = session.open(&[triple.a, triple.b, triple.c]).await?;
//!     session.check().await?;
//!     Ok(opened)
//! })
//! .await?;
//! for opened in results {
//!     assert_eq!(opened[0] * opened[1], opened[2]);
//! }
//! # Ok::<(), Error>(())
//! # }).unwrap();
//! ```
//!
//! ## Errors
//!
//! Every failure is fatal for the party-thread that raises it. [`Error`] keeps detected cheating
//! ([`Error::MacCheckFailed`], [`Error::OfflineCheckFailed`]) apart from misconfiguration
//! ([`Error::SetupMismatch`]) and exhausted preprocessing files ([`Error::MissingData`]).
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod bit_adder;
pub mod channel;
pub mod config;
pub mod error;
pub mod field;
pub mod mac_check;
pub mod player;
pub mod positions;
pub mod prep;
pub mod protocol;
pub mod session;
pub mod share;
pub mod thread_queues;
pub mod tree_sum;

mod cointoss;

pub use config::{Config, OpeningMode, SecurityModel};
pub use error::{Error, OfflineCheck};
