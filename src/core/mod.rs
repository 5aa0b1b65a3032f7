// Core ledger data structures

mod types;
mod transaction;
mod block;
mod serialize;
mod hash;
pub mod proof;

pub use types::*;
pub use transaction::*;
pub use block::*;
pub use serialize::*;
pub use hash::*;
pub use proof::{SpendVerifier, Secp256k1Verifier, KeyPair};
