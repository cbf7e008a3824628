//! The sqlair engine: everything the thin `sqlair` façade crate needs to
//! parse, type-check, prime, cache, and execute sqlair statements. Not
//! meant to be depended on directly — see the `sqlair` crate.

pub mod bind;
pub mod cache;
pub mod driver;
pub mod error;
pub mod handle;
pub mod locator;
pub mod parser;
pub mod prime;
pub mod types;

pub use error::{Error, Result};
pub use types::{Catalogue, SqlairType};
