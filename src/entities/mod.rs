// Entity Models - the registry the tally engine reads and writes
//
// Each entity has:
// - Stable local identity (SQLite rowid)
// - Values that are fixed at creation (ballots are append-only)
// - A serde shape used by the routing layer

pub mod ballot;
pub mod candidate;
pub mod party;

pub use ballot::{Ballot, Topic};
pub use candidate::{Candidate, NewCandidate};
pub use party::Party;
