pub mod directory;
pub mod record;
pub mod store;

pub use directory::{ActiveSession, SessionDirectory};
pub use record::{ClientInfo, RecordError, SessionIdentity, SessionRecord};
pub use store::{Resolution, SessionStore};
