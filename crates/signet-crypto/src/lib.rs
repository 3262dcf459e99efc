pub mod config;
pub mod contacts;
pub mod error;
pub mod identity;
pub mod prekeys;
pub mod primitives;
pub mod safety_number;
pub mod session;
pub mod storage;

pub use config::Config;
pub use contacts::{Contact, ContactBook};
pub use error::{CryptoError, SessionError, StorageError};
pub use identity::IdentityKeyPair;
pub use prekeys::{PreKeyBundle, PreKeyManager};
pub use safety_number::SafetyNumber;
pub use session::ratchet::{RatchetMessage, SessionState};
pub use session::{KeyExchangeInit, Session};
pub use storage::{KvStore, MemoryKvStore};
