pub mod error;
pub mod firebase;
pub mod memory;
pub mod store;

pub use error::StoreError;
pub use firebase::FirebaseClient;
pub use memory::InMemoryStore;
pub use store::{AtomicOutcome, DocumentStore, Transaction, TransactionResult};
