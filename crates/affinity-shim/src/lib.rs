pub mod local;
pub mod remote;
pub mod shim;
pub mod status;

pub use local::LocalStore;
pub use remote::{HttpRemoteStore, RemoteStore};
pub use shim::{PersistenceShim, Source, Stored, TurnOutcome};
pub use status::RemoteStatus;
