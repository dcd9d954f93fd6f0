mod devnet;
mod sync;

pub use devnet::{DevnetChain, DevnetPeer};
pub use sync::{DevnetSyncStatus, LoggingRegularSync};
