// Directory transfer between this host and a devkit

mod rsync;

pub use rsync::{CancelHandle, Direction, SyncEngine, SyncOptions};
