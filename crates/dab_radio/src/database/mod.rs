pub mod entities;
pub mod updater;

pub use entities::*;
pub use updater::{DabDatabaseUpdater, DatabaseUpdaterStatistics, UpdateResult};
