mod processor;
mod prospect;

pub use processor::{run_backup, BackupOptions};
pub use prospect::{get_files, ignore_live_errors, PathProcessor, WalkErrorFilter};
