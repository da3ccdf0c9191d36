use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use sstash_core::bucket::{Client, ExistsCache, Layout};
use sstash_core::cache::CacheStorage;
use sstash_core::digestcache::DigestCache;
use sstash_storage::{store_from_config, StoreConfig};
use sstash_types::cancel::CancelToken;
use sstash_types::error::{Result, SstashError};

use crate::cli::{Cli, Commands};
use crate::cmd;

pub(crate) fn run(cli: &Cli, cancel: &CancelToken) -> Result<()> {
    let store = store_from_config(&StoreConfig {
        url: cli.bucket.clone(),
        region: cli.region.clone(),
        access_key_id: cli.access_key_id.clone(),
        secret_access_key: cli.secret_access_key.clone(),
        lock_duration: Duration::from_secs(cli.object_lock_days * 24 * 3600),
        retry: Default::default(),
    })?;

    let cache_storage = Arc::new(CacheStorage::open(cache_dir(cli)?)?);
    let digest_cache = DigestCache::new(&cache_storage);
    let exists_cache = ExistsCache::new(Arc::clone(&cache_storage), cli.use_common_files_layout);
    let layout = Layout {
        prefix: cli.prefix.trim_matches('/').to_string(),
        use_deprecated_common_files: cli.use_common_files_layout,
    };
    let client = Client::new(store, layout, exists_cache);

    let result = match &cli.command {
        Commands::Backup { command } => cmd::backup::run(cancel, &client, &digest_cache, command),
        Commands::Restore { command } => {
            cmd::restore::run(cancel, &client, &digest_cache, command)
        }
        Commands::List { command } => cmd::list::run(cancel, &client, command),
    };

    // Flush caches even when the command failed; they are only ever
    // accelerators, but losing them costs re-hashing and re-heading.
    if let Err(e) = cache_storage.flush() {
        warn!(error = %e, "cache flush failed");
    }

    result
}

fn cache_dir(cli: &Cli) -> Result<PathBuf> {
    if let Some(dir) = &cli.cache_dir {
        return Ok(dir.clone());
    }
    dirs::cache_dir()
        .map(|base| base.join("sstash"))
        .ok_or_else(|| {
            SstashError::Config("no platform cache directory; pass --cache-dir".into())
        })
}
