use once_cell::sync::Lazy;
use prometheus::{register_int_counter_with_registry, IntCounter, Registry};

/// Counters for bucket traffic and the existence cache.
#[derive(Debug)]
pub struct BucketMetrics {
    pub uploaded_files: IntCounter,
    pub uploaded_bytes: IntCounter,
    pub skipped_files: IntCounter,
    pub skipped_bytes: IntCounter,
    pub upload_errors: IntCounter,
    pub exists_cache_lock_time_misses: IntCounter,
}

impl BucketMetrics {
    pub fn new(registry: &Registry) -> Self {
        BucketMetrics {
            uploaded_files: register_int_counter_with_registry!(
                "sstash_bucket_upload_files_total",
                "Number of files uploaded to the bucket.",
                registry,
            )
            .expect("this is a valid metrics registration"),
            uploaded_bytes: register_int_counter_with_registry!(
                "sstash_bucket_upload_bytes_total",
                "Total bytes uploaded to the bucket.",
                registry,
            )
            .expect("this is a valid metrics registration"),
            skipped_files: register_int_counter_with_registry!(
                "sstash_bucket_skipped_files_total",
                "Number of files not uploaded because they already exist in the bucket.",
                registry,
            )
            .expect("this is a valid metrics registration"),
            skipped_bytes: register_int_counter_with_registry!(
                "sstash_bucket_skipped_bytes_total",
                "Total bytes not uploaded because they already exist in the bucket.",
                registry,
            )
            .expect("this is a valid metrics registration"),
            upload_errors: register_int_counter_with_registry!(
                "sstash_bucket_upload_errors_total",
                "Number of failed file uploads.",
                registry,
            )
            .expect("this is a valid metrics registration"),
            exists_cache_lock_time_misses: register_int_counter_with_registry!(
                "sstash_bucket_exists_cache_lock_time_misses_total",
                "Existence cache misses due to an expired or near-expired lock time.",
                registry,
            )
            .expect("this is a valid metrics registration"),
        }
    }
}

/// Process-wide counter set, registered against the default registry so an
/// external scraper sees it without extra wiring.
pub fn bucket_metrics() -> &'static BucketMetrics {
    static METRICS: Lazy<BucketMetrics> =
        Lazy::new(|| BucketMetrics::new(prometheus::default_registry()));
    &METRICS
}
