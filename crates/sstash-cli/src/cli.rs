use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "sstash",
    version,
    about = "Content-addressed SSTable backup and restore",
    after_help = "\
Bucket URL formats:
  s3://endpoint[:port]/bucket[/prefix]    S3-compatible storage over HTTPS
  s3+http://endpoint[:port]/bucket        S3 over plain HTTP (dev only)
  file:///path or /path                   Local directory (dev/testing)
  memory:                                 In-memory store (dry runs)

Environment variables:
  AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY   S3 credentials
  AWS_REGION                                  S3 region"
)]
pub(crate) struct Cli {
    /// Bucket URL
    #[arg(long, global = true, default_value = "")]
    pub bucket: String,

    /// S3 region
    #[arg(long, global = true, env = "AWS_REGION")]
    pub region: Option<String>,

    /// S3 access key id
    #[arg(long, global = true, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key_id: Option<String>,

    /// S3 secret access key
    #[arg(long, global = true, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,

    /// Key prefix inside the bucket
    #[arg(long, global = true, default_value = "")]
    pub prefix: String,

    /// Days the bucket's default retention lock holds new objects
    #[arg(long, global = true, default_value_t = 0)]
    pub object_lock_days: u64,

    /// Read blobs from the deprecated common-files layout
    #[arg(long, global = true)]
    pub use_common_files_layout: bool,

    /// Directory for the local digest and existence caches
    /// (default: platform cache dir + sstash)
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Back up this node's SSTables
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },

    /// Restore SSTables from the bucket
    Restore {
        #[command(subcommand)]
        command: RestoreCommand,
    },

    /// List what the bucket knows about
    List {
        #[command(subcommand)]
        command: ListCommand,
    },
}

#[derive(Args, Clone)]
pub(crate) struct NodeArgs {
    /// Cluster name
    #[arg(long, required = true)]
    pub cluster: String,

    /// Hostname whose stream to write
    #[arg(long, required = true)]
    pub hostname: String,
}

#[derive(Subcommand)]
pub(crate) enum BackupCommand {
    /// Upload the flushed incremental backups
    Incremental {
        #[command(flatten)]
        node: NodeArgs,

        /// Database data directory
        #[arg(long, default_value = "/var/lib/cassandra/data")]
        data_dir: PathBuf,

        /// Delete the source files under backups/ after the manifest is
        /// written
        #[arg(long)]
        delete_backups: bool,
    },

    /// Upload a named snapshot
    Snapshot {
        #[command(flatten)]
        node: NodeArgs,

        /// Database data directory
        #[arg(long, default_value = "/var/lib/cassandra/data")]
        data_dir: PathBuf,

        /// Snapshot name (as created by the database)
        #[arg(long, required = true)]
        name: String,
    },
}

#[derive(Args, Clone)]
pub(crate) struct SelectionArgs {
    /// Cluster name to select a backup from
    #[arg(long, required = true)]
    pub cluster: String,

    /// Use a specific hostname when selecting a backup
    #[arg(long)]
    pub hostname: Option<String>,

    /// Use a hostname prefix pattern when selecting a backup
    #[arg(long)]
    pub hostname_pattern: Option<String>,

    /// Ignore manifests before this time (unix seconds)
    #[arg(long, default_value_t = 0)]
    pub not_before: i64,

    /// Ignore manifests after this time (unix seconds)
    #[arg(long, default_value_t = 0)]
    pub not_after: i64,
}

#[derive(Args, Clone)]
pub(crate) struct WorkerArgs {
    /// Staging directory for verified blobs
    #[arg(long, default_value = "/var/lib/cassandra/backuprestore/staging")]
    pub staging_dir: PathBuf,

    /// Quarantine directory for invalid target files
    #[arg(long, default_value = "/var/lib/cassandra/backuprestore/graveyard")]
    pub graveyard_dir: PathBuf,

    /// Concurrent blob downloads
    #[arg(long, default_value_t = 4)]
    pub concurrent_download: usize,

    /// Concurrent digest verifications
    #[arg(long, default_value_t = 1)]
    pub concurrent_verify: usize,

    /// Chown created files and directories to the database user
    #[arg(long)]
    pub ensure_ownership: bool,

    /// Database system user owning restored files
    #[arg(long, default_value = "cassandra")]
    pub owner_user: String,
}

#[derive(Subcommand)]
pub(crate) enum RestoreCommand {
    /// Restore this host from backup
    Host {
        #[command(flatten)]
        selection: SelectionArgs,

        #[command(flatten)]
        worker: WorkerArgs,

        /// Restore into this data directory
        #[arg(long, default_value = "/var/lib/cassandra/data")]
        target: PathBuf,

        /// Allow restoration of files that changed between manifests
        #[arg(long)]
        allow_changed: bool,

        /// Don't actually download files
        #[arg(long)]
        dry_run: bool,

        /// Leave mismatched target files alone instead of moving them to
        /// the graveyard
        #[arg(long)]
        keep_invalid: bool,
    },

    /// Download from multiple hosts' backups
    Cluster {
        /// Cluster whose hosts to download
        #[arg(long, required = true)]
        cluster: String,

        /// Download for hosts matching this prefix
        #[arg(long, required = true)]
        hostname_pattern: String,

        /// A subdirectory is created under this for each host
        #[arg(long, required = true)]
        target: PathBuf,

        /// Download files for these tables (keyspace.table)
        #[arg(long = "table", required = true)]
        tables: Vec<String>,

        /// Skip downloading indexes
        #[arg(long, default_value_t = true)]
        skip_indexes: bool,

        /// Ignore manifests before this time (unix seconds)
        #[arg(long, default_value_t = 0)]
        not_before: i64,

        /// Ignore manifests after this time (unix seconds)
        #[arg(long, default_value_t = 0)]
        not_after: i64,

        /// Don't actually download files
        #[arg(long)]
        dry_run: bool,

        /// Concurrent blob downloads
        #[arg(long, default_value_t = 4)]
        concurrent_download: usize,

        /// Concurrent digest verifications
        #[arg(long, default_value_t = 1)]
        concurrent_verify: usize,
    },

    /// Merge backed-up generations with what is already on disk
    Special {
        #[command(flatten)]
        selection: SelectionArgs,

        #[command(flatten)]
        worker: WorkerArgs,

        /// Backups will be restored to this location
        #[arg(long, default_value = "/var/lib/cassandra/data")]
        target: PathBuf,

        /// Live data directory inventoried for existing generations
        #[arg(long, default_value = "/var/lib/cassandra/data")]
        data_dir: PathBuf,

        /// Download files to staging
        #[arg(long)]
        download_to_staging: bool,

        /// Link downloaded files from staging to the target
        #[arg(long)]
        link_to_target: bool,

        /// Merge SSTables from all matching nodes
        #[arg(long)]
        all_nodes: bool,

        /// Restore only these keyspaces
        #[arg(long = "keyspace")]
        keyspaces: Vec<String>,

        /// Don't restore from incremental backups
        #[arg(long)]
        ignore_incremental: bool,

        /// Don't restore from snapshot backups
        #[arg(long)]
        ignore_snapshots: bool,

        /// Don't fail on incomplete backups in the selected range
        #[arg(long)]
        ignore_incomplete: bool,

        /// Allow restoration of files that changed between manifests
        #[arg(long)]
        allow_changed: bool,
    },
}

#[derive(Subcommand)]
pub(crate) enum ListCommand {
    /// Clusters with manifests in the bucket
    Clusters,

    /// Hosts with manifests under a cluster
    Hosts {
        #[arg(long, required = true)]
        cluster: String,
    },

    /// A node's manifests, optionally bounded by time
    Manifests {
        #[command(flatten)]
        selection: SelectionArgs,
    },
}
