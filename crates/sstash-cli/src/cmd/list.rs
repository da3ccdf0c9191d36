use sstash_core::bucket::Client;
use sstash_core::restore::resolve_identity;
use sstash_types::cancel::CancelToken;
use sstash_types::error::Result;
use sstash_types::unixtime::Seconds;

use crate::cli::ListCommand;

pub(crate) fn run(cancel: &CancelToken, client: &Client, command: &ListCommand) -> Result<()> {
    match command {
        ListCommand::Clusters => {
            for cluster in client.list_clusters(cancel)? {
                println!("{cluster}");
            }
            Ok(())
        }
        ListCommand::Hosts { cluster } => {
            for node in client.list_host_names(cancel, cluster)? {
                println!("{}", node.hostname);
            }
            Ok(())
        }
        ListCommand::Manifests { selection } => {
            let identity = resolve_identity(
                cancel,
                client,
                &selection.cluster,
                selection.hostname.as_deref(),
                selection.hostname_pattern.as_deref(),
            )?;
            let keys = client.list_manifests(
                cancel,
                &identity,
                Seconds(selection.not_before),
                Seconds(selection.not_after),
            )?;
            for key in keys {
                println!("{key}");
            }
            Ok(())
        }
    }
}
