pub(crate) mod db_restore;
pub(crate) mod logic;
pub(crate) mod verification;

use crate::config::AppConfig;
use crate::errors::Result;
use crate::storage::ObjectStore;
pub use logic::{recover_database, recover_db_and_media, RestoreTarget};

/// Public entry point for media recovery. Without `zipped`, every synced
/// `media/` key is downloaded; otherwise one media zip is extracted.
/// Returns a line describing what was restored.
pub async fn run_media_recovery(
    app_config: &AppConfig,
    store: &dyn ObjectStore,
    zipped: bool,
    target: &RestoreTarget,
) -> Result<String> {
    let media_root = app_config.media_root()?;
    if zipped {
        logic::recover_zipped_media(store, media_root, target).await
    } else {
        let restored = crate::backup::media::download_media_folder(store, media_root).await?;
        Ok(format!("{} media file(s)", restored))
    }
}
