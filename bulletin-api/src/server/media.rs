use crate::server::Settings;
use bulletin_common::model::{Id, ad::AdMarker};
use std::{ffi::OsStr, io, path::Path};
use tracing::{debug, warn};

const AD_IMAGE_DIR: &str = "ad_images";

const FALLBACK_EXTENSION: &str = "bin";
const MAX_EXTENSION_LEN: usize = 8;

/// Returns the public URL. The client's file name only contributes its extension.
pub async fn store_ad_image(
    settings: &Settings,
    ad_id: Id<AdMarker>,
    client_file_name: Option<&str>,
    contents: &[u8],
) -> io::Result<String> {
    let directory = settings.media_root.join(AD_IMAGE_DIR);
    tokio::fs::create_dir_all(&directory).await?;

    let extension = client_file_name.map_or_else(|| FALLBACK_EXTENSION.to_owned(), extension_of);
    let file_name = format!("{ad_id}_{:016x}.{extension}", rand::random::<u64>());
    let path = directory.join(&file_name);
    tokio::fs::write(&path, contents).await?;

    debug!(%ad_id, path = %path.display(), bytes = contents.len(), "Stored ad image");

    Ok(public_url(&settings.media_url, &file_name))
}

/// Deletes a file written by [`store_ad_image`]. A file that is already gone is not an error.
pub async fn remove_ad_image(settings: &Settings, url: &str) -> io::Result<()> {
    let Some(file_name) = stored_file_name(&settings.media_url, url) else {
        warn!(url, "Not removing image outside the ad image directory");
        return Ok(());
    };

    let path = settings.media_root.join(AD_IMAGE_DIR).join(file_name);
    match tokio::fs::remove_file(&path).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => {
            debug!(path = %path.display(), "Removed ad image");
            Ok(())
        }
    }
}

fn stored_file_name<'a>(media_url: &str, url: &'a str) -> Option<&'a str> {
    let prefix = public_url(media_url, "");
    url.strip_prefix(prefix.as_str()).filter(|file_name| {
        !file_name.is_empty()
            && !file_name.contains(['/', '\\'])
            && !matches!(*file_name, "." | "..")
    })
}

fn public_url(media_url: &str, file_name: &str) -> String {
    let media_url = media_url.trim_end_matches('/');
    format!("{media_url}/{AD_IMAGE_DIR}/{file_name}")
}

/// Lowercased extension if it is short and alphanumeric, `bin` otherwise.
fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(OsStr::to_str)
        .filter(|extension| {
            !extension.is_empty()
                && extension.len() <= MAX_EXTENSION_LEN
                && extension.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map_or_else(|| FALLBACK_EXTENSION.to_owned(), str::to_ascii_lowercase)
}
