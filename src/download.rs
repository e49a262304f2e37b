use std::{
    fs::{create_dir_all, File},
    io::{Error, ErrorKind, Write},
    path::PathBuf,
};

use burn::data::network::downloader;

/// Download the pre-trained weights to the local cache directory.
pub(crate) fn download(module: &'static str, url: &str) -> Result<PathBuf, Error> {
    // Model cache directory
    let model_dir = dirs::home_dir()
        .ok_or_else(|| Error::new(ErrorKind::NotFound, "no home directory"))?
        .join(".cache")
        .join(format!("{}-burn", module));

    if !model_dir.exists() {
        create_dir_all(&model_dir)?;
    }

    let file_base_name = url
        .rsplit_once('/')
        .map(|(_, name)| name)
        .ok_or_else(|| Error::new(ErrorKind::InvalidInput, format!("bad weights url {url}")))?;
    let file_name = model_dir.join(file_base_name);
    if !file_name.exists() {
        tracing::info!(url, path = %file_name.display(), "downloading pretrained weights");
        let bytes = downloader::download_file_as_bytes(url, file_base_name);

        let mut output_file = File::create(&file_name)?;
        let bytes_written = output_file.write(&bytes)?;

        if bytes_written != bytes.len() {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "Failed to write the whole model weights file.",
            ));
        }
    }

    Ok(file_name)
}
