use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::MultiGzDecoder;
use tempfile::Builder;
use tracing::info;

use crate::error::OtuError;
use crate::layout::{list_dirs, list_files};

/// Decompresses every `<visit>/*.gz` under `body_dir` next to the archive.
/// Returns the decompressed paths.
pub fn unpack_gz(body_dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, OtuError> {
    let mut unpacked = Vec::new();
    for visit_dir in list_dirs(body_dir)? {
        for file in list_files(&visit_dir)? {
            let Some(target) = file.as_str().strip_suffix(".gz").map(Utf8PathBuf::from) else {
                continue;
            };
            gunzip(&file, &target)?;
            info!(archive = file.as_str(), "unpacked");
            unpacked.push(target);
        }
    }
    Ok(unpacked)
}

/// Removes `.gz` and `.tar` files from the visit folders of `body_dir`.
pub fn clean(body_dir: &Utf8Path) -> Result<usize, OtuError> {
    let mut removed = 0;
    for visit_dir in list_dirs(body_dir)? {
        for file in list_files(&visit_dir)? {
            if matches!(file.extension(), Some("gz" | "tar")) {
                fs::remove_file(file.as_std_path())
                    .map_err(|err| OtuError::Filesystem(format!("remove {file}: {err}")))?;
                removed += 1;
            }
        }
    }
    info!(body_dir = body_dir.as_str(), removed, "removed archives");
    Ok(removed)
}

fn gunzip(source: &Utf8Path, target: &Utf8Path) -> Result<(), OtuError> {
    let input = fs::File::open(source.as_std_path())
        .map_err(|err| OtuError::Filesystem(format!("open {source}: {err}")))?;
    let parent = target
        .parent()
        .ok_or_else(|| OtuError::Filesystem(format!("invalid destination path {target}")))?;
    let mut temp = Builder::new()
        .prefix(".otu-matrix-gunzip")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| OtuError::Filesystem(err.to_string()))?;
    io::copy(&mut MultiGzDecoder::new(input), &mut temp)
        .map_err(|err| OtuError::Filesystem(format!("decompress {source}: {err}")))?;
    temp.persist(target.as_std_path())
        .map_err(|err| OtuError::Filesystem(format!("persist {target}: {}", err.error)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    #[test]
    fn unpack_then_clean() {
        let temp = tempfile::tempdir().unwrap();
        let body = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let visit = body.join("visit1");
        fs::create_dir_all(visit.as_std_path()).unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"@read1\nACGT\n").unwrap();
        fs::write(visit.join("reads.fastq.gz").as_std_path(), encoder.finish().unwrap()).unwrap();
        fs::write(visit.join("bundle.tar").as_std_path(), b"tar").unwrap();

        let unpacked = unpack_gz(&body).unwrap();
        assert_eq!(unpacked, vec![visit.join("reads.fastq")]);
        assert_eq!(fs::read(visit.join("reads.fastq").as_std_path()).unwrap(), b"@read1\nACGT\n");

        assert_eq!(clean(&body).unwrap(), 2);
        assert_eq!(list_files(&visit).unwrap(), vec![visit.join("reads.fastq")]);
    }
}
