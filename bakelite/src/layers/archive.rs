//! Deterministic layer packing and unpacking.

use super::digest::HashingWriter;
use bakelite_shared::errors::{BakeliteError, BakeliteResult};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Fixed gzip level. Part of the determinism contract: changing it changes
/// every blob digest.
const GZIP_LEVEL: u32 = 6;

/// A packed layer blob sitting in a staging directory, ready to be installed
/// into the blob store.
#[derive(Debug)]
pub struct LayerArchive {
    pub digest: String,
    pub size: u64,
    pub path: PathBuf,
}

/// Pack a directory tree into a deterministic `.tar.gz` blob under `out_dir`.
///
/// Entry order is the sorted recursive walk; timestamps are zeroed and
/// ownership is root:root so the digest depends only on paths, modes, link
/// targets, and file contents.
pub fn pack_dir(src: &Path, out_dir: &Path) -> BakeliteResult<LayerArchive> {
    let staging = tempfile::NamedTempFile::new_in(out_dir)?;
    let writer = HashingWriter::new(staging.as_file().try_clone()?);
    let encoder = GzEncoder::new(writer, Compression::new(GZIP_LEVEL));
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry =
            entry.map_err(|e| BakeliteError::Storage(format!("walking {}: {e}", src.display())))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| BakeliteError::Internal(format!("path outside layer root: {e}")))?;
        let metadata = entry.path().symlink_metadata()?;

        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(metadata.permissions().mode() & 0o7777);

        if entry.file_type().is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, rel, std::io::empty())?;
        } else if entry.file_type().is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            builder.append_link(&mut header, rel, &target)?;
        } else {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(metadata.len());
            builder.append_data(&mut header, rel, File::open(entry.path())?)?;
        }
    }

    let encoder = builder.into_inner()?;
    let writer = encoder.finish()?;
    let (digest, size) = writer.finalize()?;

    let path = out_dir.join(format!("{digest}.tar.gz"));
    staging
        .persist(&path)
        .map_err(|e| BakeliteError::Storage(format!("persisting layer blob: {e}")))?;

    Ok(LayerArchive { digest, size, path })
}

/// Unpack a layer blob into `dest`, preserving modes. Existing files are
/// overwritten (later layers shadow earlier ones). Base layers pulled from a
/// registry may be plain tar, so the gzip wrapper is detected by magic bytes.
pub fn unpack(blob: &Path, dest: &Path) -> BakeliteResult<()> {
    use std::io::{Read, Seek, SeekFrom};

    let mut file = File::open(blob)?;
    let mut magic = [0u8; 2];
    let n = file.read(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;

    if n == 2 && magic == [0x1f, 0x8b] {
        unpack_stream(tar::Archive::new(GzDecoder::new(file)), blob, dest)
    } else {
        unpack_stream(tar::Archive::new(file), blob, dest)
    }
}

fn unpack_stream<R: std::io::Read>(
    mut archive: tar::Archive<R>,
    blob: &Path,
    dest: &Path,
) -> BakeliteResult<()> {
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    archive
        .unpack(dest)
        .map_err(|e| BakeliteError::Storage(format!("unpacking {}: {e}", blob.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_tree(root: &Path) {
        std::fs::create_dir_all(root.join("pkg/sub")).unwrap();
        std::fs::write(root.join("pkg/a.txt"), b"alpha").unwrap();
        std::fs::write(root.join("pkg/sub/b.txt"), b"beta").unwrap();
        std::fs::write(root.join("top.txt"), b"top").unwrap();
    }

    #[test]
    fn identical_trees_produce_identical_blobs() {
        let temp = TempDir::new().unwrap();
        let src_a = temp.path().join("a");
        let src_b = temp.path().join("b");
        sample_tree(&src_a);
        sample_tree(&src_b);

        let out = temp.path().join("out");
        std::fs::create_dir_all(&out).unwrap();

        let first = pack_dir(&src_a, &out).unwrap();
        let second = pack_dir(&src_b, &out).unwrap();

        assert_eq!(first.digest, second.digest);
        assert_eq!(first.size, second.size);

        // digest matches the bytes on disk
        let bytes = std::fs::read(&first.path).unwrap();
        assert_eq!(super::super::sha256_hex(&bytes), first.digest);
    }

    #[test]
    fn content_change_changes_digest() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        sample_tree(&src);
        let out = temp.path().join("out");
        std::fs::create_dir_all(&out).unwrap();

        let before = pack_dir(&src, &out).unwrap();
        std::fs::write(src.join("pkg/a.txt"), b"changed").unwrap();
        let after = pack_dir(&src, &out).unwrap();

        assert_ne!(before.digest, after.digest);
    }

    #[test]
    fn unpack_restores_tree() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        sample_tree(&src);
        let out = temp.path().join("out");
        std::fs::create_dir_all(&out).unwrap();

        let blob = pack_dir(&src, &out).unwrap();

        let dest = temp.path().join("dest");
        std::fs::create_dir_all(&dest).unwrap();
        unpack(&blob.path, &dest).unwrap();

        assert_eq!(
            std::fs::read(dest.join("pkg/sub/b.txt")).unwrap(),
            b"beta".to_vec()
        );
        assert!(dest.join("top.txt").is_file());
    }
}
