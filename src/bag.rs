//! BagIt packaging.
//!
//! A bag is a directory holding the payload under `data/` plus tag files
//! describing it. Submissions travel as a zip of the bag directory.
use crate::util::{file_name_string, sha256_file};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const BAGIT_TXT: &str = "bagit.txt";
const BAG_INFO_TXT: &str = "bag-info.txt";
const MANIFEST_TXT: &str = "manifest-sha256.txt";
const TAG_MANIFEST_TXT: &str = "tagmanifest-sha256.txt";
const PAYLOAD_DIR: &str = "data";
const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// Turns directories into bags and bags into transmissible archives.
pub trait Packager {
    fn is_bag(&self, dir: &Path) -> bool;

    /// Convert `dir` into a bag in place.
    fn make_bag(&self, dir: &Path, options: &BagOptions) -> Result<()>;

    /// Archive a bag directory, returning the archive path.
    fn archive_bag(&self, dir: &Path) -> Result<PathBuf>;

    fn is_archive(&self, path: &Path) -> bool;

    /// Unpack `archive` under `into`, returning the bag root.
    fn extract_bag(&self, archive: &Path, into: &Path) -> Result<PathBuf>;
}

/// Extra `bag-info.txt` fields supplied by the submitter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BagOptions {
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl BagOptions {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parse bag options {}", path.display()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BagItPackager;

impl Packager for BagItPackager {
    fn is_bag(&self, dir: &Path) -> bool {
        dir.join(BAGIT_TXT).is_file() && dir.join(PAYLOAD_DIR).is_dir()
    }

    fn make_bag(&self, dir: &Path, options: &BagOptions) -> Result<()> {
        move_payload(dir)?;
        let payload = dir.join(PAYLOAD_DIR);

        let mut manifest = String::new();
        let mut total_bytes = 0u64;
        let mut file_count = 0u64;
        for entry in WalkDir::new(&payload).sort_by_file_name() {
            let entry = entry.with_context(|| format!("walk {}", payload.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let (digest, size) = sha256_file(entry.path())?;
            manifest.push_str(&format!("{digest}  {}\n", bag_relative(dir, entry.path())?));
            total_bytes += size;
            file_count += 1;
        }

        write_tag(dir, BAGIT_TXT, "BagIt-Version: 0.97\nTag-File-Character-Encoding: UTF-8\n")?;
        write_tag(dir, MANIFEST_TXT, &manifest)?;

        let mut info = BTreeMap::from([
            (
                "Bagging-Date".to_string(),
                chrono::Local::now().format("%Y-%m-%d").to_string(),
            ),
            (
                "Bag-Software-Agent".to_string(),
                format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            ),
            (
                "Payload-Oxum".to_string(),
                format!("{total_bytes}.{file_count}"),
            ),
        ]);
        info.extend(options.metadata.clone());
        let info_text: String = info
            .iter()
            .map(|(key, value)| format!("{key}: {value}\n"))
            .collect();
        write_tag(dir, BAG_INFO_TXT, &info_text)?;

        let mut tag_manifest = String::new();
        for name in [BAGIT_TXT, BAG_INFO_TXT, MANIFEST_TXT] {
            let (digest, _) = sha256_file(&dir.join(name))?;
            tag_manifest.push_str(&format!("{digest}  {name}\n"));
        }
        write_tag(dir, TAG_MANIFEST_TXT, &tag_manifest)?;

        tracing::debug!(
            bag = %dir.display(),
            files = file_count,
            bytes = total_bytes,
            "bag created"
        );
        Ok(())
    }

    fn archive_bag(&self, dir: &Path) -> Result<PathBuf> {
        let name = file_name_string(dir)?;
        let parent = dir.parent().unwrap_or_else(|| Path::new("."));
        let archive_path = parent.join(format!("{name}.zip"));
        let file = File::create(&archive_path)
            .with_context(|| format!("create {}", archive_path.display()))?;
        let mut zip = ZipWriter::new(file);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("walk {}", dir.display()))?;
            let relative = bag_relative(dir, entry.path())?;
            if relative.is_empty() {
                zip.add_directory(format!("{name}/"), options)?;
                continue;
            }
            let entry_name = format!("{name}/{relative}");
            if entry.file_type().is_dir() {
                zip.add_directory(format!("{entry_name}/"), options)
                    .with_context(|| format!("add {entry_name} to archive"))?;
            } else if entry.file_type().is_file() {
                zip.start_file(entry_name.as_str(), options)
                    .with_context(|| format!("add {entry_name} to archive"))?;
                let mut source = File::open(entry.path())
                    .with_context(|| format!("open {}", entry.path().display()))?;
                io::copy(&mut source, &mut zip)
                    .with_context(|| format!("compress {}", entry.path().display()))?;
            }
        }
        let mut file = zip.finish().context("finish archive")?;
        file.flush().context("flush archive")?;
        tracing::debug!(archive = %archive_path.display(), "bag archived");
        Ok(archive_path)
    }

    fn is_archive(&self, path: &Path) -> bool {
        let mut magic = [0u8; 4];
        path.is_file()
            && File::open(path)
                .and_then(|mut file| file.read_exact(&mut magic))
                .is_ok()
            && &magic == ZIP_MAGIC
    }

    fn extract_bag(&self, archive: &Path, into: &Path) -> Result<PathBuf> {
        let file = File::open(archive).with_context(|| format!("open {}", archive.display()))?;
        let mut zip = ZipArchive::new(file)
            .with_context(|| format!("read archive {}", archive.display()))?;
        for index in 0..zip.len() {
            let mut entry = zip
                .by_index(index)
                .with_context(|| format!("read entry {index} of {}", archive.display()))?;
            let relative = entry
                .enclosed_name()
                .map(Path::to_path_buf)
                .ok_or_else(|| anyhow!("archive entry '{}' escapes the bag", entry.name()))?;
            let destination = into.join(relative);
            if entry.is_dir() {
                fs::create_dir_all(&destination)
                    .with_context(|| format!("create {}", destination.display()))?;
                continue;
            }
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            let mut output = File::create(&destination)
                .with_context(|| format!("create {}", destination.display()))?;
            io::copy(&mut entry, &mut output)
                .with_context(|| format!("extract {}", destination.display()))?;
        }
        bag_root(into)
    }
}

/// Move every top-level entry of `dir` under `data/`.
fn move_payload(dir: &Path) -> Result<()> {
    let staging = dir.join(format!(".bag-payload-{}", std::process::id()));
    fs::create_dir(&staging).with_context(|| format!("create {}", staging.display()))?;
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let path = entry.path();
        if path == staging {
            continue;
        }
        let target = staging.join(entry.file_name());
        fs::rename(&path, &target)
            .with_context(|| format!("move {} into payload", path.display()))?;
    }
    let payload = dir.join(PAYLOAD_DIR);
    fs::rename(&staging, &payload).with_context(|| format!("create {}", payload.display()))?;
    Ok(())
}

fn write_tag(dir: &Path, name: &str, contents: &str) -> Result<()> {
    let path = dir.join(name);
    fs::write(&path, contents.as_bytes()).with_context(|| format!("write {}", path.display()))
}

/// Path of `path` inside the bag, always with forward slashes.
fn bag_relative(bag: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(bag)
        .with_context(|| format!("{} is outside {}", path.display(), bag.display()))?;
    let parts: Vec<String> = relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

/// The single top-level directory of an extraction, or the extraction itself.
fn bag_root(into: &Path) -> Result<PathBuf> {
    let entries: Vec<PathBuf> = fs::read_dir(into)
        .with_context(|| format!("read {}", into.display()))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<io::Result<_>>()
        .with_context(|| format!("list {}", into.display()))?;
    match entries.as_slice() {
        [only] if only.is_dir() => Ok(only.clone()),
        _ => Ok(into.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(root: &Path) -> PathBuf {
        let dir = root.join("dataset");
        fs::create_dir_all(dir.join("tables")).expect("create dataset");
        fs::write(dir.join("datapackage.json"), "{}").expect("write descriptor");
        fs::write(dir.join("tables/file.tsv"), "id\tname\n1\ta\n").expect("write table");
        dir
    }

    #[test]
    fn make_bag_moves_payload_and_writes_tag_files() {
        let temp = tempfile::tempdir().expect("temp dir");
        let dir = dataset(temp.path());
        let packager = BagItPackager;
        assert!(!packager.is_bag(&dir));

        let options = BagOptions {
            metadata: BTreeMap::from([("Contact-Name".to_string(), "Curator".to_string())]),
        };
        packager.make_bag(&dir, &options).expect("make bag");

        assert!(packager.is_bag(&dir));
        assert!(dir.join("data/datapackage.json").is_file());
        assert!(dir.join("data/tables/file.tsv").is_file());
        assert!(!dir.join("datapackage.json").exists());

        let manifest = fs::read_to_string(dir.join(MANIFEST_TXT)).expect("manifest");
        assert_eq!(manifest.lines().count(), 2);
        assert!(manifest.contains("  data/tables/file.tsv"));

        let info = fs::read_to_string(dir.join(BAG_INFO_TXT)).expect("bag info");
        assert!(info.contains("Contact-Name: Curator"));
        assert!(info.contains("Payload-Oxum: 14.2"));
        assert!(dir.join(TAG_MANIFEST_TXT).is_file());
    }

    #[test]
    fn make_bag_keeps_an_existing_data_directory_as_payload() {
        let temp = tempfile::tempdir().expect("temp dir");
        let dir = temp.path().join("dataset");
        fs::create_dir_all(dir.join("data")).expect("create data");
        fs::write(dir.join("data/table.tsv"), "x\n").expect("write table");

        BagItPackager
            .make_bag(&dir, &BagOptions::default())
            .expect("make bag");
        assert!(dir.join("data/data/table.tsv").is_file());
    }

    #[test]
    fn archive_then_extract_yields_the_bag_directory() {
        let temp = tempfile::tempdir().expect("temp dir");
        let dir = dataset(temp.path());
        let packager = BagItPackager;
        packager
            .make_bag(&dir, &BagOptions::default())
            .expect("make bag");

        let archive = packager.archive_bag(&dir).expect("archive");
        assert_eq!(archive, temp.path().join("dataset.zip"));
        assert!(packager.is_archive(&archive));
        assert!(!packager.is_archive(&dir.join(BAGIT_TXT)));

        let out = tempfile::tempdir().expect("extract dir");
        let root = packager.extract_bag(&archive, out.path()).expect("extract");
        assert_eq!(root, out.path().join("dataset"));
        assert!(packager.is_bag(&root));
        assert_eq!(
            fs::read_to_string(root.join("data/tables/file.tsv")).expect("table"),
            "id\tname\n1\ta\n"
        );
    }

    #[test]
    fn extract_rejects_entries_escaping_the_target() {
        let temp = tempfile::tempdir().expect("temp dir");
        let archive = temp.path().join("evil.zip");
        let file = File::create(&archive).expect("create zip");
        let mut zip = ZipWriter::new(file);
        zip.start_file("../evil.txt", FileOptions::default())
            .expect("start entry");
        zip.write_all(b"nope").expect("write entry");
        zip.finish().expect("finish zip");

        let out = temp.path().join("out");
        fs::create_dir_all(&out).expect("create out");
        let err = BagItPackager
            .extract_bag(&archive, &out)
            .expect_err("escaping entry");
        assert!(err.to_string().contains("escapes the bag"));
        assert!(!temp.path().join("evil.txt").exists());
    }
}
