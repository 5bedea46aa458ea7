//! Compressed archives of rotated audit logs.
//!
//! Archive names embed the rotation time as `audit-2026-01-02T03-04-05-678Z.log.gz`
//! so lexicographic order is creation order.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeDelta, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

const PREFIX: &str = "audit-";
const SUFFIX: &str = ".log.gz";
const STAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%3fZ";

/// Archive file name for a rotation at `at`.
pub fn archive_name(at: DateTime<Utc>) -> String {
    let stamp = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("{PREFIX}{stamp}{SUFFIX}")
}

/// The rotation time embedded in an archive name.
pub fn archive_time(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Archives in `dir`, oldest first.
pub fn list_archives(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut archives: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(PREFIX) && n.ends_with(SUFFIX))
        })
        .collect();
    archives.sort();
    Ok(archives)
}

/// Gzip `source` into a new archive in `dir`; returns the archive path.
///
/// Written to a temporary name first so a failure never leaves a partial
/// archive under a real name.
pub fn compress(source: &Path, dir: &Path, at: DateTime<Utc>) -> io::Result<PathBuf> {
    // On a collision the stamp moves forward a millisecond, so every
    // archive name still parses and sorts after the one it collided with.
    let mut stamp = at;
    let mut target = dir.join(archive_name(stamp));
    while target.exists() {
        stamp += TimeDelta::milliseconds(1);
        target = dir.join(archive_name(stamp));
    }
    let tmp = target.with_extension("gz.tmp");

    let result = (|| {
        let mut input = BufReader::new(File::open(source)?);
        let mut encoder = GzEncoder::new(BufWriter::new(File::create(&tmp)?), Compression::default());
        io::copy(&mut input, &mut encoder)?;
        encoder.finish()?.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        fs::rename(&tmp, &target)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(target)
}

/// Delete the oldest archives beyond `keep`. Returns the deleted paths.
pub fn prune(dir: &Path, keep: usize) -> io::Result<Vec<PathBuf>> {
    let archives = list_archives(dir)?;
    let excess = archives.len().saturating_sub(keep);
    let mut removed = Vec::with_capacity(excess);
    for path in archives.into_iter().take(excess) {
        fs::remove_file(&path)?;
        removed.push(path);
    }
    Ok(removed)
}

/// Decompressed lines of an archive.
pub fn read_lines(path: &Path) -> io::Result<Vec<String>> {
    let reader = BufReader::new(GzDecoder::new(File::open(path)?));
    reader.lines().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + secs, 123_000_000).unwrap()
    }

    #[test]
    fn name_has_no_colons_or_dots_in_stamp() {
        let name = archive_name(at(0));
        assert!(name.starts_with("audit-"));
        assert!(name.ends_with(".log.gz"));
        let stamp = &name["audit-".len()..name.len() - ".log.gz".len()];
        assert!(!stamp.contains(':') && !stamp.contains('.'));
    }

    #[test]
    fn name_roundtrips_time() {
        let t = at(42);
        assert_eq!(archive_time(&archive_name(t)), Some(t));
        assert_eq!(archive_time("audit.log"), None);
    }

    #[test]
    fn names_sort_by_time() {
        assert!(archive_name(at(1)) < archive_name(at(2)));
        assert!(archive_name(at(59)) < archive_name(at(3600)));
    }

    #[test]
    fn compress_and_read_back() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("audit.log");
        fs::write(&source, "one\ntwo\n").unwrap();

        let archive = compress(&source, dir.path(), at(0)).unwrap();
        assert_eq!(read_lines(&archive).unwrap(), vec!["one", "two"]);
        assert_eq!(fs::read_to_string(&source).unwrap(), "one\ntwo\n");

        let second = compress(&source, dir.path(), at(0)).unwrap();
        assert_ne!(archive, second);
        assert_eq!(list_archives(dir.path()).unwrap().len(), 2);
    }

    #[test]
    fn colliding_names_stay_parseable_and_ordered() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("audit.log");
        fs::write(&source, "x\n").unwrap();

        let first = compress(&source, dir.path(), at(0)).unwrap();
        let second = compress(&source, dir.path(), at(0)).unwrap();
        let third = compress(&source, dir.path(), at(0)).unwrap();

        let time = |p: &Path| archive_time(p.file_name().unwrap().to_str().unwrap());
        assert_eq!(time(&first), Some(at(0)));
        assert_eq!(time(&second), Some(at(0) + TimeDelta::milliseconds(1)));
        assert_eq!(time(&third), Some(at(0) + TimeDelta::milliseconds(2)));
        assert_eq!(
            list_archives(dir.path()).unwrap(),
            vec![first.clone(), second.clone(), third.clone()]
        );

        let removed = prune(dir.path(), 1).unwrap();
        assert_eq!(removed, vec![first, second]);
        assert_eq!(list_archives(dir.path()).unwrap(), vec![third]);
    }

    #[test]
    fn prune_keeps_newest() {
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(archive_name(at(i))), b"").unwrap();
        }
        fs::write(dir.path().join("audit.log"), b"").unwrap();

        let removed = prune(dir.path(), 2).unwrap();
        assert_eq!(removed.len(), 3);
        let left = list_archives(dir.path()).unwrap();
        assert_eq!(left.len(), 2);
        assert!(left[1].ends_with(archive_name(at(4))));
        assert!(dir.path().join("audit.log").exists());
    }
}
