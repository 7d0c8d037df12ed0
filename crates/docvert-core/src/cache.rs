//! On-disk, content-addressed cache of prior conversion outputs, keyed by
//! `(origin path, target format)`.
//!
//! Grounded on `CachedItem`/`FormatCache`/`Cache` in
//! `examples/original_source/src/ConverterCache.cpp`. The original uses
//! `boost::crc_32_type`; this crate uses [`crc32fast`], a real crate for
//! the same CRC-32/0xEDB88320 polynomial not otherwise present in the
//! teacher's dependency stack (see DESIGN.md).

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{instrument, warn};

use crate::error::{Error, Result};
use crate::mover::Movers;
use crate::shell;
use crate::sniff;

/// Formats whose primary target implies a second, sibling output that
/// must also be tracked in the cache. Hardcoded per spec §9 (the original
/// carries a FIXME saying this should be config-driven; the behavior is
/// preserved here rather than the FIXME).
const COMPOSITE_SIBLINGS: &[(&str, &str)] = &[("pstex", "eps"), ("pdftex", "pdf")];

pub(crate) fn composite_sibling(target: &str) -> Option<&'static str> {
    COMPOSITE_SIBLINGS
        .iter()
        .find(|(primary, _)| *primary == target)
        .map(|(_, sibling)| *sibling)
}

/// A single cached conversion result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedItem {
    pub cache_name: PathBuf,
    pub timestamp: u64,
    pub checksum: u32,
}

/// All cached targets produced from a single origin path.
#[derive(Clone, Debug, Default)]
struct FormatCache {
    from_format: String,
    per_target: HashMap<String, CachedItem>,
}

/// The conversion cache: an in-memory index backed by a plain-text file
/// at `{dir}/index`, plus the cached artifacts themselves.
#[derive(Debug)]
pub struct Cache {
    dir: PathBuf,
    entries: HashMap<PathBuf, FormatCache>,
    enabled: bool,
    max_age: Duration,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn mtime_secs(path: &Path) -> Option<u64> {
    let metadata = fs::metadata(path).ok()?;
    let modified = metadata.modified().ok()?;
    modified.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

fn crc32_of_file(path: &Path) -> std::io::Result<u32> {
    let mut file = File::open(path)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hasher.finalize())
}

/// Quote a path for the index file: wrap in `"`, escape `\` and `"`.
fn quote_path(path: &Path) -> String {
    let display = path.to_string_lossy();
    let mut out = String::with_capacity(display.len() + 2);
    out.push('"');
    for c in display.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Parse one quoted-path-prefixed index line into `(origin, rest)`.
fn unquote_path(line: &str) -> Option<(PathBuf, &str)> {
    let rest = line.strip_prefix('"')?;
    let mut origin = String::new();
    let mut chars = rest.char_indices();

    while let Some((idx, c)) = chars.next() {
        match c {
            '\\' => {
                let (_, next) = chars.next()?;
                origin.push(next);
            }
            '"' => {
                let remainder = rest[idx + 1..].trim_start();
                return Some((PathBuf::from(origin), remainder));
            }
            other => origin.push(other),
        }
    }

    None
}

impl Cache {
    /// `init`: if `enabled`, ensures `{user_support}/cache` exists (mode
    /// `0700`), then loads the index.
    #[instrument(skip(enabled))]
    pub fn init(user_support_dir: &Path, enabled: bool, max_age: Duration) -> Result<Self> {
        let dir = user_support_dir.join("cache");

        if enabled {
            fs::create_dir_all(&dir)?;
            set_dir_mode_0700(&dir)?;
        }

        let mut cache = Self {
            dir,
            entries: HashMap::new(),
            enabled,
            max_age,
        };

        if enabled {
            cache.load_index();
        }

        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index")
    }

    /// Reads the index file line by line, validating each entry: drop
    /// (and delete the cached file) if the origin is gone, drop silently
    /// if the cached file is gone, drop and delete if the cached file is
    /// older than `now - max_age`, otherwise insert (sniffing
    /// `from_format` the first time an origin is seen this load).
    #[instrument(skip(self))]
    pub fn load_index(&mut self) {
        self.entries.clear();

        let file = match File::open(self.index_path()) {
            Ok(file) => file,
            Err(_) => return,
        };

        let reader = BufReader::new(file);
        let now = now_secs();

        for (line_no, line) in reader.lines().enumerate() {
            let Ok(line) = line else { continue };
            if line.trim().is_empty() {
                continue;
            }

            match self.parse_index_line(&line, now) {
                Ok(()) => {}
                Err(_) => warn!(line = line_no + 1, "skipping malformed cache index line"),
            }
        }
    }

    fn parse_index_line(&mut self, line: &str, now: u64) -> std::result::Result<(), ()> {
        let (origin, rest) = unquote_path(line).ok_or(())?;
        let mut fields = rest.split_whitespace();

        let target = fields.next().ok_or(())?.to_owned();
        let timestamp: u64 = fields.next().ok_or(())?.parse().map_err(|_| ())?;
        let checksum: u32 = fields.next().ok_or(())?.parse().map_err(|_| ())?;

        if !origin.exists() {
            let cache_name = self.dir.join(cache_file_name(&origin, &target));
            let _ = fs::remove_file(&cache_name);
            return Ok(());
        }

        let cache_name = self.dir.join(cache_file_name(&origin, &target));
        if !cache_name.exists() {
            return Ok(());
        }

        if let Some(mtime) = mtime_secs(&cache_name) {
            if mtime + self.max_age.as_secs() < now {
                let _ = fs::remove_file(&cache_name);
                return Ok(());
            }
        }

        let from_format = self
            .entries
            .get(&origin)
            .map(|fc| fc.from_format.clone())
            .or_else(|| File::open(&origin).ok().and_then(sniff::sniff).map(str::to_owned))
            .unwrap_or_default();

        let entry = self.entries.entry(origin).or_insert_with(|| FormatCache {
            from_format,
            per_target: HashMap::new(),
        });

        entry.per_target.insert(
            target,
            CachedItem {
                cache_name,
                timestamp,
                checksum,
            },
        );

        Ok(())
    }

    /// Writes the index atomically: create-empty, chmod `0600`, then
    /// write every entry, so the index never transiently leaks
    /// world-readable.
    #[instrument(skip(self))]
    pub fn save_index(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let path = self.index_path();

        {
            let _ = File::create(&path)?;
        }
        set_file_mode_0600(&path)?;

        let mut file = OpenOptions::new().write(true).truncate(true).open(&path)?;

        for (origin, format_cache) in &self.entries {
            for (target, item) in &format_cache.per_target {
                writeln!(
                    file,
                    "{} {} {} {}",
                    quote_path(origin),
                    target,
                    item.timestamp,
                    item.checksum
                )?;
            }
        }

        Ok(())
    }

    pub fn find(&self, origin: &Path, target: &str) -> Option<&CachedItem> {
        self.entries.get(origin)?.per_target.get(target)
    }

    /// `find` then validate: timestamp match ⇒ true; else checksum match
    /// ⇒ update the stored timestamp and return true; else false.
    #[instrument(skip(self))]
    pub fn in_cache(&mut self, origin: &Path, target: &str) -> bool {
        let Some(item) = self.entries.get(origin).and_then(|fc| fc.per_target.get(target)) else {
            return false;
        };

        let Some(current_mtime) = mtime_secs(origin) else {
            return false;
        };

        if current_mtime == item.timestamp {
            return true;
        }

        let Ok(current_checksum) = crc32_of_file(origin) else {
            return false;
        };

        if current_checksum == item.checksum {
            if let Some(fc) = self.entries.get_mut(origin) {
                if let Some(item) = fc.per_target.get_mut(target) {
                    item.timestamp = current_mtime;
                }
            }
            return true;
        }

        false
    }

    /// Stores `produced_file` as the cached artifact for `(origin,
    /// target)`, using `movers` to copy it into the cache directory under
    /// `{crc32(origin):010}-{target}`. No-ops when the existing entry's
    /// timestamp or checksum already matches. Recurses once for the
    /// composite-format sibling (`pstex`→also `eps`, `pdftex`→also `pdf`).
    #[instrument(skip(self, movers))]
    pub fn add(
        &mut self,
        origin: &Path,
        target: &str,
        produced_file: &Path,
        movers: &Movers,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let current_mtime = mtime_secs(origin).unwrap_or(0);

        if let Some(item) = self.entries.get(origin).and_then(|fc| fc.per_target.get(target)) {
            if item.timestamp == current_mtime {
                return self.add_sibling(origin, target, produced_file, movers);
            }

            if let Ok(current_checksum) = crc32_of_file(origin) {
                if current_checksum == item.checksum {
                    let timestamp = current_mtime;
                    if let Some(fc) = self.entries.get_mut(origin) {
                        if let Some(item) = fc.per_target.get_mut(target) {
                            item.timestamp = timestamp;
                        }
                    }
                    return self.add_sibling(origin, target, produced_file, movers);
                }
            }
        }

        let checksum = crc32_of_file(origin).unwrap_or(0);
        let cache_name = self.dir.join(cache_file_name(origin, target));

        let mover = movers.get(target);
        let latex_name = shell::only_filename(&cache_name);
        if !mover.copy(produced_file, &cache_name, &latex_name, &self.dir) {
            return Err(Error::MoverFailed {
                src: produced_file.to_owned(),
                dst: cache_name,
            });
        }

        let from_format = File::open(origin)
            .ok()
            .and_then(sniff::sniff)
            .map(str::to_owned)
            .unwrap_or_default();

        let entry = self
            .entries
            .entry(origin.to_owned())
            .or_insert_with(|| FormatCache {
                from_format,
                per_target: HashMap::new(),
            });

        entry.per_target.insert(
            target.to_owned(),
            CachedItem {
                cache_name,
                timestamp: current_mtime,
                checksum,
            },
        );

        self.add_sibling(origin, target, produced_file, movers)
    }

    fn add_sibling(
        &mut self,
        origin: &Path,
        target: &str,
        produced_file: &Path,
        movers: &Movers,
    ) -> Result<()> {
        let Some(sibling) = composite_sibling(target) else {
            return Ok(());
        };

        let sibling_file = produced_file.with_extension(sibling);
        if !sibling_file.exists() {
            return Ok(());
        }

        self.add(origin, sibling, &sibling_file, movers)
    }

    /// Copies the cached file for `(origin, target)` to `dest` via
    /// `movers`; recursively copies the composite sibling, if any and if
    /// present in the cache.
    #[instrument(skip(self, movers))]
    pub fn copy(&self, origin: &Path, target: &str, dest: &Path, movers: &Movers) -> Result<()> {
        let item = self.find(origin, target).ok_or_else(|| Error::CacheMiss {
            origin: origin.to_owned(),
            target: target.to_owned(),
        })?;

        let mover = movers.get(target);
        let latex_name = shell::only_filename(dest);
        if !mover.copy(&item.cache_name, dest, &latex_name, &self.dir) {
            return Err(Error::MoverFailed {
                src: item.cache_name.clone(),
                dst: dest.to_owned(),
            });
        }

        if let Some(sibling) = composite_sibling(target) {
            if let Some(sibling_item) = self.find(origin, sibling) {
                let sibling_dest = dest.with_extension(sibling);
                let sibling_mover = movers.get(sibling);
                let sibling_latex_name = shell::only_filename(&sibling_dest);
                sibling_mover.copy(
                    &sibling_item.cache_name,
                    &sibling_dest,
                    &sibling_latex_name,
                    &self.dir,
                );
            }
        }

        Ok(())
    }

    pub fn remove(&mut self, origin: &Path, target: &str) {
        if let Some(fc) = self.entries.get_mut(origin) {
            if let Some(item) = fc.per_target.remove(target) {
                let _ = fs::remove_file(&item.cache_name);
            }
            if fc.per_target.is_empty() {
                self.entries.remove(origin);
            }
        }
    }

    /// Bulk eviction of every entry whose `from_format`/target match
    /// `(from_format, to_format)`; rewrites the index immediately
    /// afterwards.
    #[instrument(skip(self))]
    pub fn remove_all(&mut self, from_format: &str, to_format: &str) -> Result<()> {
        let origins: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|(_, fc)| fc.from_format == from_format)
            .map(|(origin, _)| origin.clone())
            .collect();

        for origin in origins {
            self.remove(&origin, to_format);
        }

        self.save_index()
    }
}

fn cache_file_name(origin: &Path, target: &str) -> String {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(origin.to_string_lossy().as_bytes());
    let crc = hasher.finalize();
    format!("{crc:010}-{target}")
}

#[cfg(unix)]
fn set_dir_mode_0700(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_mode_0700(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_file_mode_0600(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_file_mode_0600(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_cache(support_dir: &Path) -> Cache {
        Cache::init(support_dir, true, Duration::from_secs(3600)).unwrap()
    }

    #[test]
    fn add_then_in_cache_hits_on_unchanged_timestamp() {
        let support = tempdir().unwrap();
        let work = tempdir().unwrap();
        let mut cache = new_cache(support.path());
        let movers = Movers::new();

        let origin = work.path().join("x.eps");
        fs::write(&origin, b"hello").unwrap();
        let produced = work.path().join("x.png");
        fs::write(&produced, b"produced").unwrap();

        cache.add(&origin, "png", &produced, &movers).unwrap();
        assert!(cache.in_cache(&origin, "png"));
    }

    #[test]
    fn in_cache_revalidates_via_checksum_after_touch() {
        let support = tempdir().unwrap();
        let work = tempdir().unwrap();
        let mut cache = new_cache(support.path());
        let movers = Movers::new();

        let origin = work.path().join("x.eps");
        fs::write(&origin, b"hello").unwrap();
        let produced = work.path().join("x.png");
        fs::write(&produced, b"produced").unwrap();

        cache.add(&origin, "png", &produced, &movers).unwrap();

        // Simulate a touch: same content, different stored timestamp.
        if let Some(fc) = cache.entries.get_mut(&origin) {
            if let Some(item) = fc.per_target.get_mut("png") {
                item.timestamp += 1000;
            }
        }

        assert!(cache.in_cache(&origin, "png"));
    }

    #[test]
    fn add_pstex_creates_eps_sibling_entry() {
        let support = tempdir().unwrap();
        let work = tempdir().unwrap();
        let mut cache = new_cache(support.path());
        let movers = Movers::new();

        let origin = work.path().join("doc.lyx");
        fs::write(&origin, b"source").unwrap();
        let produced = work.path().join("out.pstex");
        fs::write(&produced, b"pstex-data").unwrap();
        let sibling = work.path().join("out.eps");
        fs::write(&sibling, b"eps-data").unwrap();

        cache.add(&origin, "pstex", &produced, &movers).unwrap();

        assert!(cache.find(&origin, "pstex").is_some());
        assert!(cache.find(&origin, "eps").is_some());
    }

    #[test]
    fn save_then_load_round_trips_fresh_entries() {
        let support = tempdir().unwrap();
        let work = tempdir().unwrap();
        let mut cache = new_cache(support.path());
        let movers = Movers::new();

        let origin = work.path().join("x.eps");
        fs::write(&origin, b"hello").unwrap();
        let produced = work.path().join("x.png");
        fs::write(&produced, b"produced").unwrap();

        cache.add(&origin, "png", &produced, &movers).unwrap();
        cache.save_index().unwrap();

        let mut reloaded = new_cache(support.path());
        reloaded.load_index();
        assert!(reloaded.find(&origin, "png").is_some());
    }

    #[test]
    fn load_index_evicts_entries_older_than_max_age() {
        let support = tempdir().unwrap();
        let work = tempdir().unwrap();
        let mut cache = Cache::init(support.path(), true, Duration::from_secs(60)).unwrap();
        let movers = Movers::new();

        let origin = work.path().join("x.eps");
        fs::write(&origin, b"hello").unwrap();
        let produced = work.path().join("x.png");
        fs::write(&produced, b"produced").unwrap();

        cache.add(&origin, "png", &produced, &movers).unwrap();
        cache.save_index().unwrap();

        let cached_file = cache.find(&origin, "png").unwrap().cache_name.clone();
        let ancient = SystemTime::now() - Duration::from_secs(3600);
        filetime_set(&cached_file, ancient);

        cache.load_index();
        assert!(cache.find(&origin, "png").is_none());
        assert!(!cached_file.exists());
    }

    fn filetime_set(path: &Path, time: SystemTime) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    #[test]
    fn malformed_index_line_is_skipped_not_fatal() {
        let support = tempdir().unwrap();
        fs::create_dir_all(support.path().join("cache")).unwrap();
        fs::write(support.path().join("cache/index"), "not a valid line\n").unwrap();

        let mut cache = new_cache(support.path());
        cache.load_index();
        assert!(cache.entries.is_empty());
    }
}
