//! The format registry: named file formats, their extensions, and the
//! viewer/editor commands associated with them.

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

use crate::sniff;

/// A boolean-valued attribute of a [`Format`].
///
/// Grounded on `Format::Flags` in `examples/original_source/src/Format.h`;
/// collected into a `HashSet` rather than a bitmask, the same shape
/// `audiovert::config::Config` uses for its own flag-like sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FormatFlag {
    /// This format is one of the editor's native document formats.
    Document,
    /// This format is vector graphics (as opposed to raster).
    Vector,
    /// Offer this format in an "export" menu.
    InExportMenu,
    /// Files of this format are zip archives whose interior is itself a
    /// format the editor understands natively.
    ZippedNative,
}

/// A stable index into [`Formats`]' backing storage.
///
/// Indices are assigned at insertion time and never reused for a live
/// entry; [`Graph`](crate::graph::Graph) vertices correspond one-to-one
/// with `FormatId` values after a [`build_graph`](crate::converter::build_graph) call.
pub type FormatId = usize;

/// Whether extension lookups should ignore ASCII case.
///
/// The original probes this from `os::path_prefix_is_case_insensitive()`;
/// since OS probing is out of scope here, the host supplies the answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CaseSensitivity {
    #[default]
    Sensitive,
    Insensitive,
}

/// A named class of files: extensions, a pretty name, optional
/// viewer/editor commands, and the flag set from §4.B of the registry.
#[derive(Clone, Debug)]
pub struct Format {
    name: String,
    extensions: Vec<String>,
    pretty_name: String,
    shortcut: String,
    viewer: String,
    editor: String,
    mime: String,
    flags: HashSet<FormatFlag>,
}

/// Sentinel viewer/editor command meaning "let the OS open this".
pub const AUTO_OPEN: &str = "auto";

impl Format {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// The first extension in the list; used to name engine output files.
    pub fn primary_extension(&self) -> Option<&str> {
        self.extensions.first().map(String::as_str)
    }

    pub fn pretty_name(&self) -> &str {
        &self.pretty_name
    }

    pub fn shortcut(&self) -> &str {
        &self.shortcut
    }

    pub fn viewer(&self) -> &str {
        &self.viewer
    }

    pub fn editor(&self) -> &str {
        &self.editor
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn flags(&self) -> &HashSet<FormatFlag> {
        &self.flags
    }

    pub fn has_flag(&self, flag: FormatFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// A format is a child format iff its name ends in an ASCII digit; the
    /// parent name is the name with that digit removed.
    pub fn parent_name(&self) -> Option<&str> {
        if self.name.ends_with(|c: char| c.is_ascii_digit()) {
            Some(&self.name[..self.name.len() - 1])
        } else {
            None
        }
    }

    pub fn is_child_format(&self) -> bool {
        self.parent_name().is_some()
    }
}

/// The format registry: `add`/`erase`/`get`/lookup-by-extension/
/// lookup-by-content, plus `set_auto_open` and the `sort`-derived
/// `iter_sorted` convenience.
///
/// Grounded on `Formats` in `examples/original_source/src/Format.{h,cpp}`.
#[derive(Debug, Default)]
pub struct Formats {
    entries: Vec<Option<Format>>,
    by_name: std::collections::HashMap<String, FormatId>,
    case_sensitivity: CaseSensitivity,
}

impl Formats {
    pub fn new(case_sensitivity: CaseSensitivity) -> Self {
        Self {
            entries: Vec::new(),
            by_name: std::collections::HashMap::new(),
            case_sensitivity,
        }
    }

    /// Inserts or overwrites a format of this name, returning its id.
    ///
    /// If a child's own viewer/editor is empty, it inherits the parent
    /// format's, the way §3 of the registry spec describes; the parent
    /// must already be registered for inheritance to apply.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        name: impl Into<String>,
        extensions_csv: &str,
        pretty: impl Into<String>,
        shortcut: impl Into<String>,
        viewer: impl Into<String>,
        editor: impl Into<String>,
        mime: impl Into<String>,
        flags: HashSet<FormatFlag>,
    ) -> FormatId {
        let name = name.into();
        let extensions = extensions_csv
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect::<Vec<_>>();

        let mut viewer = viewer.into();
        let mut editor = editor.into();

        if viewer.is_empty() || editor.is_empty() {
            if let Some(parent) = parent_name_of(&name).and_then(|p| self.get(p)) {
                if viewer.is_empty() {
                    viewer = parent.viewer.clone();
                }
                if editor.is_empty() {
                    editor = parent.editor.clone();
                }
            }
        }

        let format = Format {
            name: name.clone(),
            extensions,
            pretty_name: pretty.into(),
            shortcut: shortcut.into(),
            viewer,
            editor,
            mime: mime.into(),
            flags,
        };

        if let Some(&id) = self.by_name.get(&name) {
            self.entries[id] = Some(format);
            id
        } else {
            let id = self.entries.len();
            self.entries.push(Some(format));
            self.by_name.insert(name, id);
            id
        }
    }

    pub fn erase(&mut self, name: &str) {
        if let Some(id) = self.by_name.remove(name) {
            self.entries[id] = None;
        }
    }

    pub fn get(&self, name: &str) -> Option<&Format> {
        let id = *self.by_name.get(name)?;
        self.entries[id].as_ref()
    }

    pub fn get_by_id(&self, id: FormatId) -> Option<&Format> {
        self.entries.get(id).and_then(Option::as_ref)
    }

    pub fn id_of(&self, name: &str) -> Option<FormatId> {
        self.by_name.get(name).copied()
    }

    /// Number of vertex slots a freshly built graph needs: the highest
    /// live id plus one, so erased entries keep their positional index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FormatId, &Format)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(id, entry)| entry.as_ref().map(|f| (id, f)))
    }

    /// Formats ordered by `pretty_name`, ASCII-case-insensitively, the way
    /// `Formats::sort()`'s `operator<` does in the original.
    pub fn iter_sorted(&self) -> Vec<(FormatId, &Format)> {
        let mut all: Vec<_> = self.iter().collect();
        all.sort_by(|(_, a), (_, b)| {
            a.pretty_name
                .to_ascii_lowercase()
                .cmp(&b.pretty_name.to_ascii_lowercase())
        });
        all
    }

    fn extension_matches(&self, candidate: &str, ext: &str) -> bool {
        match self.case_sensitivity {
            CaseSensitivity::Sensitive => candidate == ext,
            CaseSensitivity::Insensitive => candidate.eq_ignore_ascii_case(ext),
        }
    }

    /// Returns the *first* format (by insertion/id order) whose extension
    /// list contains `ext`.
    pub fn get_from_extension(&self, ext: &str) -> Option<&Format> {
        self.iter()
            .find(|(_, format)| {
                format
                    .extensions
                    .iter()
                    .any(|candidate| self.extension_matches(candidate, ext))
            })
            .map(|(_, format)| format)
    }

    /// Content-sniff first, extension lookup second.
    pub fn get_from_file(&self, path: &Path) -> Option<&str> {
        if let Ok(file) = File::open(path) {
            if let Some(name) = sniff::sniff(file) {
                if self.get(name).is_some() {
                    return Some(name);
                }
            }
        }

        let ext = path.extension()?.to_str()?;
        self.get_from_extension(ext).map(Format::name)
    }

    /// For each format, replace `viewer`/`editor` with [`AUTO_OPEN`] when
    /// `can_auto_open` reports the OS can open that extension directly;
    /// clear a stored `"auto"` back to empty when it can no longer.
    pub fn set_auto_open(&mut self, can_auto_open: impl Fn(&str) -> bool) {
        for entry in self.entries.iter_mut().flatten() {
            let Some(ext) = entry.primary_extension() else {
                continue;
            };

            if can_auto_open(ext) {
                entry.viewer = AUTO_OPEN.to_owned();
                entry.editor = AUTO_OPEN.to_owned();
            } else {
                if entry.viewer == AUTO_OPEN {
                    entry.viewer.clear();
                }
                if entry.editor == AUTO_OPEN {
                    entry.editor.clear();
                }
            }
        }
    }
}

fn parent_name_of(name: &str) -> Option<&str> {
    if name.ends_with(|c: char| c.is_ascii_digit()) {
        Some(&name[..name.len() - 1])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Formats {
        Formats::new(CaseSensitivity::Sensitive)
    }

    #[test]
    fn add_then_get_round_trips() {
        let mut formats = registry();
        formats.add(
            "pdf",
            "pdf",
            "PDF",
            "",
            "xdg-open",
            "",
            "application/pdf",
            HashSet::new(),
        );

        let format = formats.get("pdf").expect("format present");
        assert_eq!(format.pretty_name(), "PDF");
        assert_eq!(format.primary_extension(), Some("pdf"));
    }

    #[test]
    fn child_format_inherits_empty_viewer_from_parent() {
        let mut formats = registry();
        formats.add(
            "eps",
            "eps",
            "EPS",
            "",
            "evince",
            "gimp",
            "",
            HashSet::new(),
        );
        formats.add("eps2", "eps", "EPS2", "", "", "", "", HashSet::new());

        let child = formats.get("eps2").unwrap();
        assert_eq!(child.viewer(), "evince");
        assert_eq!(child.editor(), "gimp");
        assert!(child.is_child_format());
        assert_eq!(child.parent_name(), Some("eps"));
    }

    #[test]
    fn get_from_extension_returns_first_match() {
        let mut formats = registry();
        formats.add("jpg", "jpg,jpeg", "JPEG", "", "", "", "", HashSet::new());
        formats.add("jpg2", "jpg", "JPEG2", "", "", "", "", HashSet::new());

        let found = formats.get_from_extension("jpg").unwrap();
        assert_eq!(found.name(), "jpg");
    }

    #[test]
    fn case_insensitive_extension_matching() {
        let mut formats = Formats::new(CaseSensitivity::Insensitive);
        formats.add("pdf", "pdf", "PDF", "", "", "", "", HashSet::new());

        assert!(formats.get_from_extension("PDF").is_some());
    }

    #[test]
    fn case_sensitive_extension_matching_rejects_mismatch() {
        let mut formats = registry();
        formats.add("pdf", "pdf", "PDF", "", "", "", "", HashSet::new());

        assert!(formats.get_from_extension("PDF").is_none());
    }

    #[test]
    fn set_auto_open_writes_and_clears_sentinel() {
        let mut formats = registry();
        formats.add("png", "png", "PNG", "", "", "", "", HashSet::new());

        formats.set_auto_open(|ext| ext == "png");
        assert_eq!(formats.get("png").unwrap().viewer(), AUTO_OPEN);

        formats.set_auto_open(|_| false);
        assert_eq!(formats.get("png").unwrap().viewer(), "");
    }

    #[test]
    fn iter_sorted_orders_by_pretty_name_case_insensitively() {
        let mut formats = registry();
        formats.add("b", "b", "banana", "", "", "", "", HashSet::new());
        formats.add("a", "a", "Apple", "", "", "", "", HashSet::new());

        let names: Vec<_> = formats
            .iter_sorted()
            .into_iter()
            .map(|(_, f)| f.name())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
