//! Converters: edges of the graph, parsed from a `\converter` flag-word
//! string into a `derived` struct the engine consumes directly.
//!
//! Grounded on `Converter`/`Converters` in
//! `examples/original_source/src/Converter.h`. The raw `Format const *`
//! `From_`/`To_` fields there are replaced with [`FormatId`] indices per
//! the re-architecture note in spec §9.

use crate::format::{FormatId, Formats};
use crate::graph::Graph;

/// Which TeX engine a `latex`-flagged converter drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LatexFlavor {
    Latex,
    Pdflatex,
    Xelatex,
    Lualatex,
    Dvilualatex,
}

impl LatexFlavor {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "latex" => Some(Self::Latex),
            "pdflatex" => Some(Self::Pdflatex),
            "xelatex" => Some(Self::Xelatex),
            "lualatex" => Some(Self::Lualatex),
            "dvilualatex" => Some(Self::Dvilualatex),
            _ => None,
        }
    }
}

/// Flag-derived properties of a converter, computed once at registration
/// time from the `\converter` flag-word string (§6).
#[derive(Clone, Debug, Default)]
pub struct Derived {
    pub is_latex: bool,
    pub latex_flavor: Option<LatexFlavor>,
    pub is_xml: bool,
    pub needs_aux: bool,
    pub wants_nice_source: bool,
    pub no_unzip: bool,
    pub result_dir: Option<String>,
    pub result_file: Option<String>,
    pub parselog_cmd: Option<String>,
}

/// Parse the `\converter` flag-word string into a [`Derived`] struct.
///
/// Recognized words, comma-separated, bare or `key=value`: `latex`
/// (optionally `latex=<flavor>`), `xml`, `needaux`, `nice`, `noUnzip`,
/// `resultdir=<pattern>`, `resultfile=<pattern>`, `parselog=<command>`.
/// Unrecognized words are ignored rather than rejected, so forward
/// compatibility with new flag words doesn't require a registry change.
pub fn parse_flags(flags: &str) -> Derived {
    let mut derived = Derived::default();

    for word in flags.split(',').map(str::trim).filter(|w| !w.is_empty()) {
        let (key, value) = match word.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (word, None),
        };

        match key {
            "latex" => {
                derived.is_latex = true;
                derived.latex_flavor = value.and_then(LatexFlavor::parse);
            }
            "xml" => derived.is_xml = true,
            "needaux" => derived.needs_aux = true,
            "nice" => derived.wants_nice_source = true,
            "noUnzip" => derived.no_unzip = true,
            "resultdir" => derived.result_dir = value.map(str::to_owned),
            "resultfile" => derived.result_file = value.map(str::to_owned),
            "parselog" => derived.parselog_cmd = value.map(str::to_owned),
            _ => {}
        }
    }

    derived
}

/// An edge in the converter graph: a shell-command template from one
/// format to another, plus the flags parsed into [`Derived`].
#[derive(Clone, Debug)]
pub struct Converter {
    from: String,
    to: String,
    command_template: String,
    flags: String,
    derived: Derived,
}

impl Converter {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        command_template: impl Into<String>,
        flags: impl Into<String>,
    ) -> Self {
        let flags = flags.into();
        let derived = parse_flags(&flags);

        Self {
            from: from.into(),
            to: to.into(),
            command_template: command_template.into(),
            flags,
            derived,
        }
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn command_template(&self) -> &str {
        &self.command_template
    }

    pub fn flags(&self) -> &str {
        &self.flags
    }

    pub fn derived(&self) -> &Derived {
        &self.derived
    }
}

/// Registry of all configured converters. A converter whose `from`/`to`
/// does not resolve against the format registry is stored but contributes
/// no graph edge, per §3's "stored but contributes no edge" rule.
#[derive(Debug, Default)]
pub struct Converters {
    entries: Vec<Converter>,
}

impl Converters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        command_template: impl Into<String>,
        flags: impl Into<String>,
    ) {
        self.entries
            .push(Converter::new(from, to, command_template, flags));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Converter> {
        self.entries.iter()
    }

    /// Looks up the converter whose `(from, to)` format names match those
    /// of the edge's endpoints. The first match wins, mirroring the
    /// original's linear scan of the converter list.
    pub fn get(&self, from: &str, to: &str) -> Option<&Converter> {
        self.entries
            .iter()
            .find(|c| c.from == from && c.to == to)
    }
}

/// Rebuilds `graph` from scratch: allocates `formats.len()` vertices,
/// then adds an edge for every converter whose endpoints both resolve in
/// the registry. Called by the orchestrator after any format/converter
/// change; callers holding old [`ArrowId`](crate::graph::ArrowId) values
/// must treat them as invalidated.
pub fn build_graph(formats: &Formats, converters: &Converters, graph: &mut Graph) {
    graph.init(formats.len());

    for converter in converters.iter() {
        let from = formats.id_of(converter.from());
        let to = formats.id_of(converter.to());

        if let (Some(from), Some(to)) = (from, to) {
            graph.add_edge(from, to);
        }
    }
}

/// Formats reachable as export targets from every format in the registry,
/// i.e. `Graph::reachable_from` seeded from each vertex. Mirrors
/// `Converters::exportableFormats` in `Converter.h`.
pub fn exportable_formats(graph: &mut Graph, src: FormatId) -> Vec<FormatId> {
    graph.reachable_from(src, true, &[], |_| true)
}

/// Formats reachable as import sources for `dst`, honoring the
/// document-format exclusion in [`Graph::reachable_to`]. Mirrors
/// `Converters::importableFormats`.
pub fn importable_formats(
    graph: &mut Graph,
    dst: FormatId,
    document_format: Option<FormatId>,
) -> Vec<FormatId> {
    graph.reachable_to(dst, true, document_format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn parse_flags_recognizes_latex_with_flavor() {
        let derived = parse_flags("latex=pdflatex,needaux");
        assert!(derived.is_latex);
        assert_eq!(derived.latex_flavor, Some(LatexFlavor::Pdflatex));
        assert!(derived.needs_aux);
    }

    #[test]
    fn parse_flags_ignores_unknown_words() {
        let derived = parse_flags("frobnicate,xml");
        assert!(derived.is_xml);
        assert!(!derived.is_latex);
    }

    #[test]
    fn parse_flags_captures_resultdir_and_resultfile() {
        let derived = parse_flags("resultdir=$$b-html,resultfile=index.html");
        assert_eq!(derived.result_dir.as_deref(), Some("$$b-html"));
        assert_eq!(derived.result_file.as_deref(), Some("index.html"));
    }

    #[test]
    fn converter_with_unknown_endpoint_contributes_no_edge() {
        let mut formats = Formats::new(crate::format::CaseSensitivity::Sensitive);
        formats.add("eps", "eps", "EPS", "", "", "", "", HashSet::new());

        let mut converters = Converters::new();
        converters.add("eps", "nonexistent", "cmd", "");

        let mut graph = Graph::new();
        build_graph(&formats, &converters, &mut graph);

        assert_eq!(graph.arrow_count(), 0);
        assert_eq!(graph.vertex_count(), 1);
    }

    #[test]
    fn build_graph_adds_edge_for_resolvable_converter() {
        let mut formats = Formats::new(crate::format::CaseSensitivity::Sensitive);
        formats.add("eps", "eps", "EPS", "", "", "", "", HashSet::new());
        formats.add("pdf", "pdf", "PDF", "", "", "", "", HashSet::new());

        let mut converters = Converters::new();
        converters.add("eps", "pdf", "epstopdf $$i $$o", "");

        let mut graph = Graph::new();
        build_graph(&formats, &converters, &mut graph);

        assert_eq!(graph.arrow_count(), 1);
        let eps = formats.id_of("eps").unwrap();
        let pdf = formats.id_of("pdf").unwrap();
        assert_eq!(graph.shortest_path(eps, pdf).len(), 1);
    }
}
