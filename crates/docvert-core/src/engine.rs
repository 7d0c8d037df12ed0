//! The conversion engine: consumes the format registry, converter graph,
//! mover registry and cache, and executes a full `source -> dest`
//! conversion.
//!
//! Grounded on the `Converter::convert` orchestration implicit across
//! `examples/original_source/src/Converter.h` (the `.cpp` counterpart was
//! excluded from the retrieved source per `_INDEX.md`, so step ordering
//! here follows spec §4.E directly) and on `audiovert::cli::run`'s
//! "build a `Command`, run it, check the exit status" shape in the
//! teacher repo for the subprocess-invocation pattern.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;
use tracing::{info, instrument, warn};

use crate::cache::Cache;
use crate::converter::Converters;
use crate::error::{Error, Result};
use crate::format::Formats;
use crate::graph::Graph;
use crate::mover::Movers;
use crate::shell::{self, Substitutions};
use crate::sniff;

/// Hands a LaTeX-family command off to an external collaborator.
///
/// The LaTeX/TeX toolchain itself is out of scope (part of the excluded
/// layout/typesetting subsystem); this trait is the seam a host plugs a
/// real runner into. [`NullLatexRunner`] always reports failure so every
/// other engine behavior stays testable without a TeX installation.
pub trait LatexRunner: fmt::Debug {
    /// Runs `command` in `work_dir`; on failure, pushes human-readable
    /// diagnostics onto `errors` and returns `false`.
    fn run(&self, command: &str, work_dir: &Path, errors: &mut Vec<String>) -> bool;
}

/// The default [`LatexRunner`]: every invocation fails immediately.
#[derive(Debug, Default)]
pub struct NullLatexRunner;

impl LatexRunner for NullLatexRunner {
    fn run(&self, _command: &str, _work_dir: &Path, errors: &mut Vec<String>) -> bool {
        errors.push("no LaTeX runner configured for this engine".to_owned());
        false
    }
}

/// Knobs that are either genuinely open questions in the source (see
/// spec §9) or host-supplied policy the core itself has no opinion on.
pub struct EngineOptions {
    /// Whether `.aux` files produced by one LaTeX-family step persist for
    /// later steps in the same `convert` call, or must be freshly copied
    /// in at each step. Open Question resolution (spec §9): defaults to
    /// `true`, "persist across steps".
    pub aux_persists: bool,
    /// Command template (`$$i`/`$$o` only) used to decompress a zipped
    /// source before handing it to a step whose converter has not set
    /// `noUnzip`. `None` means the engine passes the compressed file
    /// through unchanged — decompression tooling is external, the same
    /// way the default converter script is.
    pub unzip_command: Option<String>,
    /// Built-in fallback used when no graph path exists and the caller
    /// set `try_default`; parameterized only by `(from, to, source,
    /// dest)`, matching spec §4.E. `None` means `try_default` can never
    /// succeed and falls through to `NoPath`.
    pub default_converter: Option<Box<dyn Fn(&str, &str, &Path, &Path) -> bool>>,
    /// Absolute path to the system support/share directory, substituted
    /// as `$$s`.
    pub support_dir: PathBuf,
}

impl fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOptions")
            .field("aux_persists", &self.aux_persists)
            .field("unzip_command", &self.unzip_command)
            .field("default_converter", &self.default_converter.is_some())
            .field("support_dir", &self.support_dir)
            .finish()
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            aux_persists: true,
            unzip_command: None,
            default_converter: None,
            support_dir: PathBuf::new(),
        }
    }
}

/// Caller-supplied flags for one `convert` call.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConvertFlags {
    /// Attempt the built-in default converter script if no graph path
    /// exists.
    pub try_default: bool,
    /// Consult and update the cache.
    pub try_cache: bool,
}

/// Ties together the format registry, converter graph, mover registry,
/// and cache to execute a `source -> dest` conversion.
pub struct Engine {
    formats: Formats,
    converters: Converters,
    movers: Movers,
    graph: Graph,
    cache: Option<Cache>,
    temp_dir: TempDir,
    options: EngineOptions,
    latex_runner: Box<dyn LatexRunner>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("formats", &self.formats)
            .field("converters", &self.converters)
            .field("graph", &self.graph)
            .field("options", &self.options)
            .finish()
    }
}

impl Engine {
    /// Builds the graph from `formats`/`converters` and creates the
    /// process-scoped temp directory the engine uses for intermediate
    /// files; the directory is removed when the `Engine` is dropped.
    pub fn new(
        formats: Formats,
        converters: Converters,
        movers: Movers,
        cache: Option<Cache>,
        options: EngineOptions,
        latex_runner: Box<dyn LatexRunner>,
    ) -> Result<Self> {
        let mut graph = Graph::new();
        crate::converter::build_graph(&formats, &converters, &mut graph);
        let temp_dir = tempfile::tempdir()?;

        Ok(Self {
            formats,
            converters,
            movers,
            graph,
            cache,
            temp_dir,
            options,
            latex_runner,
        })
    }

    /// Rebuilds the graph after a format/converter registry mutation.
    /// Invalidates any `ArrowId` a caller may be holding.
    #[instrument(skip(self))]
    pub fn rebuild_graph(&mut self) {
        crate::converter::build_graph(&self.formats, &self.converters, &mut self.graph);
    }

    pub fn formats(&self) -> &Formats {
        &self.formats
    }

    pub fn formats_mut(&mut self) -> &mut Formats {
        &mut self.formats
    }

    pub fn converters_mut(&mut self) -> &mut Converters {
        &mut self.converters
    }

    pub fn movers_mut(&mut self) -> &mut Movers {
        &mut self.movers
    }

    pub fn cache(&self) -> Option<&Cache> {
        self.cache.as_ref()
    }

    /// Given a source file and a target format, plans and executes the
    /// conversion: cache lookup, identical-endpoint fast path, graph
    /// path, stepwise execution, emplacement, and cache store.
    #[instrument(skip(self), fields(from, to, source = %shell::path(source), dest = %shell::path(dest)))]
    pub fn convert(
        &mut self,
        source: &Path,
        dest: &Path,
        origin: &Path,
        from: &str,
        to: &str,
        flags: ConvertFlags,
    ) -> Result<()> {
        if self.formats.get(from).is_none() {
            return Err(Error::UnknownFormat(from.to_owned()));
        }
        if self.formats.get(to).is_none() {
            return Err(Error::UnknownFormat(to.to_owned()));
        }

        // The engine never chdirs (spec §4.E); every path handed to a
        // command template must stand on its own regardless of the
        // process's current directory, so a caller-supplied relative path
        // is resolved against it here, once, up front.
        let source_buf = absolutize(source);
        let dest_buf = absolutize(dest);
        let origin_buf = absolutize(origin);
        let source = source_buf.as_path();
        let dest = dest_buf.as_path();
        let origin = origin_buf.as_path();

        // Step 1: cache lookup. Directories skip the mtime-based fast
        // path per spec §4.E's edge-case policy; `Cache::in_cache` will
        // simply fail its mtime probe and fall through to "not cached".
        if flags.try_cache && !origin.is_dir() {
            if let Some(cache) = self.cache.as_mut() {
                if cache.in_cache(origin, to) {
                    if cache.copy(origin, to, dest, &self.movers).is_ok() {
                        info!("conversion satisfied from cache");
                        return Ok(());
                    }
                }
            }
        }

        // Step 2: identical endpoints.
        if from == to {
            if !same_path(source, dest) {
                let mover = self.movers.get(from);
                let latex_name = shell::only_filename(dest);
                if !mover.copy(source, dest, &latex_name, &self.options.support_dir) {
                    return Err(Error::MoverFailed {
                        src: source.to_owned(),
                        dst: dest.to_owned(),
                    });
                }
            }
            return Ok(());
        }

        // Step 3: path computation.
        let from_id = self.formats.id_of(from).expect("checked above");
        let to_id = self.formats.id_of(to).expect("checked above");
        let path = self.graph.shortest_path(from_id, to_id);

        if path.is_empty() {
            if flags.try_default {
                if let Some(default_converter) = self.options.default_converter.as_ref() {
                    if default_converter(from, to, source, dest) {
                        if flags.try_cache {
                            self.store_in_cache(origin, to, dest);
                        }
                        return Ok(());
                    }
                }
            }
            return Err(Error::NoPath {
                from: from.to_owned(),
                to: to.to_owned(),
            });
        }

        // Step 4: walk the path.
        let final_outfile = self.walk_path(&path, source, origin, dest)?;

        // Step 5: emplacement. A composite target (`pstex` implies also
        // `eps`, `pdftex` implies also `pdf`) may have left its sibling
        // sitting next to `final_outfile` in the step's temp directory;
        // carry it across to beside `dest` too, so cache storage (which
        // looks for the sibling next to the emplaced file, symmetric with
        // `Cache::copy`) can find it.
        let mover = self.movers.get(to);
        let latex_name = shell::only_filename(dest);
        if !mover.copy(&final_outfile, dest, &latex_name, &self.options.support_dir) {
            return Err(Error::MoverFailed {
                src: final_outfile,
                dst: dest.to_owned(),
            });
        }

        if let Some(sibling) = crate::cache::composite_sibling(to) {
            let sibling_source = final_outfile.with_extension(sibling);
            if sibling_source.exists() {
                let sibling_dest = dest.with_extension(sibling);
                let sibling_mover = self.movers.get(sibling);
                let sibling_latex_name = shell::only_filename(&sibling_dest);
                sibling_mover.copy(
                    &sibling_source,
                    &sibling_dest,
                    &sibling_latex_name,
                    &self.options.support_dir,
                );
            }
        }

        // Step 6: cache store.
        if flags.try_cache {
            self.store_in_cache(origin, to, dest);
        }

        Ok(())
    }

    fn store_in_cache(&mut self, origin: &Path, to: &str, dest: &Path) {
        if let Some(cache) = self.cache.as_mut() {
            if let Err(error) = cache.add(origin, to, dest, &self.movers) {
                warn!(%error, "failed to store conversion result in cache");
            }
        }
    }

    fn walk_path(
        &mut self,
        path: &[crate::graph::ArrowId],
        source: &Path,
        origin: &Path,
        dest: &Path,
    ) -> Result<PathBuf> {
        let dest_basename = dest
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "out".to_owned());

        let mut infile = source.to_owned();
        let mut persisted_aux: Vec<PathBuf> = Vec::new();

        for (step_index, &edge) in path.iter().enumerate() {
            let (from_id, to_id) = self
                .graph
                .arrow_endpoints(edge)
                .expect("edge id came from shortest_path on this graph");

            let from_name = self
                .formats
                .get_by_id(from_id)
                .map(|f| f.name().to_owned())
                .unwrap_or_default();
            let to_format = self
                .formats
                .get_by_id(to_id)
                .cloned()
                .ok_or_else(|| Error::UnknownFormat(format!("format id {to_id}")))?;
            let to_name = to_format.name().to_owned();

            let converter = self
                .converters
                .get(&from_name, &to_name)
                .cloned()
                .ok_or_else(|| Error::NoPath {
                    from: from_name.clone(),
                    to: to_name.clone(),
                })?;

            let step_dir = self.temp_dir.path().join(format!("step-{step_index}"));
            fs::create_dir_all(&step_dir)?;

            if converter.derived().needs_aux && self.options.aux_persists {
                for aux in &persisted_aux {
                    if let Some(name) = aux.file_name() {
                        let _ = fs::copy(aux, step_dir.join(name));
                    }
                }
            }

            let effective_infile = self.maybe_unzip(&infile, &step_dir, converter.derived().no_unzip)?;

            let ext = to_format.primary_extension().unwrap_or("out");
            let mut outfile = step_dir.join(format!("{dest_basename}.{ext}"));

            let subs = Substitutions {
                input: Some(effective_infile.to_string_lossy()),
                output: Some(outfile.to_string_lossy()),
                basename: effective_infile
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned().into()),
                input_dir: effective_infile
                    .parent()
                    .map(|p| p.to_string_lossy().into_owned().into()),
                origin: Some(origin.to_string_lossy()),
                support_dir: Some(self.options.support_dir.to_string_lossy()),
                ..Default::default()
            };

            let command = shell::substitute(converter.command_template(), &subs);

            if converter.derived().is_latex {
                let mut errors = Vec::new();
                let ok = self.latex_runner.run(&command, &step_dir, &mut errors);

                if let Some(parselog) = converter.derived().parselog_cmd.as_ref() {
                    let parselog_cmd = shell::substitute(parselog, &subs);
                    if let Some(translated_log) = run_capturing(&parselog_cmd) {
                        errors.push(translated_log);
                    }
                }

                if !ok {
                    return Err(Error::ConverterFailed {
                        from: from_name,
                        to: to_name,
                        exit_code: -1,
                        log: errors,
                    });
                }

                persisted_aux = collect_aux_files(&step_dir);
            } else if !command.trim().is_empty() {
                let status = run_command(&command);
                match status {
                    Some(code) if code == 0 => {}
                    Some(code) => {
                        return Err(Error::ConverterFailed {
                            from: from_name,
                            to: to_name,
                            exit_code: code,
                            log: Vec::new(),
                        });
                    }
                    None => {
                        return Err(Error::ConverterFailed {
                            from: from_name,
                            to: to_name,
                            exit_code: -1,
                            log: Vec::new(),
                        });
                    }
                }
            }
            // Empty command template: "no command", the file is simply
            // carried forward to where the next step expects it.

            if let Some(result_dir_pattern) = converter.derived().result_dir.as_ref() {
                let result_dir_subs = Substitutions {
                    basename: effective_infile
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned().into()),
                    ..Default::default()
                };
                let result_dir_name = shell::substitute(result_dir_pattern, &result_dir_subs);
                let result_dir = step_dir.join(result_dir_name);

                if let Some(result_file_pattern) = converter.derived().result_file.as_ref() {
                    outfile = result_dir.join(result_file_pattern);
                } else {
                    outfile = result_dir;
                }
            } else if command.trim().is_empty() {
                // No command and no result_dir: the "output" is just the
                // input carried forward unchanged.
                outfile = effective_infile.clone();
            }

            infile = outfile;
        }

        Ok(infile)
    }

    /// If `infile` sniffs as zipped (gzip/zip/compress) and the step's
    /// converter hasn't set `noUnzip`, runs `unzip_command` to produce a
    /// decompressed copy in `step_dir`; otherwise passes `infile` through
    /// unchanged.
    fn maybe_unzip(&self, infile: &Path, step_dir: &Path, no_unzip: bool) -> Result<PathBuf> {
        if no_unzip {
            return Ok(infile.to_owned());
        }

        let is_zipped = fs::File::open(infile)
            .ok()
            .and_then(sniff::sniff)
            .map(|format| matches!(format, "gzip" | "zip" | "compress"))
            .unwrap_or(false);

        if !is_zipped {
            return Ok(infile.to_owned());
        }

        let Some(template) = self.options.unzip_command.as_ref() else {
            return Ok(infile.to_owned());
        };

        let unzipped = step_dir.join(
            infile
                .file_stem()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("unzipped")),
        );

        let subs = Substitutions {
            input: Some(infile.to_string_lossy()),
            output: Some(unzipped.to_string_lossy()),
            ..Default::default()
        };

        let command = shell::substitute(template, &subs);
        run_command(&command);

        Ok(unzipped)
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn collect_aux_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "aux"))
        .collect()
}

// The engine never chdirs into a step's temp directory (spec §4.E): every
// path a command template needs is substituted in directly (see
// `absolutize` and the `$$i`/`$$o`/`$$p`/`$$r` substitutions above),
// matching `audiovert::cli::run`, which likewise never sets a child's
// working directory.
#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

fn run_command(command: &str) -> Option<i32> {
    shell_command(command)
        .status()
        .ok()
        .and_then(|status| status.code().or(Some(if status.success() { 0 } else { -1 })))
}

/// Runs `command` and returns its combined stdout/stderr, used for
/// `parselog_cmd`'s translated log output. `None` if the process could not
/// be spawned or produced no output.
fn run_capturing(command: &str) -> Option<String> {
    let output = shell_command(command).output().ok()?;

    let mut log = String::new();
    log.push_str(&String::from_utf8_lossy(&output.stdout));
    log.push_str(&String::from_utf8_lossy(&output.stderr));

    if log.is_empty() { None } else { Some(log) }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_owned()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::CaseSensitivity;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn build_engine(
        formats: Formats,
        converters: Converters,
    ) -> Engine {
        let options = EngineOptions {
            support_dir: PathBuf::from("/usr/share/docvert"),
            ..Default::default()
        };
        Engine::new(
            formats,
            converters,
            Movers::new(),
            None,
            options,
            Box::new(NullLatexRunner),
        )
        .unwrap()
    }

    #[test]
    fn direct_path_conversion_runs_single_step() {
        let mut formats = Formats::new(CaseSensitivity::Sensitive);
        formats.add("eps", "eps", "EPS", "", "", "", "", HashSet::new());
        formats.add("pdf", "pdf", "PDF", "", "", "", "", HashSet::new());

        let mut converters = Converters::new();
        converters.add("eps", "pdf", "echo hi > $$o", "");

        let mut engine = build_engine(formats, converters);

        let work = tempdir().unwrap();
        let source = work.path().join("a.eps");
        fs::write(&source, b"eps-bytes").unwrap();
        let dest = work.path().join("a.pdf");

        engine
            .convert(&source, &dest, &source, "eps", "pdf", ConvertFlags::default())
            .unwrap();

        assert!(dest.exists());
    }

    #[test]
    fn two_hop_path_preserves_content() {
        let mut formats = Formats::new(CaseSensitivity::Sensitive);
        formats.add("a", "a", "A", "", "", "", "", HashSet::new());
        formats.add("b", "b", "B", "", "", "", "", HashSet::new());
        formats.add("c", "c", "C", "", "", "", "", HashSet::new());

        let mut converters = Converters::new();
        converters.add("a", "b", "cp $$i $$o", "");
        converters.add("b", "c", "cp $$i $$o", "");

        let mut engine = build_engine(formats, converters);

        let work = tempdir().unwrap();
        let source = work.path().join("a.txt");
        fs::write(&source, b"payload").unwrap();
        let dest = work.path().join("out.c");

        engine
            .convert(&source, &dest, &source, "a", "c", ConvertFlags::default())
            .unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"payload");
    }

    #[test]
    fn unreachable_without_default_returns_no_path() {
        let mut formats = Formats::new(CaseSensitivity::Sensitive);
        formats.add("a", "a", "A", "", "", "", "", HashSet::new());
        formats.add("b", "b", "B", "", "", "", "", HashSet::new());

        let mut engine = build_engine(formats, Converters::new());

        let work = tempdir().unwrap();
        let source = work.path().join("a.txt");
        fs::write(&source, b"x").unwrap();
        let dest = work.path().join("b.txt");

        let result = engine.convert(&source, &dest, &source, "a", "b", ConvertFlags::default());
        assert!(matches!(result, Err(Error::NoPath { .. })));
    }

    #[test]
    fn identical_endpoints_with_equal_paths_is_noop() {
        let mut formats = Formats::new(CaseSensitivity::Sensitive);
        formats.add("a", "a", "A", "", "", "", "", HashSet::new());

        let mut engine = build_engine(formats, Converters::new());

        let work = tempdir().unwrap();
        let source = work.path().join("a.txt");
        fs::write(&source, b"x").unwrap();

        engine
            .convert(&source, &source, &source, "a", "a", ConvertFlags::default())
            .unwrap();
    }

    #[test]
    fn identical_endpoints_with_different_paths_copies() {
        let mut formats = Formats::new(CaseSensitivity::Sensitive);
        formats.add("a", "a", "A", "", "", "", "", HashSet::new());

        let mut engine = build_engine(formats, Converters::new());

        let work = tempdir().unwrap();
        let source = work.path().join("a.txt");
        fs::write(&source, b"x").unwrap();
        let dest = work.path().join("b.txt");

        engine
            .convert(&source, &dest, &source, "a", "a", ConvertFlags::default())
            .unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"x");
    }

    #[test]
    fn unknown_format_is_rejected_before_touching_graph() {
        let formats = Formats::new(CaseSensitivity::Sensitive);
        let mut engine = build_engine(formats, Converters::new());

        let work = tempdir().unwrap();
        let source = work.path().join("a.txt");
        fs::write(&source, b"x").unwrap();
        let dest = work.path().join("b.txt");

        let result = engine.convert(&source, &dest, &source, "ghost", "b", ConvertFlags::default());
        assert!(matches!(result, Err(Error::UnknownFormat(_))));
    }
}
