//! Command-template substitution and output formatting helpers.
//!
//! Adapted from the token-substitution convention every converter and
//! mover command template uses: a handful of `$$x` placeholders that get
//! replaced with paths and names before the string is handed to the
//! platform shell.

use core::fmt;

use std::borrow::Cow;
use std::ffi::OsStr;
use std::path::Path;

/// Display a path, replacing non-UTF-8 bytes with escapes instead of
/// failing. Used for log output, never for the substituted command itself.
pub(crate) fn path(path: &Path) -> impl fmt::Display + '_ {
    #[repr(transparent)]
    struct Format(OsStr);

    impl Format {
        fn new(s: &OsStr) -> &Self {
            // SAFETY: repr(transparent)
            unsafe { &*(s as *const OsStr as *const Format) }
        }
    }

    impl fmt::Display for Format {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            for chunk in self.0.as_encoded_bytes().utf8_chunks() {
                f.write_str(chunk.valid())?;

                for &b in chunk.invalid() {
                    write!(f, "\\u{{{:04x}}}", b)?;
                }
            }

            Ok(())
        }
    }

    Format::new(path.as_os_str())
}

/// A single `$$token` substitution in a converter or mover command
/// template.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Token {
    /// `$$i` — absolute path to the input file for this step.
    Input,
    /// `$$o` — absolute path to the output file for this step.
    Output,
    /// `$$b` — input filename without extension.
    Basename,
    /// `$$p` — input directory.
    InputDir,
    /// `$$r` — path to the original document, pre-temp-dir.
    Origin,
    /// `$$e` — input file's encoding.
    Encoding,
    /// `$$s` — path to the system support/share directory.
    SupportDir,
    /// `$$l` — the "LaTeX name" used by downstream LaTeX tools.
    LatexName,
}

impl Token {
    const fn marker(self) -> &'static str {
        match self {
            Token::Input => "$$i",
            Token::Output => "$$o",
            Token::Basename => "$$b",
            Token::InputDir => "$$p",
            Token::Origin => "$$r",
            Token::Encoding => "$$e",
            Token::SupportDir => "$$s",
            Token::LatexName => "$$l",
        }
    }

    const ALL: [Token; 8] = [
        Token::Input,
        Token::Output,
        Token::Basename,
        Token::InputDir,
        Token::Origin,
        Token::Encoding,
        Token::SupportDir,
        Token::LatexName,
    ];
}

/// The substitutions available for one converter or mover step.
///
/// Missing fields substitute to the empty string; the engine never
/// fabricates a value for a token it has nothing to offer (per spec).
#[derive(Clone, Debug, Default)]
pub(crate) struct Substitutions<'a> {
    pub(crate) input: Option<Cow<'a, str>>,
    pub(crate) output: Option<Cow<'a, str>>,
    pub(crate) basename: Option<Cow<'a, str>>,
    pub(crate) input_dir: Option<Cow<'a, str>>,
    pub(crate) origin: Option<Cow<'a, str>>,
    pub(crate) encoding: Option<Cow<'a, str>>,
    pub(crate) support_dir: Option<Cow<'a, str>>,
    pub(crate) latex_name: Option<Cow<'a, str>>,
}

impl<'a> Substitutions<'a> {
    fn get(&self, token: Token) -> &str {
        let value = match token {
            Token::Input => &self.input,
            Token::Output => &self.output,
            Token::Basename => &self.basename,
            Token::InputDir => &self.input_dir,
            Token::Origin => &self.origin,
            Token::Encoding => &self.encoding,
            Token::SupportDir => &self.support_dir,
            Token::LatexName => &self.latex_name,
        };

        value.as_deref().unwrap_or_default()
    }
}

/// Substitute every `$$x` token in `template` using `subs`.
///
/// Tokens with no configured substitution are replaced with the empty
/// string, never left in place and never fabricated.
pub(crate) fn substitute(template: &str, subs: &Substitutions<'_>) -> String {
    let mut out = template.to_owned();

    for token in Token::ALL {
        if out.contains(token.marker()) {
            out = out.replace(token.marker(), subs.get(token));
        }
    }

    out
}

/// The `$$l` ("LaTeX name") a mover's `copy`/`rename` should be handed
/// when moving a file into its final export location: the destination's
/// own filename, with no directory component.
///
/// Grounded on `support::onlyFilename(dest.absFilename())`, which is what
/// `ConverterCache.cpp::add()`/`copy()` and `Exporter.cpp::copyFile()` pass
/// as the `latex` argument at every temp-dir-to-export-location copy — it
/// is always the basename of the copy's destination, never the source.
pub(crate) fn only_filename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Shell-quote a single path for inclusion in a command line.
///
/// Wraps in double quotes and escapes embedded `"` and `\`, which is
/// sufficient for both POSIX `sh` and `cmd.exe` in the common case of a
/// plain filesystem path.
pub(crate) fn quote(path: &Path) -> String {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_tokens() {
        let subs = Substitutions {
            input: Some("in.tex".into()),
            output: Some("out.pdf".into()),
            ..Default::default()
        };

        let result = substitute("pdflatex $$i -o $$o", &subs);
        assert_eq!(result, "pdflatex in.tex -o out.pdf");
    }

    #[test]
    fn missing_token_substitutes_empty_not_fabricated() {
        let subs = Substitutions::default();
        let result = substitute("cmd $$b.end", &subs);
        assert_eq!(result, "cmd .end");
    }

    #[test]
    fn quote_escapes_embedded_quotes_and_backslashes() {
        let quoted = quote(Path::new("a\"b\\c"));
        assert_eq!(quoted, "\"a\\\"b\\\\c\"");
    }
}
