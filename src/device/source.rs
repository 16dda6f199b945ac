use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{TracerError, TracerResult};

/// Files prepended to every phase program, in order.
pub const PRELUDE: [&str; 3] = ["structs.wgsl", "random.wgsl", "geometry.wgsl"];

/// One named piece of program text
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceUnit {
    pub name: String,
    pub text: String,
}

impl SourceUnit {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    pub fn load(path: &Path) -> TracerResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| TracerError::ProgramSource {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, text })
    }
}

/// WGSL sources on disk: the shared prelude plus one file per phase.
#[derive(Clone, Debug)]
pub struct ProgramLibrary {
    dir: PathBuf,
    prelude: Vec<SourceUnit>,
}

impl ProgramLibrary {
    pub fn load(dir: impl Into<PathBuf>) -> TracerResult<Self> {
        let dir = dir.into();
        let prelude = PRELUDE
            .iter()
            .map(|file| SourceUnit::load(&dir.join(file)))
            .collect::<TracerResult<Vec<_>>>()?;
        debug!("Loaded program prelude from {}", dir.display());
        Ok(Self { dir, prelude })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Prelude followed by `files`, in order.
    pub fn program(&self, files: &[&str]) -> TracerResult<Vec<SourceUnit>> {
        let mut units = self.prelude.clone();
        for file in files {
            units.push(SourceUnit::load(&self.dir.join(file))?);
        }
        Ok(units)
    }
}

/// Join units into one module, each introduced by a marker comment.
pub fn concatenate(units: &[SourceUnit]) -> String {
    let mut module = String::new();
    for unit in units {
        module.push_str("// ---- ");
        module.push_str(&unit.name);
        module.push_str(" ----\n");
        module.push_str(&unit.text);
        if !unit.text.ends_with('\n') {
            module.push('\n');
        }
    }
    module
}

/// Replace comments with spaces, keeping line breaks so positions survive.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut block_depth = 0usize;
    while let Some(c) = chars.next() {
        let next = chars.peek().copied();
        if block_depth > 0 {
            match (c, next) {
                ('*', Some('/')) => {
                    chars.next();
                    block_depth -= 1;
                    out.push_str("  ");
                }
                ('/', Some('*')) => {
                    chars.next();
                    block_depth += 1;
                    out.push_str("  ");
                }
                ('\n', _) => out.push('\n'),
                _ => out.push(' '),
            }
            continue;
        }
        match (c, next) {
            ('/', Some('/')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                block_depth = 1;
                out.push_str("  ");
            }
            _ => out.push(c),
        }
    }
    out
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Names of the `@compute` entry points declared in `text`.
pub fn compute_entry_points(text: &str) -> Vec<String> {
    let code = strip_comments(text);
    let mut entries = Vec::new();
    let mut rest = code.as_str();
    while let Some(pos) = rest.find("@compute") {
        rest = &rest[pos + "@compute".len()..];
        let Some(fn_pos) = find_keyword(rest, "fn") else { break };
        let after = rest[fn_pos + 2..].trim_start();
        let name: String = after.chars().take_while(|&c| is_ident_char(c)).collect();
        if !name.is_empty() {
            entries.push(name);
        }
        rest = &rest[fn_pos + 2..];
    }
    entries
}

fn find_keyword(text: &str, keyword: &str) -> Option<usize> {
    text.match_indices(keyword).map(|(i, _)| i).find(|&i| {
        let before = text[..i].chars().next_back();
        let after = text[i + keyword.len()..].chars().next();
        !before.is_some_and(is_ident_char) && !after.is_some_and(is_ident_char)
    })
}

/// Structural check of each unit: balanced `()`, `[]` and `{}`.
///
/// Returns the diagnostic log on failure, one `unit:line: message` per problem.
pub fn check_structure(units: &[SourceUnit]) -> Result<(), String> {
    let mut log = Vec::new();
    if units.iter().all(|unit| unit.text.trim().is_empty()) {
        log.push("program is empty".to_string());
    }
    for unit in units {
        let code = strip_comments(&unit.text);
        let mut open: Vec<(char, usize)> = Vec::new();
        for (index, line) in code.lines().enumerate() {
            let line_no = index + 1;
            for c in line.chars() {
                match c {
                    '(' | '[' | '{' => open.push((c, line_no)),
                    ')' | ']' | '}' => {
                        let expected = match c {
                            ')' => '(',
                            ']' => '[',
                            _ => '{',
                        };
                        match open.pop() {
                            Some((opener, _)) if opener == expected => {}
                            Some((opener, opened_at)) => log.push(format!(
                                "{}:{line_no}: unexpected `{c}`, `{opener}` from line {opened_at} is still open",
                                unit.name
                            )),
                            None => log.push(format!("{}:{line_no}: unmatched `{c}`", unit.name)),
                        }
                    }
                    _ => {}
                }
            }
        }
        for (opener, line_no) in open {
            log.push(format!("{}:{line_no}: `{opener}` is never closed", unit.name));
        }
    }
    if log.is_empty() {
        Ok(())
    } else {
        Err(log.join("\n"))
    }
}
