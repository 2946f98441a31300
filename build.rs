use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// A source rule: a line regex plus a filter that decides whether a matched
// line is a real violation.
struct Rule {
    title: &'static str,
    pattern: &'static str,
    hint: &'static str,
    is_violation: fn(&str) -> bool,
}

const FORBIDDEN_COMMENT_WORDS: &[&str] = &[
    "CRITICAL",
    "FIXED",
    "CORRECTED",
    "FIX",
    "NEW",
    "CHANGE",
    "MODIFIED",
    "MODIFY",
    "UPDATE",
];

const RULES: &[Rule] = &[
    Rule {
        title: "underscore-prefixed identifiers",
        pattern: r"\b(_[a-zA-Z0-9_]+)\b",
        hint: "Either use the variable (removing the underscore) or remove it completely.",
        is_violation: underscore_ident_in_code,
    },
    Rule {
        title: "`let _ = ident;` patterns",
        pattern: r"\blet\s+(?:mut\s+)?_\s*=\s*([A-Za-z_][A-Za-z0-9_]*)\s*;",
        hint: "Use the value or remove the binding.",
        is_violation: is_code_line,
    },
    Rule {
        title: "tuple patterns discarding every component",
        pattern: r"\blet\s*\([^)]*\b_\b[^)]*\)\s*(?::[^=]*)?=",
        hint: "Bind the values you need instead of discarding the whole tuple.",
        is_violation: tuple_pattern_is_fully_ignored,
    },
    Rule {
        title: "forbidden words in comments",
        pattern: r"(//|/\*).*(?:CRITICAL|FIXED|CORRECTED|FIX|NEW|CHANGE|MODIF|UPDATE)",
        hint: "Comments describe the code as it is, not its history.",
        is_violation: comment_has_forbidden_word,
    },
    Rule {
        title: "`**` in non-doc comments",
        pattern: r"(//|/\*).*\*\*",
        hint: "Plain comments are not markdown.",
        is_violation: is_plain_comment,
    },
    Rule {
        title: "#[allow(dead_code)] attributes",
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        hint: "Remove unused code instead of silencing the lint.",
        is_violation: is_code_line,
    },
    Rule {
        title: "#[ignore] test attributes",
        pattern: r"#\s*\[\s*ignore\b",
        hint: "Fix or delete the test.",
        is_violation: is_code_line,
    },
    Rule {
        title: "debug_assert! usage",
        pattern: r"\bdebug_assert(?:_eq|_ne)?!",
        hint: "Use assert! instead.",
        is_violation: is_code_line,
    },
];

struct LineCollector {
    rule: &'static Rule,
    violations: Vec<String>,
}

impl Sink for LineCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if (self.rule.is_violation)(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_word_byte(b: u8) -> bool {
    matches!(b, b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'_')
}

fn is_comment_line(line: &str) -> bool {
    line.trim_start().starts_with("//")
}

fn is_code_line(line: &str) -> bool {
    !is_comment_line(line)
}

fn is_plain_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    is_comment_line(line) && !trimmed.starts_with("///") && !trimmed.starts_with("//!")
}

// Text of the line outside double-quoted string literals.
fn outside_strings(line: &str) -> String {
    line.split('"').step_by(2).collect::<Vec<_>>().join(" ")
}

fn underscore_ident_in_code(line: &str) -> bool {
    if is_comment_line(line) {
        return false;
    }
    let code = outside_strings(line);
    let bytes = code.as_bytes();
    (0..bytes.len()).any(|i| {
        bytes[i] == b'_'
            && (i == 0 || !is_word_byte(bytes[i - 1]))
            && i + 1 < bytes.len()
            && is_word_byte(bytes[i + 1])
    })
}

fn comment_has_forbidden_word(line: &str) -> bool {
    let Some(start) = line.find("//").or_else(|| line.find("/*")) else {
        return false;
    };
    line[start..]
        .split(|c: char| !c.is_ascii_alphabetic())
        .any(|word| {
            FORBIDDEN_COMMENT_WORDS
                .iter()
                .any(|bad| word.starts_with(bad) && word.chars().all(|c| c.is_ascii_uppercase()))
        })
}

fn tuple_pattern_is_fully_ignored(line: &str) -> bool {
    if is_comment_line(line) {
        return false;
    }
    let Some(let_pos) = line.find("let") else {
        return false;
    };
    let after = &line[let_pos + 3..];
    let (Some(open), Some(close)) = (after.find('('), after.find(')')) else {
        return false;
    };
    if close < open {
        return false;
    }
    after[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .all(|c| c == "_" || c.starts_with('_'))
}

fn rust_sources(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn scan(rule: &'static Rule, files: &[PathBuf]) -> Vec<String> {
    let matcher = match RegexMatcher::new_line_matcher(rule.pattern) {
        Ok(matcher) => matcher,
        Err(e) => return vec![format!("Error creating regex matcher for {}: {e}", rule.title)],
    };
    let mut searcher = Searcher::new();
    let mut reports = Vec::new();
    for path in files {
        let mut collector = LineCollector {
            rule,
            violations: Vec::new(),
        };
        if searcher.search_path(&matcher, path, &mut collector).is_err() {
            continue;
        }
        if collector.violations.is_empty() {
            continue;
        }
        let mut msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            collector.violations.len(),
            rule.title,
            path.display()
        );
        for violation in &collector.violations {
            msg.push_str(&format!("   {violation}\n"));
        }
        msg.push_str(&format!("   {}\n", rule.hint));
        reports.push(msg);
    }
    reports
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");

    if std::env::var("LSR1_SKIP_LINT_CHECKS").is_ok() || std::env::var("DOCS_RS").is_ok() {
        return;
    }

    let manifest_dir = std::env::var_os("CARGO_MANIFEST_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let files = rust_sources(&manifest_dir.join("src"));

    let all_violations: Vec<String> = RULES.iter().flat_map(|rule| scan(rule, &files)).collect();
    if !all_violations.is_empty() {
        eprintln!("\n❌ VALIDATION ERRORS");
        eprintln!("====================");
        for violation in &all_violations {
            eprintln!("{violation}");
            eprintln!("--------------------");
        }
        eprintln!(
            "\n⚠️ Found {} total code quality violations. Fix all issues before committing.",
            all_violations.len()
        );
        std::process::exit(1);
    }
}
