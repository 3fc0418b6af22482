use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const FORBIDDEN_WORDS: &str = "FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE";

// Directories that are not part of this crate's sources.
const SKIPPED_DIRS: [&str; 2] = ["./target", "./examples"];

#[derive(Clone, Copy)]
enum Rule {
    UnderscorePrefix,
    ForbiddenWord,
    StarsInComment,
    UppercaseComment,
    AllowDeadCode,
}

impl Rule {
    fn pattern(self) -> String {
        match self {
            Rule::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Rule::ForbiddenWord => format!(r"(//|/\*|///).*(?:{FORBIDDEN_WORDS})"),
            Rule::StarsInComment => r"(//|/\*).*\*\*".to_string(),
            Rule::UppercaseComment => r"(//|/\*|///).*".to_string(),
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
        }
    }

    fn applies_to_build_script(self) -> bool {
        matches!(self, Rule::UnderscorePrefix)
    }

    fn headline(self) -> &'static str {
        match self {
            Rule::UnderscorePrefix => "underscore-prefixed variables",
            Rule::ForbiddenWord | Rule::StarsInComment => "forbidden comment patterns",
            Rule::UppercaseComment => "comments with all uppercase alphabetic characters",
            Rule::AllowDeadCode => "#[allow(dead_code)] attributes",
        }
    }

    fn advice(self) -> &'static str {
        match self {
            Rule::UnderscorePrefix => {
                "Underscore-prefixed variable names are not allowed in this project.\n   Either use the variable (removing the underscore) or remove it completely."
            }
            Rule::ForbiddenWord => {
                "Comments announcing edits (FIXED, NEW, UPDATED and the like) are not allowed.\n   Remove them completely rather than commenting them out."
            }
            Rule::StarsInComment => {
                "The '**' pattern is not allowed in regular comments (but is allowed in doc comments)."
            }
            Rule::UppercaseComment => {
                "Comments where all alphabetic characters are uppercase are not allowed.\n   Strongly consider deleting the comment completely."
            }
            Rule::AllowDeadCode => {
                "#[allow(dead_code)] attributes are not allowed in this project.\n   Either use the code (removing the attribute) or remove it completely."
            }
        }
    }

    // Decides whether a line matched by `pattern` is a real violation.
    fn is_violation(self, line: &str) -> bool {
        let trimmed = line.trim_start();
        match self {
            Rule::UnderscorePrefix => !is_comment(trimmed) && !underscore_only_in_strings(line),
            Rule::ForbiddenWord | Rule::AllowDeadCode => true,
            Rule::StarsInComment => !trimmed.starts_with("///") && !trimmed.starts_with("//!"),
            Rule::UppercaseComment => match comment_text(line) {
                Some(text) => {
                    let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
                    letters.peek().is_some() && letters.all(|c| c.is_uppercase())
                }
                None => false,
            },
        }
    }
}

// Collects every violating line of one file.
struct ViolationCollector {
    rule: Rule,
    violations: Vec<String>,
    file_path: PathBuf,
}

impl ViolationCollector {
    fn new(rule: Rule, file_path: &Path) -> Self {
        Self {
            rule,
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.rule.headline(),
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {}\n", self.rule.advice()));
        Some(error_msg)
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.rule.is_violation(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_comment(trimmed: &str) -> bool {
    trimmed.starts_with("//")
}

// True when every underscore on the line sits inside a string literal.
fn underscore_only_in_strings(line: &str) -> bool {
    if !line.contains('"') {
        return false;
    }
    line.split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

fn comment_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    for prefix in ["///", "//!", "//"] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return Some(rest.trim());
        }
    }
    let idx = line.find("/*")?;
    let rest = &line[idx + 2..];
    Some(match rest.find("*/") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    })
}

fn rust_sources() -> impl Iterator<Item = PathBuf> {
    WalkDir::new(".")
        .into_iter()
        .filter_entry(|e| !SKIPPED_DIRS.iter().any(|dir| e.path().starts_with(dir)))
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
}

fn scan(rule: Rule) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(&rule.pattern())?;
    let mut searcher = Searcher::new();
    for path in rust_sources() {
        if path.file_name().is_some_and(|name| name == "build.rs") && !rule.applies_to_build_script() {
            continue;
        }
        let mut collector = ViolationCollector::new(rule, &path);
        searcher.search_path(&matcher, &path, &mut collector)?;
        if let Some(error_message) = collector.error_message() {
            return Err(error_message.into());
        }
    }
    Ok(())
}

// Compiles build.rs on its own with the crate's strict lints.
fn check_build_script_lints() {
    let output = std::process::Command::new("rustc")
        .args([
            "--edition",
            "2021",
            "-D",
            "unused_variables",
            "-D",
            "dead_code",
            "-D",
            "unused_imports",
            "--crate-type",
            "bin",
            "--error-format",
            "human",
            "--out-dir",
        ])
        .arg(std::env::temp_dir())
        .arg("build.rs")
        .output();

    match output {
        Ok(output) if !output.status.success() => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            for (needle, what) in [
                ("unused variable", "Unused variables"),
                ("is never used", "Unused functions"),
                ("unused import", "Unused imports"),
            ] {
                if stderr.contains(needle) {
                    eprintln!("\n❌ ERROR: {what} detected in build.rs!");
                    eprintln!("{stderr}");
                    std::process::exit(1);
                }
            }
        }
        Ok(_) => {}
        Err(_) => {
            println!("cargo:warning=Could not check build.rs for unused variables, functions or imports");
        }
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    println!("cargo:rustc-env=CASCADE_BUILD_TIMESTAMP={timestamp}");

    check_build_script_lints();

    for rule in [
        Rule::UnderscorePrefix,
        Rule::ForbiddenWord,
        Rule::StarsInComment,
        Rule::UppercaseComment,
        Rule::AllowDeadCode,
    ] {
        if let Err(e) = scan(rule) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
