//! Shared CLI definitions for cutl.
//!
//! Used by the main application and by the build script (manpage) and
//! gen_docs binary (command-line-options markdown).

use clap::{CommandFactory, Parser};
use std::path::{Path, PathBuf};

/// Extensions recognised as newline-delimited JSON.
const JSONL_EXTENSIONS: &[&str] = &["jsonl", "ndjson", "jsonlines"];

/// Returns true when the path carries a JSON Lines extension (case-insensitive).
/// Files with other extensions are still opened; callers only use this to warn.
pub fn is_jsonl_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            JSONL_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Command-line arguments for cutl
#[derive(Clone, Parser, Debug)]
#[command(
    name = "cutl",
    version,
    about = "A cozy tool to sift through and modify JSONL files.",
    long_about = "View, filter, sort, mark, edit and delete records of large JSONL files in \
                  the terminal. Columns and filters are jq-style expressions; an optional \
                  assistant turns plain-language intent into a filter when OPENAI_API_KEY is set."
)]
pub struct Args {
    /// Path to the JSONL file to open (not required with --generate-config)
    #[arg(
        short = 'i',
        long = "input",
        value_name = "PATH",
        required_unless_present = "generate_config"
    )]
    pub input: Option<PathBuf>,

    /// Write debug output to debug.log in the current directory
    #[arg(long = "debug", action)]
    pub debug: bool,

    /// Generate default configuration file at ~/.config/cutl/config.toml
    #[arg(long = "generate-config", action)]
    pub generate_config: bool,

    /// Force overwrite existing config file when using --generate-config
    #[arg(long = "force", requires = "generate_config", action)]
    pub force: bool,
}

/// Escape `|` and newlines for use in markdown table cells.
fn escape_table_cell(s: &str) -> String {
    s.replace('|', "\\|").replace(['\n', '\r'], " ")
}

fn value_placeholder(arg: &clap::Arg) -> String {
    arg.get_value_names()
        .map(|names| {
            names
                .iter()
                .map(|n: &clap::builder::Str| format!("<{}>", n.as_ref() as &str))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
}

/// Render command-line options as markdown.
pub fn render_options_markdown() -> String {
    let mut cmd = Args::command();
    cmd.build();

    let mut out = String::from("# Command Line Options\n\n");

    out.push_str("## Usage\n\n```\n");
    let usage = cmd.render_usage();
    out.push_str(&usage.to_string());
    out.push_str("\n```\n\n");

    out.push_str("## Options\n\n");
    out.push_str("| Option | Description |\n");
    out.push_str("|--------|-------------|\n");

    for arg in cmd.get_arguments() {
        let id = arg.get_id().as_ref().to_string();
        if id == "help" || id == "version" {
            continue;
        }

        let mut parts = Vec::new();
        if let Some(s) = arg.get_short() {
            parts.push(format!("-{s}"));
        }
        if let Some(l) = arg.get_long() {
            parts.push(format!("--{l}"));
        }
        let op = parts.join(", ");
        let placeholder = if arg.get_action().takes_values() {
            value_placeholder(arg)
        } else {
            String::new()
        };
        let option_str = if placeholder.is_empty() {
            op
        } else {
            format!("{op} {placeholder}")
        };

        let help = arg
            .get_help()
            .map(|h| escape_table_cell(&h.to_string()))
            .unwrap_or_else(|| "-".to_string());

        out.push_str(&format!("| `{option_str}` | {help} |\n"));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonl_detection() {
        assert!(is_jsonl_path(Path::new("data.jsonl")));
        assert!(is_jsonl_path(Path::new("data.NDJSON")));
        assert!(is_jsonl_path(Path::new("dir/train.jsonlines")));
        assert!(!is_jsonl_path(Path::new("data.json")));
        assert!(!is_jsonl_path(Path::new("noext")));
    }

    #[test]
    fn test_parse_input_and_debug() {
        let args = Args::try_parse_from(["cutl", "--input", "a.jsonl", "--debug"]).unwrap();
        assert_eq!(args.input, Some(PathBuf::from("a.jsonl")));
        assert!(args.debug);
        assert!(!args.generate_config);

        let args = Args::try_parse_from(["cutl", "-i", "b.jsonl"]).unwrap();
        assert_eq!(args.input, Some(PathBuf::from("b.jsonl")));
    }

    #[test]
    fn test_input_required_unless_generating_config() {
        assert!(Args::try_parse_from(["cutl"]).is_err());
        let args = Args::try_parse_from(["cutl", "--generate-config", "--force"]).unwrap();
        assert!(args.generate_config);
        assert!(args.force);
        assert!(Args::try_parse_from(["cutl", "-i", "a.jsonl", "--force"]).is_err());
    }

    #[test]
    fn test_options_markdown_lists_flags() {
        let md = render_options_markdown();
        assert!(md.contains("`-i, --input <PATH>`"));
        assert!(md.contains("`--debug`"));
        assert!(md.contains("`--generate-config`"));
        assert!(!md.contains("--help"));
    }
}
