use crate::error::{Error, Result};
use regex::Regex;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Trace names from `<build_dir>/gen/trace_list.json`.
pub fn load_trace_list(path: impl AsRef<Path>) -> Result<Vec<String>> {
	let path = path.as_ref();
	let data = fs::read_to_string(path).map_err(|e| Error::config(format!("cannot read trace list {}: {e}", path.display())))?;
	let traces: Vec<String> = serde_json::from_str(&data)?;
	debug!("{} traces in {}", traces.len(), path.display());
	Ok(traces)
}

/// Translate a shell glob (`*`, `?`, `[seq]`, `[!seq]`) into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
	let chars: Vec<char> = pattern.chars().collect();
	let mut re = String::from("(?s)^");
	let mut i = 0;
	while i < chars.len() {
		let c = chars[i];
		i += 1;
		match c {
			'*' => re.push_str(".*"),
			'?' => re.push('.'),
			'[' => {
				let mut j = i;
				if j < chars.len() && chars[j] == '!' { j += 1; }
				if j < chars.len() && chars[j] == ']' { j += 1; }
				while j < chars.len() && chars[j] != ']' { j += 1; }
				if j >= chars.len() {
					re.push_str(r"\[");
					continue;
				}
				let body: String = chars[i..j].iter().collect();
				i = j + 1;
				let (negate, body) = match body.strip_prefix('!') {
					Some(rest) => (true, rest),
					None => (false, body.as_str()),
				};
				re.push('[');
				if negate { re.push('^'); }
				for ch in body.chars() {
					if matches!(ch, '\\' | '[' | ']' | '^' | '&' | '~') { re.push('\\'); }
					re.push(ch);
				}
				re.push(']');
			}
			other => re.push_str(&regex::escape(&other.to_string())),
		}
	}
	re.push('$');
	Regex::new(&re).map_err(|e| Error::config(format!("invalid filter {pattern:?}: {e}")))
}

pub fn glob_filter<'a>(traces: &'a [String], pattern: &str) -> Result<Vec<&'a str>> {
	let re = glob_to_regex(pattern)?;
	Ok(traces.iter().map(String::as_str).filter(|t| re.is_match(t)).collect())
}

/// Test name of a trace-list entry: everything before the first space.
pub fn test_name(entry: &str) -> &str { entry.split(' ').next().unwrap_or(entry) }

#[cfg(test)]
mod tests {
	use super::*;

	fn list() -> Vec<String> {
		["aztec_ruins", "aztec_ruins_high", "trex_200 v2", "manhattan_10", "manhattan_31"].iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn filters_like_fnmatch() {
		let traces = list();
		assert_eq!(glob_filter(&traces, "*").unwrap().len(), 5);
		assert_eq!(glob_filter(&traces, "aztec*").unwrap(), vec!["aztec_ruins", "aztec_ruins_high"]);
		assert_eq!(glob_filter(&traces, "manhattan_?1").unwrap(), vec!["manhattan_31"]);
		assert_eq!(glob_filter(&traces, "manhattan_[!3]*").unwrap(), vec!["manhattan_10"]);
		assert_eq!(glob_filter(&traces, "aztec_ruins").unwrap(), vec!["aztec_ruins"]);
		assert!(glob_filter(&traces, "trex_200").unwrap().is_empty());
	}

	#[test]
	fn unclosed_bracket_is_literal() {
		let traces = vec!["a[b".to_string()];
		assert_eq!(glob_filter(&traces, "a[b").unwrap(), vec!["a[b"]);
	}

	#[test]
	fn test_name_drops_suffix() {
		assert_eq!(test_name("trex_200 v2"), "trex_200");
		assert_eq!(test_name("aztec_ruins"), "aztec_ruins");
	}

	#[test]
	fn loads_json_list() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("trace_list.json");
		fs::write(&path, r#"["a", "b c"]"#).unwrap();
		assert_eq!(load_trace_list(&path).unwrap(), vec!["a".to_string(), "b c".to_string()]);
		fs::write(&path, "{}").unwrap();
		assert!(matches!(load_trace_list(&path), Err(Error::Json(_))));
		assert!(load_trace_list(dir.path().join("missing.json")).is_err());
	}
}
