//! Reading serialized operator lists from the external parser.
//!
//! The parser contract hands the compiler a flat, ordered operator list with
//! pipe names resolved textually; it reaches the CLI as a JSON document.
//! `--params` substitutions are applied to the raw text before decoding,
//! so any literal (paths, constants) can be parameterized.

use std::fs;
use std::path::Path;

use dataflow::Operator;

use crate::error::CompileError;

/// Replace every `$key` occurrence with its value.
pub fn substitute_params(text: &str, params: &[(String, String)]) -> String {
    let mut out = text.to_string();
    for (key, value) in params {
        out = out.replace(&format!("${}", key), value);
    }
    out
}

/// Read and decode one script file.
pub fn read_script(path: &Path, params: &[(String, String)]) -> Result<Vec<Operator>, CompileError> {
    let text = fs::read_to_string(path)?;
    let text = substitute_params(&text, params);
    serde_json::from_str(&text)
        .map_err(|err| CompileError::Script(format!("{}: {}", path.display(), err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_parameters() {
        let params = vec![("inbase".to_string(), "/data".to_string())];
        assert_eq!(
            substitute_params("{\"file\": \"$inbase/f.csv\"}", &params),
            "{\"file\": \"/data/f.csv\"}"
        );
    }

    #[test]
    fn decodes_an_operator_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.json");
        let script = serde_json::to_string(&vec![
            Operator::load("a", "f.csv", None),
            Operator::dump("a"),
        ])
        .unwrap();
        fs::write(&path, script).unwrap();

        let ops = read_script(&path, &[]).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].tag(), "LOAD");
    }

    #[test]
    fn malformed_script_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "[{\"not\": \"an operator\"}]").unwrap();
        assert!(matches!(
            read_script(&path, &[]),
            Err(CompileError::Script(_))
        ));
    }
}
