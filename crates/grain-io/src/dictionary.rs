//! Dictionary (schema) file parsing.
//!
//! A dictionary file declares one or more named dictionaries, each listing
//! its variables with their type:
//!
//! ```text
//! Dictionary Iris
//! {
//!     Numerical SepalLength;
//!     Numerical PetalLength;
//!     Categorical Class;
//! };
//! ```
//!
//! `//` starts a comment. Variable names run to the `;`, so they may
//! contain spaces.

use grain_core::{AttributeType, GrainError, GrainResult};
use serde::Serialize;
use std::path::Path;

/// One declared variable.
#[derive(Debug, Clone, Serialize)]
pub struct Variable {
    pub name: String,
    pub attribute_type: AttributeType,
}

/// One named dictionary.
#[derive(Debug, Clone, Serialize)]
pub struct Dictionary {
    pub name: String,
    pub variables: Vec<Variable>,
}

impl Dictionary {
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }
}

/// All dictionaries of one file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DictionaryFile {
    pub dictionaries: Vec<Dictionary>,
}

impl DictionaryFile {
    pub fn dictionary(&self, name: &str) -> Option<&Dictionary> {
        self.dictionaries.iter().find(|d| d.name == name)
    }
}

pub fn read_dictionary_file(path: &Path) -> GrainResult<DictionaryFile> {
    let text = std::fs::read_to_string(path).map_err(|error| {
        GrainError::Io(std::io::Error::new(
            error.kind(),
            format!("cannot read dictionary file {}: {}", path.display(), error),
        ))
    })?;
    parse_dictionary_text(&text)
}

pub fn parse_dictionary_text(text: &str) -> GrainResult<DictionaryFile> {
    let mut file = DictionaryFile::default();
    let mut current: Option<Dictionary> = None;
    let mut in_body = false;

    for (line_number, raw_line) in text.lines().enumerate() {
        let line = match raw_line.find("//") {
            Some(position) => &raw_line[..position],
            None => raw_line,
        }
        .trim();
        if line.is_empty() {
            continue;
        }
        let parse_error = |message: String| {
            GrainError::Parse(format!("line {}: {}", line_number + 1, message))
        };

        if let Some(rest) = line.strip_prefix("Dictionary") {
            if current.is_some() {
                return Err(parse_error("nested dictionary declaration".into()));
            }
            let name = rest.trim().trim_end_matches(';').trim();
            if name.is_empty() {
                return Err(parse_error("dictionary declaration without a name".into()));
            }
            current = Some(Dictionary {
                name: name.to_string(),
                variables: Vec::new(),
            });
            in_body = false;
            continue;
        }
        if line == "{" {
            if current.is_none() || in_body {
                return Err(parse_error("unexpected `{`".into()));
            }
            in_body = true;
            continue;
        }
        if line == "};" || line == "}" {
            let Some(dictionary) = current.take() else {
                return Err(parse_error("unexpected `}`".into()));
            };
            if dictionary.variables.is_empty() {
                return Err(GrainError::Spec(format!(
                    "dictionary `{}` declares no variable",
                    dictionary.name
                )));
            }
            file.dictionaries.push(dictionary);
            in_body = false;
            continue;
        }

        // Variable declaration: `<Type> <name> ;`
        let Some(dictionary) = current.as_mut() else {
            return Err(parse_error(format!("statement outside a dictionary: `{}`", line)));
        };
        if !in_body {
            return Err(parse_error(format!("statement before `{{`: `{}`", line)));
        }
        let statement = line.trim_end_matches(';').trim();
        let (type_token, name) = statement
            .split_once(char::is_whitespace)
            .ok_or_else(|| parse_error(format!("malformed declaration: `{}`", line)))?;
        let attribute_type = match type_token {
            "Numerical" => AttributeType::Numeric,
            "Categorical" => AttributeType::Categorical,
            other => {
                return Err(parse_error(format!("unknown variable type `{}`", other)));
            }
        };
        let name = name.trim();
        if dictionary.variable(name).is_some() {
            return Err(GrainError::Spec(format!(
                "variable `{}` is declared twice in dictionary `{}`",
                name, dictionary.name
            )));
        }
        dictionary.variables.push(Variable {
            name: name.to_string(),
            attribute_type,
        });
    }

    if let Some(dictionary) = current {
        return Err(GrainError::Parse(format!(
            "dictionary `{}` is not closed",
            dictionary.name
        )));
    }
    if file.dictionaries.is_empty() {
        return Err(GrainError::Spec(
            "the dictionary file declares no dictionary".into(),
        ));
    }
    Ok(file)
}
