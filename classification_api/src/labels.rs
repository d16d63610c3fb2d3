use std::{
    collections::HashSet,
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelMapError {
    #[error("failed to read label file: {0}")]
    Io(#[from] io::Error),
    #[error("label file contains no labels")]
    Empty,
    #[error("blank label at line {0}")]
    Blank(usize),
    #[error("duplicate label `{0}` at line {1}")]
    Duplicate(String, usize),
}

/// Index-to-name lookup for the model's output classes. Line number in the
/// label file is the class index; the mapping must be a bijection.
#[derive(Debug, Clone)]
pub struct LabelMap {
    labels: Vec<String>,
}

impl LabelMap {
    pub fn from_file(filepath: &Path) -> Result<Self, LabelMapError> {
        let file = File::open(filepath)?;
        let reader = io::BufReader::new(file);
        let mut labels = Vec::new();

        for line_result in reader.lines() {
            labels.push(line_result?);
        }

        Self::from_labels(labels)
    }

    pub fn from_labels(raw: Vec<String>) -> Result<Self, LabelMapError> {
        let mut seen = HashSet::new();
        let mut labels = Vec::with_capacity(raw.len());

        for (line, label) in raw.into_iter().enumerate() {
            let label = label.trim().to_string();
            if label.is_empty() {
                return Err(LabelMapError::Blank(line + 1));
            }
            if !seen.insert(label.clone()) {
                return Err(LabelMapError::Duplicate(label, line + 1));
            }
            labels.push(label);
        }

        if labels.is_empty() {
            return Err(LabelMapError::Empty);
        }

        Ok(Self { labels })
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn labels(raw: &[&str]) -> Result<LabelMap, LabelMapError> {
        LabelMap::from_labels(raw.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn line_number_is_class_index() {
        let map = labels(&["cats", "dogs"]).unwrap();
        assert_eq!(map.get(0), Some("cats"));
        assert_eq!(map.get(1), Some("dogs"));
        assert_eq!(map.get(2), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let result = labels(&["cats", "cats"]);
        assert!(matches!(result, Err(LabelMapError::Duplicate(_, 2))));
    }

    #[test]
    fn blank_and_empty_files_are_rejected() {
        assert!(matches!(labels(&["cats", "  "]), Err(LabelMapError::Blank(2))));
        assert!(matches!(labels(&[]), Err(LabelMapError::Empty)));
    }

    #[test]
    fn loads_from_file_and_trims_whitespace() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cats ").unwrap();
        writeln!(file, " dogs").unwrap();

        let map = LabelMap::from_file(file.path()).unwrap();
        assert_eq!(map.get(0), Some("cats"));
        assert_eq!(map.get(1), Some("dogs"));
    }
}
