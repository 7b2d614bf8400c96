//! Function records and runtime classification

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Implementation language of a function, derived from its runtime identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuntimeLanguage {
    Node,
    Python,
    Dotnet,
    Java,
    Ruby,
    Go,
    /// Custom runtimes (`provided`, `provided.al2`, `provided.al2023`)
    Provided,
    Other(String),
}

impl RuntimeLanguage {
    /// Classify a runtime identifier such as `python3.12` or `nodejs20.x`
    pub fn from_runtime(runtime: &str) -> Self {
        let runtime = runtime.trim().to_ascii_lowercase();
        let prefixes = [
            ("nodejs", Self::Node),
            ("node", Self::Node),
            ("python", Self::Python),
            ("dotnet", Self::Dotnet),
            ("java", Self::Java),
            ("ruby", Self::Ruby),
            ("go", Self::Go),
            ("provided", Self::Provided),
        ];

        prefixes
            .into_iter()
            .find(|(prefix, _)| runtime.starts_with(prefix))
            .map_or(Self::Other(runtime), |(_, language)| language)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Node => "nodejs",
            Self::Python => "python",
            Self::Dotnet => "dotnet",
            Self::Java => "java",
            Self::Ruby => "ruby",
            Self::Go => "go",
            Self::Provided => "provided",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for RuntimeLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared function: where its code lives and which handler to call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
    /// Filled from the key of the enclosing [`FunctionRecords`] map
    #[serde(default, skip_serializing)]
    pub logical_id: String,
    #[serde(alias = "runtimeLanguage")]
    pub runtime: String,
    #[serde(alias = "moduleReference")]
    pub module: String,
    #[serde(alias = "handlerName")]
    pub handler: String,
}

impl FunctionRecord {
    pub fn new(
        logical_id: impl Into<String>,
        runtime: impl Into<String>,
        module: impl Into<String>,
        handler: impl Into<String>,
    ) -> Self {
        Self {
            logical_id: logical_id.into(),
            runtime: runtime.into(),
            module: module.into(),
            handler: handler.into(),
        }
    }

    pub fn language(&self) -> RuntimeLanguage {
        RuntimeLanguage::from_runtime(&self.runtime)
    }
}

/// Mapping of logical id to function record
///
/// Serialized as a plain JSON object keyed by logical id. Records read from
/// JSON get their `logical_id` from the key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HashMap<String, FunctionRecord>")]
pub struct FunctionRecords(BTreeMap<String, FunctionRecord>);

impl From<HashMap<String, FunctionRecord>> for FunctionRecords {
    fn from(map: HashMap<String, FunctionRecord>) -> Self {
        map.into_iter()
            .map(|(logical_id, mut record)| {
                record.logical_id.clone_from(&logical_id);
                record
            })
            .collect()
    }
}

impl FromIterator<FunctionRecord> for FunctionRecords {
    fn from_iter<I: IntoIterator<Item = FunctionRecord>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|record| (record.logical_id.clone(), record))
                .collect(),
        )
    }
}

impl FunctionRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: FunctionRecord) {
        self.0.insert(record.logical_id.clone(), record);
    }

    pub fn get(&self, logical_id: &str) -> Option<&FunctionRecord> {
        self.0.get(logical_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionRecord> {
        self.0.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_language_from_runtime() {
        assert_eq!(RuntimeLanguage::from_runtime("python3.12"), RuntimeLanguage::Python);
        assert_eq!(RuntimeLanguage::from_runtime("nodejs20.x"), RuntimeLanguage::Node);
        assert_eq!(RuntimeLanguage::from_runtime("dotnet8"), RuntimeLanguage::Dotnet);
        assert_eq!(
            RuntimeLanguage::from_runtime("provided.al2023"),
            RuntimeLanguage::Provided
        );
        assert_eq!(
            RuntimeLanguage::from_runtime("cobol"),
            RuntimeLanguage::Other("cobol".to_string())
        );
    }

    #[test]
    fn test_records_take_logical_id_from_key() {
        let json = r#"{
            "FnA": {"runtime": "python3.12", "module": "src/fn_a", "handler": "app.handler"},
            "FnB": {"runtimeLanguage": "dotnet8", "moduleReference": "src/FnB", "handlerName": "FnB::FnB.Function::Handle"}
        }"#;

        let records: FunctionRecords = serde_json::from_str(json).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records.get("FnA").unwrap().logical_id, "FnA");
        assert_eq!(records.get("FnB").unwrap().language(), RuntimeLanguage::Dotnet);
        assert_eq!(records.get("FnB").unwrap().module, "src/FnB");
    }
}
