//! SAM / CloudFormation template resolver
//!
//! Parses templates (YAML or JSON) into `{Resources: logicalId -> {Type,
//! Properties}}` and derives the function records and code locations the
//! router and the build supervisor work from. Short-form intrinsic tags such
//! as `!Ref` or `!Sub` are tolerated; a tagged scalar resolves to its
//! literal text.

use samp_core::{FunctionRecord, FunctionRecords};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const SERVERLESS_FUNCTION: &str = "AWS::Serverless::Function";

/// File names probed by [`Template::find`], in order
pub const TEMPLATE_FILE_NAMES: [&str; 3] = ["template.yaml", "template.yml", "template.json"];

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Template has no Resources section")]
    MissingResources,

    #[error("Resource {0} has no Type")]
    MissingType(String),

    #[error("No template found in {0}")]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A declared resource
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub resource_type: String,
    pub properties: Mapping,
}

impl Resource {
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// A parsed infrastructure template
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    resources: BTreeMap<String, Resource>,
    function_globals: Mapping,
}

impl Template {
    /// Parse template text. JSON templates parse through the same path.
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let root: Value = serde_yaml::from_str(text)?;

        let resources = root
            .get("Resources")
            .and_then(Value::as_mapping)
            .ok_or(TemplateError::MissingResources)?;

        let mut parsed = BTreeMap::new();
        for (key, body) in resources {
            let Some(logical_id) = key.as_str() else {
                continue;
            };
            let resource_type = body
                .get("Type")
                .and_then(scalar_str)
                .ok_or_else(|| TemplateError::MissingType(logical_id.to_string()))?;
            let properties = body
                .get("Properties")
                .and_then(Value::as_mapping)
                .cloned()
                .unwrap_or_default();

            parsed.insert(
                logical_id.to_string(),
                Resource {
                    resource_type: resource_type.to_string(),
                    properties,
                },
            );
        }

        let function_globals = root
            .get("Globals")
            .and_then(|g| g.get("Function"))
            .and_then(Value::as_mapping)
            .cloned()
            .unwrap_or_default();

        Ok(Self {
            resources: parsed,
            function_globals,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, TemplateError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Locate the template file in a project directory
    pub fn find(dir: &Path) -> Result<PathBuf, TemplateError> {
        TEMPLATE_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
            .ok_or_else(|| TemplateError::NotFound(dir.to_path_buf()))
    }

    pub fn resources(&self) -> &BTreeMap<String, Resource> {
        &self.resources
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    /// Serverless function resources, keyed by logical id
    pub fn functions(&self) -> impl Iterator<Item = (&str, &Resource)> {
        self.resources
            .iter()
            .filter(|(_, r)| r.resource_type == SERVERLESS_FUNCTION)
            .map(|(id, r)| (id.as_str(), r))
    }

    /// Function property with `Globals.Function` as fallback
    pub fn function_property<'a>(&'a self, function: &'a Resource, key: &str) -> Option<&'a str> {
        function
            .property(key)
            .or_else(|| self.function_globals.get(key))
            .and_then(scalar_str)
    }

    /// Function records for every serverless function with a runtime
    ///
    /// Image-based functions (no `Runtime` anywhere) are skipped.
    pub fn function_records(&self) -> FunctionRecords {
        self.functions()
            .filter_map(|(logical_id, function)| {
                let Some(runtime) = self.function_property(function, "Runtime") else {
                    debug!(logical_id = %logical_id, "Skipping function without runtime");
                    return None;
                };
                Some(FunctionRecord::new(
                    logical_id,
                    runtime,
                    self.function_property(function, "CodeUri").unwrap_or_default(),
                    self.function_property(function, "Handler").unwrap_or_default(),
                ))
            })
            .collect()
    }

    /// Distinct build project references across all functions
    ///
    /// A reference is `<CodeUri>/<assembly>` where the assembly is the part of
    /// the handler before the first `::`. A function without its own
    /// `CodeUri` uses `Globals.Function.CodeUri`. Identical references from
    /// several functions collapse to one.
    pub fn code_locations(&self) -> BTreeSet<String> {
        self.functions()
            .filter_map(|(logical_id, function)| {
                let code_uri = function
                    .property("CodeUri")
                    .and_then(scalar_str)
                    .map(str::to_string)
                    .or_else(|| {
                        self.function_globals
                            .get("CodeUri")
                            .and_then(scalar_str)
                            .map(|uri| format!("{uri}/"))
                    });
                let handler = self.function_property(function, "Handler");

                match (code_uri, handler) {
                    (Some(code_uri), Some(handler)) => {
                        let assembly = handler.split("::").next().unwrap_or(handler);
                        Some(normalize_reference(&format!("{code_uri}/{assembly}")))
                    }
                    _ => {
                        debug!(logical_id = %logical_id, "Skipping function without code location");
                        None
                    }
                }
            })
            .collect()
    }
}

/// Text of a scalar, looking through a short-form intrinsic tag
fn scalar_str(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s.as_str()),
        Value::Tagged(tagged) => scalar_str(&tagged.value),
        _ => None,
    }
}

fn normalize_reference(reference: &str) -> String {
    let mut normalized = reference.replace('\\', "/");
    while normalized.contains("//") {
        normalized = normalized.replace("//", "/");
    }
    normalized
        .trim_start_matches("./")
        .trim_start_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r"
AWSTemplateFormatVersion: '2010-09-09'
Transform: AWS::Serverless-2016-10-31
Globals:
  Function:
    Runtime: dotnet8
    CodeUri: src/Shared
    Timeout: 10
Resources:
  OrdersFunction:
    Type: AWS::Serverless::Function
    Properties:
      CodeUri: ./src/Orders/
      Handler: Orders::Orders.Function::Handle
      Environment:
        Variables:
          TABLE: !Ref OrdersTable
  RefundsFunction:
    Type: AWS::Serverless::Function
    Properties:
      CodeUri: ./src/Orders/
      Handler: Orders::Orders.Refunds::Handle
  SharedFunction:
    Type: AWS::Serverless::Function
    Properties:
      Handler: Shared::Shared.Function::Handle
  ReportsFunction:
    Type: AWS::Serverless::Function
    Properties:
      Runtime: python3.12
      CodeUri: !Sub src/reports
      Handler: app.handler
  OrdersTable:
    Type: AWS::DynamoDB::Table
    Properties:
      TableName: orders
";

    #[test]
    fn test_parse_resources() {
        let template = Template::parse(TEMPLATE).unwrap();
        assert_eq!(template.resources().len(), 5);
        assert_eq!(template.functions().count(), 4);
        assert_eq!(
            template.resource("OrdersTable").unwrap().resource_type,
            "AWS::DynamoDB::Table"
        );
    }

    #[test]
    fn test_function_records_use_globals() {
        let records = Template::parse(TEMPLATE).unwrap().function_records();
        assert_eq!(records.len(), 4);

        let orders = records.get("OrdersFunction").unwrap();
        assert_eq!(orders.runtime, "dotnet8");
        assert_eq!(orders.module, "./src/Orders/");
        assert_eq!(orders.handler, "Orders::Orders.Function::Handle");

        let reports = records.get("ReportsFunction").unwrap();
        assert_eq!(reports.runtime, "python3.12");
        assert_eq!(reports.module, "src/reports");

        assert_eq!(records.get("SharedFunction").unwrap().module, "src/Shared");
    }

    #[test]
    fn test_code_locations_collapse_duplicates() {
        let locations = Template::parse(TEMPLATE).unwrap().code_locations();
        let locations: Vec<&str> = locations.iter().map(String::as_str).collect();
        assert_eq!(
            locations,
            vec!["src/Orders/Orders", "src/Shared/Shared", "src/reports/app.handler"]
        );
    }

    #[test]
    fn test_json_template() {
        let json = r#"{"Resources": {"Fn": {"Type": "AWS::Serverless::Function",
            "Properties": {"Runtime": "nodejs20.x", "CodeUri": "src", "Handler": "index.handler"}}}}"#;
        let records = Template::parse(json).unwrap().function_records();
        assert_eq!(records.get("Fn").unwrap().runtime, "nodejs20.x");
    }

    #[test]
    fn test_missing_resources() {
        assert!(matches!(
            Template::parse("Globals: {}"),
            Err(TemplateError::MissingResources)
        ));
    }

    #[test]
    fn test_find_template() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Template::find(dir.path()),
            Err(TemplateError::NotFound(_))
        ));

        std::fs::write(dir.path().join("template.yml"), TEMPLATE).unwrap();
        assert_eq!(
            Template::find(dir.path()).unwrap(),
            dir.path().join("template.yml")
        );
    }
}
