//! Request field extraction
//!
//! `stepName`, `kettleOutput`, `download` and `bypassCache` steer the request;
//! every other field is passed to the entity as a parameter.

use std::collections::HashMap;

use crate::render::OutputKind;

pub const STEP_NAME: &str = "stepName";
pub const OUTPUT_KIND: &str = "kettleOutput";
pub const DOWNLOAD: &str = "download";
pub const BYPASS_CACHE: &str = "bypassCache";

/// Fields of an entity request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityRequest {
    pub step_name: Option<String>,
    pub output: OutputKind,
    pub download: bool,
    pub bypass_cache: bool,
    pub parameters: HashMap<String, String>,
}

impl EntityRequest {
    /// Split raw name/value pairs. For repeated names the last value wins.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut request = Self::default();

        for (name, value) in pairs {
            match name.as_str() {
                STEP_NAME => request.step_name = Some(value).filter(|v| !v.is_empty()),
                OUTPUT_KIND => request.output = OutputKind::from_selector(Some(&value)),
                DOWNLOAD => request.download = parse_flag(&value),
                BYPASS_CACHE => request.bypass_cache = parse_flag(&value),
                _ => {
                    request.parameters.insert(name, value);
                }
            }
        }

        request
    }
}

/// `true` (any case) is true, anything else is false
pub fn parse_flag(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_wire_fields_are_extracted() {
        let request = EntityRequest::from_pairs(pairs(&[
            ("stepName", "OUTPUT_totals"),
            ("kettleOutput", "singleCELL"),
            ("download", "TRUE"),
            ("bypassCache", "yes"),
            ("region", "eu"),
            ("year", "2024"),
        ]));

        assert_eq!(request.step_name.as_deref(), Some("OUTPUT_totals"));
        assert_eq!(request.output, OutputKind::SingleCell);
        assert!(request.download);
        assert!(!request.bypass_cache);
        assert_eq!(request.parameters.len(), 2);
        assert_eq!(request.parameters["region"], "eu");
    }

    #[test]
    fn test_defaults() {
        let request =
            EntityRequest::from_pairs(pairs(&[("stepName", ""), ("kettleOutput", "csv")]));

        assert_eq!(request.step_name, None);
        assert_eq!(request.output, OutputKind::Inferred);
        assert!(!request.download);
        assert!(!request.bypass_cache);
        assert!(request.parameters.is_empty());
    }
}
