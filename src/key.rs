//! Composite identity of a cached execution result.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of one execution: owner, entity, output channel and parameter set.
///
/// Parameters are copied into an ordered map on construction, so two keys built
/// from the same pairs in a different insertion order compare and hash equal.
/// The key exposes its parameters read-only and is never mutated after it is built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResultKey {
    owner_id: String,
    entity_id: String,
    output_selector: Option<String>,
    parameters: BTreeMap<String, String>,
}

impl ResultKey {
    /// Build a key, deep-copying the parameters.
    ///
    /// An empty selector is the same as no selector (the default output channel).
    pub fn new<'a, I>(
        owner_id: &str,
        entity_id: &str,
        output_selector: Option<&str>,
        parameters: I,
    ) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        Self {
            owner_id: owner_id.to_string(),
            entity_id: entity_id.to_string(),
            output_selector: output_selector
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            parameters: parameters
                .into_iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn output_selector(&self) -> Option<&str> {
        self.output_selector.as_deref()
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    /// Short stable digest used as the `object_id` log field
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.owner_id.as_bytes());
        hasher.update([0]);
        hasher.update(self.entity_id.as_bytes());
        hasher.update([0]);
        hasher.update(self.output_selector.as_deref().unwrap_or("").as_bytes());
        for (name, value) in &self.parameters {
            hasher.update([0]);
            hasher.update(name.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
        }
        let hash = hex::encode(hasher.finalize());
        hash[..16].to_string()
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}[{}]",
            self.owner_id,
            self.entity_id,
            self.output_selector.as_deref().unwrap_or("default")
        )?;
        for (i, (name, value)) in self.parameters.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, name, value)?;
        }
        Ok(())
    }
}
