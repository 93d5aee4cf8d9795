use crate::platform::PlatformKey;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;

/// Free-form verification settings attached to a capability variant.
///
/// The only key the harness interprets is `simulated_mode`: when it is
/// explicitly `false` the variant has real-world effects and is excluded from
/// automatic verification. Any other value (or absence) counts as simulated.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerificationPayload(pub Map<String, Value>);

impl VerificationPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn simulated_mode(&self) -> bool {
        !matches!(self.0.get("simulated_mode"), Some(Value::Bool(false)))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// Immutable description of one implementation variant of a capability.
#[derive(Clone, Debug, PartialEq)]
pub struct CapabilityMetadata {
    pub name: String,
    pub description: String,
    pub platforms: Vec<PlatformKey>,
    pub input_schema: Value,
    pub output_schema: Value,
    pub requirements: Vec<String>,
    pub verification: Option<VerificationPayload>,
}

impl CapabilityMetadata {
    /// Start a declaration that applies to every platform until narrowed.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            platforms: vec![PlatformKey::all()],
            input_schema: Value::Object(Map::new()),
            output_schema: Value::Object(Map::new()),
            requirements: Vec::new(),
            verification: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Restrict the variant to the given platforms.
    ///
    /// An empty list leaves the universal `all` key in place. Duplicates
    /// collapse after lower-casing.
    pub fn platforms<I, P>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PlatformKey>,
    {
        let mut keys: Vec<PlatformKey> = Vec::new();
        for platform in platforms {
            let key = platform.into();
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        if !keys.is_empty() {
            self.platforms = keys;
        }
        self
    }

    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn requirements<I, S>(mut self, requirements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requirements = requirements.into_iter().map(Into::into).collect();
        self
    }

    pub fn verification(mut self, payload: VerificationPayload) -> Self {
        self.verification = Some(payload);
        self
    }

    /// True when the variant carries a verification payload that is not
    /// explicitly marked as non-simulated.
    pub fn is_verifiable(&self) -> bool {
        self.verification
            .as_ref()
            .is_some_and(VerificationPayload::simulated_mode)
    }
}

/// The executable handle of a capability variant: its canonical source text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapabilityBody {
    source: Cow<'static, str>,
}

impl CapabilityBody {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: Cow::Owned(source.into()),
        }
    }

    pub const fn from_static(source: &'static str) -> Self {
        Self {
            source: Cow::Borrowed(source),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// One executable handle paired with its metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct RegisteredCapability {
    pub metadata: CapabilityMetadata,
    pub body: CapabilityBody,
}

impl RegisteredCapability {
    pub fn new(metadata: CapabilityMetadata, body: CapabilityBody) -> Self {
        Self { metadata, body }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}
