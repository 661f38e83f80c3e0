//! Resources carried by records.
//!
//! The core never interprets resource content. A resource is either opaque
//! bytes or a FHIR resource that an external [`ResourceParser`] turns into
//! text and back.

use serde::{Deserialize, Serialize};

use crate::error::{RecordVaultError, Result};

/// FHIR release a resource belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FhirVersion {
    Stu3,
    R4,
}

impl FhirVersion {
    /// Value of the `fhirversion` tag.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::Stu3 => "3.0.1",
            Self::R4 => "4.0.1",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "3.0.1" => Some(Self::Stu3),
            "4.0.1" => Some(Self::R4),
            _ => None,
        }
    }
}

/// A FHIR resource as handed over by the resource model layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FhirResource {
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    #[serde(flatten)]
    pub content: serde_json::Map<String, serde_json::Value>,
}

impl FhirResource {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            content: serde_json::Map::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.content.insert(name.into(), value);
        self
    }
}

/// What a record carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Fhir3(FhirResource),
    Fhir4(FhirResource),
    /// Opaque application data.
    Data(Vec<u8>),
}

impl Resource {
    pub fn fhir_version(&self) -> Option<FhirVersion> {
        match self {
            Self::Fhir3(_) => Some(FhirVersion::Stu3),
            Self::Fhir4(_) => Some(FhirVersion::R4),
            Self::Data(_) => None,
        }
    }

    pub fn resource_type(&self) -> Option<&str> {
        match self {
            Self::Fhir3(r) | Self::Fhir4(r) => Some(&r.resource_type),
            Self::Data(_) => None,
        }
    }
}

/// Converts FHIR resources to their canonical text form and back.
pub trait ResourceParser: Send + Sync {
    fn serialize(&self, resource: &FhirResource) -> Result<String>;

    fn deserialize(
        &self,
        resource_type: &str,
        version: FhirVersion,
        text: &str,
    ) -> Result<FhirResource>;
}

/// Plain JSON parser. Checks the declared resource type on the way back.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonResourceParser;

impl ResourceParser for JsonResourceParser {
    fn serialize(&self, resource: &FhirResource) -> Result<String> {
        serde_json::to_string(resource).map_err(|e| RecordVaultError::ResourceParse(e.to_string()))
    }

    fn deserialize(
        &self,
        resource_type: &str,
        _version: FhirVersion,
        text: &str,
    ) -> Result<FhirResource> {
        let resource: FhirResource =
            serde_json::from_str(text).map_err(|e| RecordVaultError::ResourceParse(e.to_string()))?;
        if !resource.resource_type.eq_ignore_ascii_case(resource_type) {
            return Err(RecordVaultError::ResourceParse(format!(
                "expected {}, found {}",
                resource_type, resource.resource_type
            )));
        }
        Ok(resource)
    }
}
