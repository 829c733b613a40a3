//! Institution records and the write payloads that create or modify them.

use crate::error::{MedinstError, Result};
use crate::index::SearchIndex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Open-ended per-institution metadata (accreditation body, bed count, ...).
pub type AdditionalAttributes = Map<String, Value>;

/// Closed set of institution categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstitutionType {
    Hospital,
    Clinic,
    MedicalSchool,
    VeterinarySchool,
    AcademicMedicalCenter,
    Other,
}

impl InstitutionType {
    /// Every accepted category, in declaration order.
    pub const ALL: [InstitutionType; 6] = [
        InstitutionType::Hospital,
        InstitutionType::Clinic,
        InstitutionType::MedicalSchool,
        InstitutionType::VeterinarySchool,
        InstitutionType::AcademicMedicalCenter,
        InstitutionType::Other,
    ];

    /// Return the canonical storage string for this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstitutionType::Hospital => "hospital",
            InstitutionType::Clinic => "clinic",
            InstitutionType::MedicalSchool => "medical_school",
            InstitutionType::VeterinarySchool => "veterinary_school",
            InstitutionType::AcademicMedicalCenter => "academic_medical_center",
            InstitutionType::Other => "other",
        }
    }
}

impl std::str::FromStr for InstitutionType {
    type Err = MedinstError;

    /// Parse a storage string. No case folding or aliasing: anything outside
    /// the declared set is rejected.
    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| MedinstError::InvalidCategory {
                value: s.to_string(),
            })
    }
}

impl std::fmt::Display for InstitutionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A committed institution row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Institution {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub institution_type: InstitutionType,
    pub country: String,
    pub state: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
    pub website: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub additional_attributes: Option<AdditionalAttributes>,
    pub last_updated: DateTime<Utc>,
    /// Derived from `name` and `country`; never written directly.
    pub search_index: SearchIndex,
}

impl Institution {
    /// Whether both coordinates are known.
    pub fn has_location(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}

/// A validated record ready to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewInstitution {
    pub name: String,
    pub institution_type: InstitutionType,
    pub country: String,
    pub state: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
    pub website: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub additional_attributes: Option<AdditionalAttributes>,
}

impl NewInstitution {
    pub fn new(
        name: impl Into<String>,
        institution_type: InstitutionType,
        country: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            institution_type,
            country: country.into(),
            state: None,
            city: None,
            address: None,
            website: None,
            latitude: None,
            longitude: None,
            additional_attributes: None,
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = Some(website.into());
        self
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.additional_attributes
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    /// Check the required text fields and coordinates.
    pub fn validate(&self) -> Result<()> {
        require_text("name", &self.name)?;
        require_text("country", &self.country)?;
        require_finite("latitude", self.latitude)?;
        require_finite("longitude", self.longitude)
    }

    /// Materialize the row that will be written. `id` and `search_index` are
    /// filled in by the directory and the index maintainer.
    pub(crate) fn into_row(self, now: DateTime<Utc>) -> Institution {
        Institution {
            id: 0,
            name: self.name,
            institution_type: self.institution_type,
            country: self.country,
            state: self.state,
            city: self.city,
            address: self.address,
            website: self.website,
            latitude: self.latitude,
            longitude: self.longitude,
            additional_attributes: self.additional_attributes,
            last_updated: now,
            search_index: SearchIndex::default(),
        }
    }
}

/// Raw payload supplied by an ingestion collaborator.
///
/// `type` is kept as a string so that an unknown category surfaces as
/// [`MedinstError::InvalidCategory`] instead of a generic decode error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstitutionInput {
    pub name: String,
    #[serde(rename = "type")]
    pub institution_type: String,
    pub country: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub additional_attributes: Option<AdditionalAttributes>,
}

impl TryFrom<InstitutionInput> for NewInstitution {
    type Error = MedinstError;

    fn try_from(input: InstitutionInput) -> Result<Self> {
        let institution_type = input.institution_type.parse()?;
        let record = NewInstitution {
            name: input.name,
            institution_type,
            country: input.country,
            state: input.state,
            city: input.city,
            address: input.address,
            website: input.website,
            latitude: input.latitude,
            longitude: input.longitude,
            additional_attributes: input.additional_attributes,
        };
        record.validate()?;
        Ok(record)
    }
}

/// A partial modification of an existing row.
///
/// Required fields use `Option<T>` (unset = unchanged). Nullable fields use
/// `Option<Option<T>>`: `Some(None)` clears the column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstitutionPatch {
    pub name: Option<String>,
    pub institution_type: Option<InstitutionType>,
    pub country: Option<String>,
    pub state: Option<Option<String>>,
    pub city: Option<Option<String>>,
    pub address: Option<Option<String>>,
    pub website: Option<Option<String>>,
    pub latitude: Option<Option<f64>>,
    pub longitude: Option<Option<f64>>,
    pub additional_attributes: Option<Option<AdditionalAttributes>>,
}

impl InstitutionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn institution_type(mut self, institution_type: InstitutionType) -> Self {
        self.institution_type = Some(institution_type);
        self
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn state(mut self, state: Option<String>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn city(mut self, city: Option<String>) -> Self {
        self.city = Some(city);
        self
    }

    pub fn address(mut self, address: Option<String>) -> Self {
        self.address = Some(address);
        self
    }

    pub fn website(mut self, website: Option<String>) -> Self {
        self.website = Some(website);
        self
    }

    pub fn location(mut self, latitude: Option<f64>, longitude: Option<f64>) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn additional_attributes(mut self, attributes: Option<AdditionalAttributes>) -> Self {
        self.additional_attributes = Some(attributes);
        self
    }

    /// Whether the patch writes a field the search index is derived from.
    pub fn touches_search_fields(&self) -> bool {
        self.name.is_some() || self.country.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Check the required text fields and coordinates the patch sets.
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            require_text("name", name)?;
        }
        if let Some(country) = &self.country {
            require_text("country", country)?;
        }
        require_finite("latitude", self.latitude.flatten())?;
        require_finite("longitude", self.longitude.flatten())
    }

    /// Apply the patch to an in-memory copy of the row.
    pub(crate) fn apply_to(self, record: &mut Institution) {
        if let Some(name) = self.name {
            record.name = name;
        }
        if let Some(institution_type) = self.institution_type {
            record.institution_type = institution_type;
        }
        if let Some(country) = self.country {
            record.country = country;
        }
        if let Some(state) = self.state {
            record.state = state;
        }
        if let Some(city) = self.city {
            record.city = city;
        }
        if let Some(address) = self.address {
            record.address = address;
        }
        if let Some(website) = self.website {
            record.website = website;
        }
        if let Some(latitude) = self.latitude {
            record.latitude = latitude;
        }
        if let Some(longitude) = self.longitude {
            record.longitude = longitude;
        }
        if let Some(attributes) = self.additional_attributes {
            record.additional_attributes = attributes;
        }
    }
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MedinstError::Validation {
            field: field.to_string(),
            message: "must not be empty".to_string(),
        });
    }
    Ok(())
}

// SQLite stores NaN as NULL, so only finite values survive a write unchanged.
fn require_finite(field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) if !v.is_finite() => Err(MedinstError::Validation {
            field: field.to_string(),
            message: format!("must be a finite number, got {}", v),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_institution_type_roundtrip() {
        for t in InstitutionType::ALL {
            let parsed: InstitutionType = t.as_str().parse().expect("Should parse");
            assert_eq!(t, parsed);
        }
    }

    #[test]
    fn test_institution_type_rejects_unknown() {
        let err = "dentist_office".parse::<InstitutionType>().unwrap_err();
        assert!(matches!(
            err,
            MedinstError::InvalidCategory { value } if value == "dentist_office"
        ));

        // No coercion of near misses
        assert!("Hospital".parse::<InstitutionType>().is_err());
        assert!(" clinic".parse::<InstitutionType>().is_err());
    }

    #[test]
    fn test_institution_type_serde_matches_storage_string() {
        let json = serde_json::to_string(&InstitutionType::AcademicMedicalCenter).unwrap();
        assert_eq!(json, "\"academic_medical_center\"");
    }

    #[test]
    fn test_input_conversion() {
        let input: InstitutionInput = serde_json::from_value(json!({
            "name": "Ontario Veterinary College",
            "type": "veterinary_school",
            "country": "CAN",
            "city": "Guelph",
            "additional_attributes": {"accreditation": "AVMA", "source": "AVMA"}
        }))
        .unwrap();

        let record = NewInstitution::try_from(input).unwrap();
        assert_eq!(record.institution_type, InstitutionType::VeterinarySchool);
        assert_eq!(record.city.as_deref(), Some("Guelph"));
        assert_eq!(record.state, None);
        assert_eq!(
            record.additional_attributes.unwrap()["accreditation"],
            json!("AVMA")
        );
    }

    #[test]
    fn test_input_conversion_rejects_category() {
        let input: InstitutionInput = serde_json::from_value(json!({
            "name": "Bright Smiles",
            "type": "dentist_office",
            "country": "USA"
        }))
        .unwrap();

        assert!(matches!(
            NewInstitution::try_from(input),
            Err(MedinstError::InvalidCategory { .. })
        ));
    }

    #[test]
    fn test_validate_requires_name_and_country() {
        let record = NewInstitution::new("  ", InstitutionType::Clinic, "USA");
        assert!(matches!(
            record.validate(),
            Err(MedinstError::Validation { field, .. }) if field == "name"
        ));

        let patch = InstitutionPatch::new().country("");
        assert!(patch.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite_coordinates() {
        let record = NewInstitution::new("Mercy Clinic", InstitutionType::Clinic, "USA")
            .with_location(f64::NAN, 1.0);
        assert!(matches!(
            record.validate(),
            Err(MedinstError::Validation { field, .. }) if field == "latitude"
        ));

        let patch = InstitutionPatch::new().location(Some(10.0), Some(f64::INFINITY));
        assert!(matches!(
            patch.validate(),
            Err(MedinstError::Validation { field, .. }) if field == "longitude"
        ));

        assert!(InstitutionPatch::new().location(None, None).validate().is_ok());
    }

    #[test]
    fn test_patch_search_fields() {
        assert!(!InstitutionPatch::new()
            .address(Some("1 Main St".into()))
            .touches_search_fields());
        assert!(InstitutionPatch::new().country("CAN").touches_search_fields());
        assert!(InstitutionPatch::new().is_empty());
    }

    #[test]
    fn test_patch_apply_clears_nullable_fields() {
        let mut row = NewInstitution::new("Mercy Clinic", InstitutionType::Clinic, "USA")
            .with_city("Denver")
            .with_location(39.7, -104.9)
            .into_row(Utc::now());

        InstitutionPatch::new()
            .city(None)
            .location(None, None)
            .apply_to(&mut row);

        assert_eq!(row.city, None);
        assert!(!row.has_location());
        assert_eq!(row.name, "Mercy Clinic");
    }
}
