//! Data model for the directory.

mod institution;

pub use institution::{
    AdditionalAttributes, Institution, InstitutionInput, InstitutionPatch, InstitutionType,
    NewInstitution,
};
