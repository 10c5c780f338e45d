//! Azure Active Directory management (`microsoft.aadiam`).

mod diagnostic_settings;

pub use diagnostic_settings::{DiagnosticSettingsResource, LOG_CATEGORIES};
