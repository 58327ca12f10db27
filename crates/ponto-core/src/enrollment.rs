//! Enrollment form validation.
//!
//! A new employee is accepted only when every form field is present, the
//! national id matches `NNN.NNN.NNN-NN` and a face fingerprint was captured.

use crate::types::Fingerprint;
use regex_lite::Regex;
use std::sync::OnceLock;
use thiserror::Error;

const NATIONAL_ID_DIGITS: usize = 11;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("name is required")]
    MissingName,
    #[error("registration number is required")]
    MissingRegistrationNumber,
    #[error("organization id is required")]
    MissingOrganizationId,
    #[error("organization id must be an integer: {0:?}")]
    InvalidOrganizationId(String),
    #[error("national id must be formatted as NNN.NNN.NNN-NN: {0:?}")]
    InvalidNationalId(String),
    #[error("no face captured")]
    NoFaceCaptured,
}

/// Raw operator input for a new employee.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrollmentForm {
    pub name: String,
    pub registration_number: String,
    pub organization_id: String,
    pub national_id: String,
}

/// A form that passed every check, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedEnrollment {
    pub name: String,
    pub registration_number: String,
    pub organization_id: i64,
    /// Digits only, the mask is stripped.
    pub national_id: String,
    pub fingerprint: Fingerprint,
}

fn national_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{3}\.\d{3}\.\d{3}-\d{2}$").expect("static pattern"))
}

/// Whether `text` is a fully masked national id, e.g. `123.456.789-09`.
pub fn is_formatted_national_id(text: &str) -> bool {
    national_id_pattern().is_match(text)
}

/// Apply the `NNN.NNN.NNN-NN` mask to whatever digits `text` contains.
///
/// Non-digits are dropped and input beyond eleven digits is ignored, so
/// partially typed values come back partially masked.
pub fn format_national_id(text: &str) -> String {
    let mut out = String::with_capacity(NATIONAL_ID_DIGITS + 3);
    for (i, c) in text
        .chars()
        .filter(|c| c.is_ascii_digit())
        .take(NATIONAL_ID_DIGITS)
        .enumerate()
    {
        match i {
            3 | 6 => out.push('.'),
            9 => out.push('-'),
            _ => {}
        }
        out.push(c);
    }
    out
}

/// Check the submit gate. Fields are trimmed; checks run in form order so the
/// operator sees the first missing field.
pub fn validate(
    form: &EnrollmentForm,
    fingerprint: Option<&Fingerprint>,
) -> Result<ValidatedEnrollment, ValidationError> {
    let name = form.name.trim();
    if name.is_empty() {
        return Err(ValidationError::MissingName);
    }

    let registration_number = form.registration_number.trim();
    if registration_number.is_empty() {
        return Err(ValidationError::MissingRegistrationNumber);
    }

    let organization = form.organization_id.trim();
    if organization.is_empty() {
        return Err(ValidationError::MissingOrganizationId);
    }
    let organization_id: i64 = organization
        .parse()
        .map_err(|_| ValidationError::InvalidOrganizationId(organization.to_string()))?;

    let national_id = form.national_id.trim();
    if !is_formatted_national_id(national_id) {
        return Err(ValidationError::InvalidNationalId(national_id.to_string()));
    }

    let fingerprint = *fingerprint.ok_or(ValidationError::NoFaceCaptured)?;

    Ok(ValidatedEnrollment {
        name: name.to_string(),
        registration_number: registration_number.to_string(),
        organization_id,
        national_id: national_id.chars().filter(|c| c.is_ascii_digit()).collect(),
        fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> EnrollmentForm {
        EnrollmentForm {
            name: "Ana Souza".into(),
            registration_number: "R-0042".into(),
            organization_id: "7".into(),
            national_id: "123.456.789-09".into(),
        }
    }

    fn fp() -> Fingerprint {
        Fingerprint::from_hex("00ff00ff00ff00ff").unwrap()
    }

    #[test]
    fn test_valid_form() {
        let v = validate(&form(), Some(&fp())).unwrap();
        assert_eq!(v.name, "Ana Souza");
        assert_eq!(v.organization_id, 7);
        assert_eq!(v.national_id, "12345678909");
        assert_eq!(v.fingerprint, fp());
    }

    #[test]
    fn test_fields_are_trimmed() {
        let mut f = form();
        f.name = "  Ana  ".into();
        f.organization_id = " 7 ".into();
        let v = validate(&f, Some(&fp())).unwrap();
        assert_eq!(v.name, "Ana");
        assert_eq!(v.organization_id, 7);
    }

    #[test]
    fn test_missing_fields() {
        let mut f = form();
        f.name = "   ".into();
        assert_eq!(validate(&f, Some(&fp())), Err(ValidationError::MissingName));

        let mut f = form();
        f.registration_number.clear();
        assert_eq!(
            validate(&f, Some(&fp())),
            Err(ValidationError::MissingRegistrationNumber)
        );

        let mut f = form();
        f.organization_id.clear();
        assert_eq!(
            validate(&f, Some(&fp())),
            Err(ValidationError::MissingOrganizationId)
        );
    }

    #[test]
    fn test_non_numeric_organization() {
        let mut f = form();
        f.organization_id = "acme".into();
        assert!(matches!(
            validate(&f, Some(&fp())),
            Err(ValidationError::InvalidOrganizationId(_))
        ));
    }

    #[test]
    fn test_bad_national_id() {
        for bad in ["12345678909", "123.456.789-0", "123.456.789.09", "abc.def.ghi-jk", ""] {
            let mut f = form();
            f.national_id = bad.into();
            assert!(
                matches!(validate(&f, Some(&fp())), Err(ValidationError::InvalidNationalId(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn test_no_face_captured() {
        assert_eq!(validate(&form(), None), Err(ValidationError::NoFaceCaptured));
    }

    #[test]
    fn test_format_national_id() {
        assert_eq!(format_national_id("12345678909"), "123.456.789-09");
        assert_eq!(format_national_id("1234"), "123.4");
        assert_eq!(format_national_id("1234567"), "123.456.7");
        assert_eq!(format_national_id("123.456.789-0999"), "123.456.789-09");
        assert_eq!(format_national_id(""), "");
        assert!(is_formatted_national_id(&format_national_id("98765432100")));
    }
}
