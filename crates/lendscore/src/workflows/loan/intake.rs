use std::collections::BTreeMap;

use serde_json::Value;

use super::domain::{
    CreditHistory, Dependents, Education, EmploymentType, Gender, LoanApplicationInput,
    LoanCategory, LoanTermDays, MaritalStatus, PropertyArea,
};

pub const GENDER: &str = "gender";
pub const MARITAL_STATUS: &str = "marital_status";
pub const DEPENDENTS: &str = "dependents";
pub const EDUCATION: &str = "education";
pub const SELF_EMPLOYED: &str = "self_employed";
pub const APPLICANT_INCOME: &str = "applicant_income_php";
pub const COAPPLICANT_INCOME: &str = "coapplicant_income_php";
pub const LOAN_AMOUNT: &str = "loan_amount_php";
pub const LOAN_TERM: &str = "loan_term_days";
pub const CREDIT_HISTORY: &str = "credit_history";
pub const PROPERTY_AREA: &str = "property_area";
pub const LOAN_CATEGORY: &str = "loan_category";

/// Every field the loan form may carry.
pub const FORM_FIELDS: [&str; 12] = [
    GENDER,
    MARITAL_STATUS,
    DEPENDENTS,
    EDUCATION,
    SELF_EMPLOYED,
    APPLICANT_INCOME,
    COAPPLICANT_INCOME,
    LOAN_AMOUNT,
    LOAN_TERM,
    CREDIT_HISTORY,
    PROPERTY_AREA,
    LOAN_CATEGORY,
];

/// Input rejected before it reaches the scoring service.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unknown form field `{0}`")]
    UnknownField(String),
    #[error("`{value}` is not a valid choice for `{field}`")]
    InvalidChoice { field: &'static str, value: String },
    #[error("`{field}` must be a number (got `{value}`)")]
    NotANumber { field: &'static str, value: String },
    #[error("`{field}` must not be negative")]
    Negative { field: &'static str },
    #[error("`{field}` must be a finite number")]
    NonFinite { field: &'static str },
    #[error("unsupported loan term `{0}`")]
    UnsupportedTerm(String),
    #[error("credit history must be 0.0 or 1.0 (got `{0}`)")]
    InvalidCreditHistory(String),
    #[error("loan form must be a JSON object")]
    NotAnObject,
    #[error("`{0}` must be a string or a number")]
    UnsupportedValue(String),
}

/// Loosely typed form payload exactly as the user entered it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawLoanForm {
    fields: BTreeMap<String, String>,
}

impl RawLoanForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }

    /// Trimmed value of a field, treating blank entries as absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Accepts a JSON object whose values are strings or numbers; `null` counts as absent.
    pub fn from_json(payload: &Value) -> Result<Self, ValidationError> {
        let object = payload.as_object().ok_or(ValidationError::NotAnObject)?;
        let mut form = Self::new();
        for (name, value) in object {
            match value {
                Value::Null => {}
                Value::String(text) => form.insert(name.clone(), text.clone()),
                Value::Number(number) => form.insert(name.clone(), number.to_string()),
                _ => return Err(ValidationError::UnsupportedValue(name.clone())),
            }
        }
        Ok(form)
    }
}

impl<K, V> FromIterator<(K, V)> for RawLoanForm
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut form = Self::new();
        for (name, value) in iter {
            form.insert(name, value);
        }
        form
    }
}

impl LoanApplicationInput {
    /// Coerces a raw form into typed input, failing closed on unknown or malformed fields.
    pub fn parse(form: &RawLoanForm) -> Result<Self, ValidationError> {
        if let Some(unknown) = form
            .fields
            .keys()
            .find(|name| !FORM_FIELDS.contains(&name.as_str()))
        {
            return Err(ValidationError::UnknownField(unknown.clone()));
        }

        Ok(Self {
            gender: choice(form, GENDER, Gender::from_code)?,
            marital_status: choice(form, MARITAL_STATUS, MaritalStatus::from_code)?,
            dependents: choice(form, DEPENDENTS, Dependents::from_code)?,
            education: choice(form, EDUCATION, Education::from_code)?,
            self_employed: choice(form, SELF_EMPLOYED, EmploymentType::from_code)?,
            applicant_income_php: amount(form, APPLICANT_INCOME)?,
            coapplicant_income_php: coapplicant_income(form)?,
            loan_amount_php: amount(form, LOAN_AMOUNT)?,
            loan_term_days: loan_term(form)?,
            credit_history: credit_history(form)?,
            property_area: choice(form, PROPERTY_AREA, PropertyArea::from_code)?,
            loan_category: choice(form, LOAN_CATEGORY, LoanCategory::from_code)?,
        })
    }
}

fn required<'a>(form: &'a RawLoanForm, field: &'static str) -> Result<&'a str, ValidationError> {
    form.get(field).ok_or(ValidationError::MissingField(field))
}

fn choice<T>(
    form: &RawLoanForm,
    field: &'static str,
    from_code: fn(&str) -> Option<T>,
) -> Result<T, ValidationError> {
    let raw = required(form, field)?;
    from_code(raw).ok_or_else(|| ValidationError::InvalidChoice {
        field,
        value: raw.to_string(),
    })
}

fn number(field: &'static str, raw: &str) -> Result<f64, ValidationError> {
    let value = raw
        .parse::<f64>()
        .map_err(|_| ValidationError::NotANumber {
            field,
            value: raw.to_string(),
        })?;
    if !value.is_finite() {
        return Err(ValidationError::NonFinite { field });
    }
    if value < 0.0 {
        return Err(ValidationError::Negative { field });
    }
    Ok(value)
}

fn amount(form: &RawLoanForm, field: &'static str) -> Result<f64, ValidationError> {
    number(field, required(form, field)?)
}

/// Co-applicant income is optional: absent, blank, or non-numeric input counts as zero.
fn coapplicant_income(form: &RawLoanForm) -> Result<f64, ValidationError> {
    let Some(raw) = form.get(COAPPLICANT_INCOME) else {
        return Ok(0.0);
    };
    match raw.parse::<f64>() {
        Ok(value) if value.is_nan() => Ok(0.0),
        Ok(_) => number(COAPPLICANT_INCOME, raw),
        Err(_) => Ok(0.0),
    }
}

fn loan_term(form: &RawLoanForm) -> Result<LoanTermDays, ValidationError> {
    let raw = required(form, LOAN_TERM)?;
    let days = number(LOAN_TERM, raw)?;
    LoanTermDays::try_from(days).map_err(|_| ValidationError::UnsupportedTerm(raw.to_string()))
}

fn credit_history(form: &RawLoanForm) -> Result<CreditHistory, ValidationError> {
    let raw = required(form, CREDIT_HISTORY)?;
    raw.parse::<f64>()
        .ok()
        .and_then(CreditHistory::from_flag)
        .ok_or_else(|| ValidationError::InvalidCreditHistory(raw.to_string()))
}
