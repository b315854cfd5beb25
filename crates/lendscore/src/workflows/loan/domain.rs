use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Opaque account reference issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-assigned identifier for a persisted loan application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Application-level user metadata kept in the `users` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(rename = "uid")]
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub member_since: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(
        user_id: UserId,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        username: impl Into<String>,
        email: impl Into<String>,
        joined: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            first_name: first_name.into(),
            last_name: last_name.into(),
            username: username.into(),
            email: email.into(),
            member_since: joined,
            created_at: joined,
        }
    }

    /// Name pushed to the identity provider at registration.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Declares a categorical form field whose variants travel as literal string codes.
macro_rules! categorical {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $code)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn code(self) -> &'static str {
                match self {
                    $($name::$variant => $code),+
                }
            }

            pub fn from_code(raw: &str) -> Option<Self> {
                match raw {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.code())
            }
        }
    };
}

categorical!(Gender {
    Lalaki => "Lalaki",
    Babae => "Babae",
});

categorical!(MaritalStatus {
    Single => "Single",
    Kasal => "Kasal",
});

categorical!(
    /// Number of dependents, with three or more collapsed into one bucket.
    Dependents {
        Zero => "0",
        One => "1",
        Two => "2",
        ThreeOrMore => "3+",
    }
);

categorical!(Education {
    HighSchoolOrVocational => "High School/Vocational",
    CollegeGraduate => "College Graduate",
});

categorical!(
    /// Whether the applicant runs their own business.
    EmploymentType {
        SelfEmployed => "Yes",
        Employed => "No",
    }
);

categorical!(PropertyArea {
    MetroManila => "Metro Manila",
    ProvincialCities => "Provincial Cities",
    RuralProvinces => "Rural Provinces",
});

categorical!(LoanCategory {
    HousePurchase => "House Purchase",
    HomeImprovement => "Home Improvement",
    Car => "Car",
    Motorcycle => "Motorcycle",
    PersonalLoan => "Personal Loan",
    EducationalLoan => "Educational Loan",
    MedicalLoan => "Medical Loan",
    BusinessLoan => "Business Loan",
});

impl LoanCategory {
    pub fn description(self) -> &'static str {
        match self {
            LoanCategory::HousePurchase => {
                "For buying residential property, condominiums, or townhouses."
            }
            LoanCategory::HomeImprovement => {
                "For home renovations, repairs, extensions, or interior upgrades."
            }
            LoanCategory::Car => {
                "For purchasing new or used automobiles, SUVs, or other passenger vehicles."
            }
            LoanCategory::Motorcycle => {
                "For buying motorcycles, scooters, or other two-wheeled vehicles."
            }
            LoanCategory::PersonalLoan => {
                "For personal expenses, travel, gadgets, events, or other individual needs."
            }
            LoanCategory::EducationalLoan => {
                "For tuition fees, school supplies, educational courses, or training programs."
            }
            LoanCategory::MedicalLoan => {
                "For medical treatments, surgeries, dental work, or health-related expenses."
            }
            LoanCategory::BusinessLoan => {
                "For starting a new business, expanding operations, or business equipment."
            }
        }
    }
}

/// Loan terms offered by the scoring model, in days.
pub const LOAN_TERMS_DAYS: [u16; 13] = [
    30, 60, 90, 120, 180, 240, 360, 480, 600, 720, 1080, 1440, 1800,
];

/// A loan term restricted to [`LOAN_TERMS_DAYS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "u16")]
pub struct LoanTermDays(u16);

impl LoanTermDays {
    pub fn new(days: u16) -> Option<Self> {
        LOAN_TERMS_DAYS.contains(&days).then_some(Self(days))
    }

    pub fn days(self) -> u16 {
        self.0
    }
}

impl TryFrom<f64> for LoanTermDays {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if value.fract() == 0.0 && (0.0..=f64::from(u16::MAX)).contains(&value) {
            if let Some(term) = Self::new(value as u16) {
                return Ok(term);
            }
        }
        Err(format!("unsupported loan term of {value} days"))
    }
}

impl From<LoanTermDays> for u16 {
    fn from(term: LoanTermDays) -> Self {
        term.0
    }
}

/// Credit history flag, carried on the wire as exactly `1.0` or `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreditHistory {
    Good,
    Poor,
}

impl CreditHistory {
    pub fn flag(self) -> f64 {
        match self {
            CreditHistory::Good => 1.0,
            CreditHistory::Poor => 0.0,
        }
    }

    pub fn from_flag(flag: f64) -> Option<Self> {
        if flag == 1.0 {
            Some(CreditHistory::Good)
        } else if flag == 0.0 {
            Some(CreditHistory::Poor)
        } else {
            None
        }
    }
}

impl Serialize for CreditHistory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.flag())
    }
}

impl<'de> Deserialize<'de> for CreditHistory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let flag = f64::deserialize(deserializer)?;
        CreditHistory::from_flag(flag).ok_or_else(|| {
            serde::de::Error::custom(format!("credit history must be 0.0 or 1.0, got {flag}"))
        })
    }
}

/// Normalized, typed loan form. Field names match the scoring service's request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanApplicationInput {
    pub gender: Gender,
    pub marital_status: MaritalStatus,
    pub dependents: Dependents,
    pub education: Education,
    pub self_employed: EmploymentType,
    pub applicant_income_php: f64,
    pub coapplicant_income_php: f64,
    pub loan_amount_php: f64,
    pub loan_term_days: LoanTermDays,
    pub credit_history: CreditHistory,
    pub property_area: PropertyArea,
    pub loan_category: LoanCategory,
}

impl LoanApplicationInput {
    pub fn total_household_income(&self) -> f64 {
        self.applicant_income_php + self.coapplicant_income_php
    }

    /// Loan amount over household income; zero when there is no income to divide by.
    pub fn loan_to_income_ratio(&self) -> f64 {
        let income = self.total_household_income();
        if income > 0.0 {
            self.loan_amount_php / income
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "Low Risk")]
    Low,
    #[serde(rename = "Medium Risk")]
    Medium,
    #[serde(rename = "High Risk")]
    High,
}

impl RiskLevel {
    pub fn label(self) -> &'static str {
        match self {
            RiskLevel::Low => "Low Risk",
            RiskLevel::Medium => "Medium Risk",
            RiskLevel::High => "High Risk",
        }
    }
}

/// Outcome returned by the scoring service for one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub loan_approved: bool,
    pub approval_probability: f64,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl PredictionResult {
    /// Checks the invariants a scorer response must satisfy before it is trusted.
    pub fn check(&self) -> Result<(), String> {
        let probability = self.approval_probability;
        if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
            return Err(format!(
                "approval_probability {probability} is outside [0, 1]"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Approved,
    Denied,
}

impl ApplicationStatus {
    pub fn from_prediction(prediction: &PredictionResult) -> Self {
        if prediction.loan_approved {
            ApplicationStatus::Approved
        } else {
            ApplicationStatus::Denied
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Denied => "denied",
        }
    }
}

/// A scored submission that has not been assigned an id by the store yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanApplicationDraft {
    pub user_id: UserId,
    pub form_data: LoanApplicationInput,
    pub prediction: PredictionResult,
    pub created_at: DateTime<Utc>,
    pub status: ApplicationStatus,
}

impl LoanApplicationDraft {
    pub fn new(
        user_id: UserId,
        form_data: LoanApplicationInput,
        prediction: PredictionResult,
        created_at: DateTime<Utc>,
    ) -> Self {
        let status = ApplicationStatus::from_prediction(&prediction);
        Self {
            user_id,
            form_data,
            prediction,
            created_at,
            status,
        }
    }

    pub fn into_record(self, id: ApplicationId) -> LoanApplicationRecord {
        LoanApplicationRecord {
            id,
            user_id: self.user_id,
            form_data: self.form_data,
            prediction: self.prediction,
            created_at: self.created_at,
            status: self.status,
        }
    }
}

/// Durable, append-only result of one submission cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanApplicationRecord {
    pub id: ApplicationId,
    pub user_id: UserId,
    pub form_data: LoanApplicationInput,
    pub prediction: PredictionResult,
    pub created_at: DateTime<Utc>,
    pub status: ApplicationStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn categorical_codes_round_trip_through_from_code() {
        for category in LoanCategory::ALL {
            assert_eq!(LoanCategory::from_code(category.code()), Some(*category));
        }
        assert_eq!(Dependents::from_code("3+"), Some(Dependents::ThreeOrMore));
        assert_eq!(EmploymentType::from_code("Yes"), Some(EmploymentType::SelfEmployed));
        assert_eq!(Gender::from_code("lalaki"), None);
    }

    #[test]
    fn every_loan_category_describes_its_purpose() {
        for category in LoanCategory::ALL {
            assert!(category.description().starts_with("For "));
        }
        assert!(LoanCategory::Motorcycle.description().contains("scooters"));
    }

    #[test]
    fn loan_term_rejects_unoffered_and_fractional_days() {
        assert_eq!(LoanTermDays::new(360).map(LoanTermDays::days), Some(360));
        assert!(LoanTermDays::new(365).is_none());
        assert!(LoanTermDays::try_from(360.5).is_err());
        assert!(LoanTermDays::try_from(-30.0).is_err());
        assert_eq!(LoanTermDays::try_from(1800.0).map(u16::from), Ok(1800));
    }

    #[test]
    fn credit_history_serializes_as_sentinel_flag() {
        assert_eq!(serde_json::to_value(CreditHistory::Good).unwrap(), json!(1.0));
        assert_eq!(serde_json::to_value(CreditHistory::Poor).unwrap(), json!(0.0));
        assert!(serde_json::from_value::<CreditHistory>(json!(0.5)).is_err());
        assert_eq!(
            serde_json::from_value::<CreditHistory>(json!(1)).unwrap(),
            CreditHistory::Good
        );
    }

    #[test]
    fn prediction_result_reads_scorer_payload() {
        let prediction: PredictionResult = serde_json::from_value(json!({
            "loan_approved": false,
            "approval_probability": 0.41,
            "risk_level": "High Risk",
            "recommendations": ["Improve your credit history by paying bills on time"]
        }))
        .expect("payload decodes");

        assert_eq!(prediction.risk_level, RiskLevel::High);
        assert_eq!(prediction.recommendations.len(), 1);
        assert!(prediction.check().is_ok());
        assert_eq!(ApplicationStatus::from_prediction(&prediction), ApplicationStatus::Denied);
    }

    #[test]
    fn prediction_check_rejects_out_of_range_probability() {
        let prediction = PredictionResult {
            loan_approved: true,
            approval_probability: 1.2,
            risk_level: RiskLevel::Low,
            recommendations: Vec::new(),
        };
        assert!(prediction.check().is_err());
    }

    #[test]
    fn ratio_is_zero_without_household_income() {
        let input = LoanApplicationInput {
            gender: Gender::Babae,
            marital_status: MaritalStatus::Kasal,
            dependents: Dependents::Two,
            education: Education::HighSchoolOrVocational,
            self_employed: EmploymentType::SelfEmployed,
            applicant_income_php: 0.0,
            coapplicant_income_php: 0.0,
            loan_amount_php: 120_000.0,
            loan_term_days: LoanTermDays::new(720).expect("offered term"),
            credit_history: CreditHistory::Poor,
            property_area: PropertyArea::RuralProvinces,
            loan_category: LoanCategory::Motorcycle,
        };
        assert_eq!(input.loan_to_income_ratio(), 0.0);
    }

    #[test]
    fn record_uses_document_field_names() {
        let created_at = DateTime::parse_from_rfc3339("2025-06-01T08:30:00Z")
            .expect("valid timestamp")
            .with_timezone(&Utc);
        let draft = LoanApplicationDraft::new(
            UserId("uid-1".to_string()),
            LoanApplicationInput {
                gender: Gender::Lalaki,
                marital_status: MaritalStatus::Single,
                dependents: Dependents::Zero,
                education: Education::CollegeGraduate,
                self_employed: EmploymentType::Employed,
                applicant_income_php: 50_000.0,
                coapplicant_income_php: 0.0,
                loan_amount_php: 500_000.0,
                loan_term_days: LoanTermDays::new(360).expect("offered term"),
                credit_history: CreditHistory::Good,
                property_area: PropertyArea::MetroManila,
                loan_category: LoanCategory::HousePurchase,
            },
            PredictionResult {
                loan_approved: true,
                approval_probability: 0.82,
                risk_level: RiskLevel::Low,
                recommendations: Vec::new(),
            },
            created_at,
        );
        let record = draft.into_record(ApplicationId("loan-1".to_string()));
        let value = serde_json::to_value(&record).expect("record serializes");

        assert_eq!(value["userId"], json!("uid-1"));
        assert_eq!(value["status"], json!("approved"));
        assert_eq!(value["formData"]["loan_term_days"], json!(360));
        assert_eq!(value["formData"]["credit_history"], json!(1.0));
        assert_eq!(value["formData"]["self_employed"], json!("No"));
        assert_eq!(value["prediction"]["risk_level"], json!("Low Risk"));
    }
}
