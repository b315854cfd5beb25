use crate::infra::{InMemoryDocumentStore, InMemoryIdentityProvider};
use async_trait::async_trait;
use clap::Args;
use lendscore::config::AppConfig;
use lendscore::error::AppError;
use lendscore::workflows::loan::{
    CreditHistory, Education, EmploymentType, HttpPredictionClient, LoanApplicationInput,
    LoanCategory, LoanDesk, MaritalStatus, PredictionResult, PredictionService, RawLoanForm,
    Registration, RiskLevel, ScoringError, SubmissionOutcome,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Simulate a store without the composite index, forcing the history fallback.
    #[arg(long)]
    pub(crate) without_ordered_index: bool,
    /// Score against a running scoring service instead of the local rules.
    #[arg(long)]
    pub(crate) scorer_url: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct PredictArgs {
    /// JSON file holding one loan form (field name -> value).
    #[arg(long)]
    pub(crate) form: PathBuf,
    /// Scoring service base URL. Defaults to SCORING_BASE_URL.
    #[arg(long, conflicts_with = "local")]
    pub(crate) scorer_url: Option<String>,
    /// Use the local rule-based scorer instead of the scoring service.
    #[arg(long)]
    pub(crate) local: bool,
}

/// Offline stand-in for the scoring service. Same response shape and risk bands,
/// with a transparent rule set in place of the trained model.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LocalRuleScorer;

impl LocalRuleScorer {
    pub(crate) fn score(input: &LoanApplicationInput) -> PredictionResult {
        let ratio = input.loan_to_income_ratio();
        let mut probability: f64 = 0.35;
        if input.credit_history == CreditHistory::Good {
            probability += 0.35;
        }
        if ratio <= 12.0 {
            probability += 0.15;
        } else if ratio > 36.0 {
            probability -= 0.15;
        }
        if input.education == Education::CollegeGraduate {
            probability += 0.05;
        }
        if input.self_employed == EmploymentType::SelfEmployed {
            probability -= 0.05;
        }
        let probability = probability.clamp(0.02, 0.98);

        let risk_level = if probability >= 0.8 {
            RiskLevel::Low
        } else if probability >= 0.6 {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        };

        PredictionResult {
            loan_approved: probability >= 0.5,
            approval_probability: probability,
            risk_level,
            recommendations: recommendations(input, probability),
        }
    }
}

fn recommendations(input: &LoanApplicationInput, probability: f64) -> Vec<String> {
    let mut advice: Vec<&str> = Vec::new();

    if probability < 0.7 {
        if input.credit_history == CreditHistory::Poor {
            advice.push("Improve your credit history by paying bills on time");
        }
        if input.loan_to_income_ratio() > 3.0 {
            advice.push("Consider reducing the loan amount or increasing your income");
        }
        if input.coapplicant_income_php == 0.0 && input.marital_status == MaritalStatus::Kasal {
            advice.push("Consider adding a co-applicant to strengthen your application");
        }
        if input.education == Education::HighSchoolOrVocational {
            advice.push("Consider educational upgrades to improve your profile");
        }
        if input.self_employed == EmploymentType::SelfEmployed {
            advice.push("Provide additional documentation to verify stable income");
        }
        match input.loan_category {
            LoanCategory::EducationalLoan => {
                advice.push("Consider government scholarship programs or school payment plans")
            }
            LoanCategory::MedicalLoan => {
                advice.push("Check if your health insurance covers part of the expenses")
            }
            LoanCategory::BusinessLoan => {
                advice.push("Prepare a detailed business plan and financial projections")
            }
            LoanCategory::Car => {
                advice.push("Consider certified pre-owned vehicles for better loan terms")
            }
            LoanCategory::Motorcycle => advice
                .push("Look into dealer financing options which may offer competitive rates"),
            _ => {}
        }
    } else {
        match input.loan_category {
            LoanCategory::HousePurchase => {
                advice.push("Great! Consider getting pre-approved for faster processing")
            }
            LoanCategory::BusinessLoan => {
                advice.push("Excellent! Prepare your business plan and financial projections")
            }
            LoanCategory::EducationalLoan => {
                advice.push("Perfect! Education is a great investment for your future")
            }
            LoanCategory::HomeImprovement => {
                advice.push("Good choice! Home improvements can increase your property value")
            }
            _ => {}
        }
    }

    if advice.is_empty() {
        advice.push("Your application looks good! You have a high chance of approval.");
    }
    advice.into_iter().map(str::to_string).collect()
}

#[async_trait]
impl PredictionService for LocalRuleScorer {
    async fn predict(
        &self,
        input: &LoanApplicationInput,
    ) -> Result<PredictionResult, ScoringError> {
        Ok(Self::score(input))
    }
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        without_ordered_index,
        scorer_url,
    } = args;

    let ordered_index = !without_ordered_index;
    match scorer_url {
        Some(url) => {
            walkthrough(Arc::new(HttpPredictionClient::new(url)), ordered_index).await?;
        }
        None => {
            walkthrough(Arc::new(LocalRuleScorer), ordered_index).await?;
        }
    }
    Ok(())
}

/// Runs the full lifecycle once and returns the store so callers can inspect it.
async fn walkthrough<C>(
    scorer: Arc<C>,
    ordered_index: bool,
) -> Result<Arc<InMemoryDocumentStore>, AppError>
where
    C: PredictionService + 'static,
{
    println!("LendScore loan desk demo");
    println!(
        "- store ordered index: {}",
        if ordered_index { "available" } else { "missing" }
    );

    let identity = Arc::new(InMemoryIdentityProvider::default());
    let store = Arc::new(InMemoryDocumentStore::new(ordered_index));
    let desk = LoanDesk::new(identity.clone(), store.clone(), scorer);

    let profile = desk.session().register(demo_registration()).await?;
    let session = desk.session().settled().await?;
    println!(
        "\nRegistered {} <{}> as {} ({:?})",
        identity
            .display_name(&profile.user_id)
            .unwrap_or_else(|| profile.display_name()),
        profile.email,
        profile.user_id,
        session.phase
    );

    println!("\nSubmitting applications");
    for (label, form) in demo_forms() {
        match desk.pipeline().submit(&session, &form).await {
            Ok(SubmissionOutcome::Recorded(record)) => {
                println!(
                    "- {label}: {} | {:.0}% | {} -> saved as {}",
                    record.status.label(),
                    record.prediction.approval_probability * 100.0,
                    record.prediction.risk_level.label(),
                    record.id
                );
                render_recommendations(&record.prediction);
            }
            Ok(SubmissionOutcome::PersistenceDegraded { prediction, reason }) => {
                println!(
                    "- {label}: {:.0}% | {} (not saved: {reason})",
                    prediction.approval_probability * 100.0,
                    prediction.risk_level.label()
                );
            }
            Err(err) => println!("- {label}: {err}"),
        }
    }

    println!("\nLoan history");
    match desk.history().fetch_history(&profile.user_id).await {
        Ok(history) => {
            let summary = history.summary();
            println!(
                "- served by {:?} query | {} total | {} approved | {} denied | {:.0}% success",
                history.served_by,
                summary.total,
                summary.approved,
                summary.denied,
                summary.success_rate * 100.0
            );
            for record in &history.records {
                println!(
                    "  - {} {} {} PHP {:.2} over {} days -> {}",
                    record.created_at.format("%Y-%m-%d %H:%M:%S%.3f"),
                    record.id,
                    record.form_data.loan_category,
                    record.form_data.loan_amount_php,
                    record.form_data.loan_term_days.days(),
                    record.status.label()
                );
            }
        }
        Err(err) => println!("- {err}"),
    }

    desk.session().logout().await?;
    let session = desk.session().snapshot();
    println!(
        "\nSigned out: phase {:?}, profile cleared: {}",
        session.phase,
        session.profile.is_none()
    );

    Ok(store)
}

pub(crate) async fn run_predict(args: PredictArgs) -> Result<(), AppError> {
    let PredictArgs {
        form,
        scorer_url,
        local,
    } = args;

    let raw = std::fs::read_to_string(&form)?;
    let input = parse_form_file(&raw)?;

    let prediction = if local {
        LocalRuleScorer.predict(&input).await?
    } else {
        let client = match scorer_url {
            Some(url) => HttpPredictionClient::new(url),
            None => HttpPredictionClient::from_config(&AppConfig::load()?.scoring)?,
        };
        client.predict(&input).await?
    };

    println!(
        "{} | {} | {:.1}% approval probability",
        if prediction.loan_approved {
            "Approved"
        } else {
            "Denied"
        },
        prediction.risk_level.label(),
        prediction.approval_probability * 100.0
    );
    println!(
        "{}: {}",
        input.loan_category,
        input.loan_category.description()
    );
    render_recommendations(&prediction);
    Ok(())
}

fn parse_form_file(raw: &str) -> Result<LoanApplicationInput, AppError> {
    let payload: serde_json::Value = serde_json::from_str(raw)
        .map_err(|err| AppError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err)))?;
    let form = RawLoanForm::from_json(&payload)?;
    Ok(LoanApplicationInput::parse(&form)?)
}

fn render_recommendations(prediction: &PredictionResult) {
    for tip in &prediction.recommendations {
        println!("    * {tip}");
    }
}

fn demo_registration() -> Registration {
    Registration {
        email: "juan.delacruz@example.ph".to_string(),
        password: "demo-pass-2025".to_string(),
        first_name: "Juan".to_string(),
        last_name: "Dela Cruz".to_string(),
        username: "juandc".to_string(),
    }
}

fn demo_forms() -> Vec<(&'static str, RawLoanForm)> {
    let house = RawLoanForm::new()
        .with("gender", "Lalaki")
        .with("marital_status", "Single")
        .with("dependents", "0")
        .with("education", "College Graduate")
        .with("self_employed", "No")
        .with("applicant_income_php", "50000")
        .with("coapplicant_income_php", "0")
        .with("loan_amount_php", "500000")
        .with("loan_term_days", "360")
        .with("credit_history", "1.0")
        .with("property_area", "Metro Manila")
        .with("loan_category", "House Purchase");

    let business = RawLoanForm::new()
        .with("gender", "Lalaki")
        .with("marital_status", "Kasal")
        .with("dependents", "3+")
        .with("education", "High School/Vocational")
        .with("self_employed", "Yes")
        .with("applicant_income_php", "18000")
        .with("loan_amount_php", "900000")
        .with("loan_term_days", "720")
        .with("credit_history", "0.0")
        .with("property_area", "Rural Provinces")
        .with("loan_category", "Business Loan");

    let mut incomplete = house.clone();
    incomplete.remove("loan_term_days");

    vec![
        ("House purchase", house),
        ("Business expansion", business),
        ("Incomplete form", incomplete),
    ]
}
