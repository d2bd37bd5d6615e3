//! Fixed user-facing answers for terminal branches

pub const NO_TABLE: &str =
    "Sorry, I could not find data related to your question. Please rephrase it or ask about account balances or transactions.";

pub const NO_API: &str =
    "Sorry, I could not find a service that answers this question. Please rephrase it.";

pub const INVALID_DATE: &str =
    "Sorry, the requested period is not valid. Please ask about a period that has already started.";

pub const EMPTY_QUERY: &str =
    "Sorry, I could not build a query for your question. Please rephrase it with more detail.";

pub const QUERY_FAILED: &str =
    "Sorry, I could not retrieve the data for your question. Please try again or rephrase it.";

pub const NO_METRICS: &str =
    "Sorry, I could not work out which figures you want to see. Please name the amounts or counts you are interested in.";

pub const NO_DATA_FALLBACK: &str = "There is no data matching your question for the requested period.";

pub const SMALL_TALK_FALLBACK: &str =
    "I can help with questions about your company's balances, transactions and cash flow.";

/// Prefix of the answer recorded when a step fails unrecoverably
pub const ERROR_PREFIX: &str = "Sorry, an error occurred: ";

/// Apology for a request missing required fields
pub fn missing_fields(fields: &[&str]) -> String {
    format!(
        "Sorry, the request is missing required information: {}.",
        fields.join(", ")
    )
}

pub fn error_answer(err: impl std::fmt::Display) -> String {
    format!("{}{}", ERROR_PREFIX, err)
}
