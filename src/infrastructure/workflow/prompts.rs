//! Prompt construction for the workflow steps

use chrono::NaiveDate;

use crate::domain::retrieval::ExamplePair;
use crate::domain::workflow::{DateRange, Row, SemanticDsl, TableSpec};

/// Rows included in answer prompts
const MAX_PROMPT_ROWS: usize = 50;

fn examples_block(examples: &[ExamplePair]) -> String {
    if examples.is_empty() {
        return String::new();
    }

    let mut block = String::from("Examples:\n");
    for example in examples {
        block.push_str(&format!("Q: {}\nA: {}\n\n", example.question, example.answer));
    }
    block
}

fn rows_block(rows: &[Row]) -> String {
    let shown: Vec<&Row> = rows.iter().take(MAX_PROMPT_ROWS).collect();
    serde_json::to_string_pretty(&shown).unwrap_or_default()
}

pub fn classify_request(question: &str) -> String {
    format!(
        "Decide whether the question below asks about the user's company finances \
         (balances, transactions, cash flow, funds). Answer YES or NO only.\n\n\
         Question: {question}"
    )
}

pub fn split_question(question: &str) -> String {
    format!(
        "Split the question below into independent sub-questions that can each be answered \
         with one query. Keep the user's wording. Return a JSON array of objects with \
         \"execution_no\" (starting at 1) and \"question\". Return a single element if the \
         question cannot be split.\n\n\
         Question: {question}"
    )
}

pub fn small_talk(question: &str) -> String {
    format!(
        "You are a financial assistant for company accounts. The user said something \
         unrelated to their finances. Reply briefly and politely, and mention what you can \
         help with.\n\n\
         User: {question}"
    )
}

pub fn select_table(question: &str, catalog: &str, examples: &[ExamplePair]) -> String {
    format!(
        "Choose the table that answers the question. Reply with the table name only, or \
         NONE if no table fits.\n\n\
         Tables:\n{catalog}\n\n{}Question: {question}",
        examples_block(examples)
    )
}

pub fn select_api(question: &str, catalog: &str, examples: &[ExamplePair]) -> String {
    format!(
        "Choose the API that answers the question. Reply with the API name only, or NONE \
         if no API fits.\n\n\
         APIs:\n{catalog}\n\n{}Question: {question}",
        examples_block(examples)
    )
}

pub fn extract_dates(question: &str, today: NaiveDate) -> String {
    format!(
        "Today is {today}. Find the period the question refers to. Return JSON \
         {{\"from_date\": \"YYYY-MM-DD\", \"to_date\": \"YYYY-MM-DD\"}}. Use null for both \
         fields if the question names no period.\n\n\
         Question: {question}"
    )
}

pub fn extract_params(question: &str, api: &str, today: NaiveDate) -> String {
    format!(
        "Today is {today}. Extract the parameters for calling {api}. Return a JSON object \
         with \"from_date\" and \"to_date\" (YYYY-MM-DD, null if the question names no \
         period) plus any other parameter the question states.\n\n\
         Question: {question}"
    )
}

pub fn resolve_period(question: &str) -> String {
    format!(
        "Which reporting granularity does the question ask for? Reply with one letter: \
         y (yearly), q (quarterly), m (monthly) or d (daily).\n\n\
         Question: {question}"
    )
}

pub fn generate_query(
    question: &str,
    table: &TableSpec,
    range: &DateRange,
    company_id: &str,
    examples: &[ExamplePair],
) -> String {
    let (start, end) = range.compact();
    format!(
        "Write one PostgreSQL SELECT statement answering the question.\n\
         Table: {} ({})\n\
         Date column: {} (text, YYYYMMDD), restrict it to {start}..{end} inclusive.\n\
         Company: restrict com_id to '{company_id}'.\n\n\
         {}Question: {question}\n\nSQL:",
        table.name,
        table.description,
        table.date_column,
        examples_block(examples)
    )
}

pub fn correct_query(question: &str, query: &str, error: &str) -> String {
    format!(
        "The SQL below failed. Return a corrected PostgreSQL SELECT statement only.\n\n\
         Question: {question}\n\nSQL:\n{query}\n\nError:\n{error}"
    )
}

pub fn extract_metrics(question: &str, catalog: &str) -> String {
    format!(
        "Describe the figures the question asks for. Return JSON {{\"table\": ..., \
         \"metrics\": [...], \"group_by\": [...]}} where metrics are column names or \
         aggregates such as SUM(amount). Return an empty metrics list if the question \
         asks for no figures.\n\n\
         Tables:\n{catalog}\n\n\
         Question: {question}"
    )
}

pub fn extract_filter(question: &str, dsl: &SemanticDsl) -> String {
    format!(
        "List the filter conditions the question implies on table {}, other than dates. \
         Return a JSON array of {{\"column\", \"operator\", \"value\"}} objects, or [] if \
         there are none.\n\n\
         Question: {question}",
        dsl.table
    )
}

pub fn manipulate(question: &str, dsl: &SemanticDsl) -> String {
    format!(
        "Given metrics {:?} grouped by {:?}, state how the result should be ordered and \
         limited. Return JSON {{\"order_by\": [{{\"column\": ..., \"descending\": bool}}], \
         \"limit\": number or null}}.\n\n\
         Question: {question}",
        dsl.metrics, dsl.group_by
    )
}

pub fn respond(question: &str, rows: &[Row], has_next: bool) -> String {
    let more = if has_next {
        "\nOnly the first page of results is shown; say that more rows exist."
    } else {
        ""
    };
    format!(
        "Answer the question using the query results below. Be concise and quote the \
         figures.{more}\n\n\
         Question: {question}\n\nResults:\n{}",
        rows_block(rows)
    )
}

pub fn respond_no_data(question: &str, range: Option<&DateRange>) -> String {
    let period = range
        .map(|r| format!(" between {} and {}", r.start, r.end))
        .unwrap_or_default();
    format!(
        "No data was found{period} for the question below. Tell the user politely and \
         suggest checking the period or the accounts involved.\n\n\
         Question: {question}"
    )
}
